//! Concrete collaborators for the distributor.
//!
//! - **`listener`**: `NetEndpoint` binds TCP or Unix-socket listeners with
//!   tokio and feeds accepted streams to the distributor.
//! - **`local`**: `LocalChannel` delivers connections to workers running
//!   in the same process, with a `WorkerInbox` on the worker side.

pub mod listener;
pub mod local;

pub use listener::{AcceptLoop, Connection, NetEndpoint, NetEndpointFactory};
pub use local::{Delivery, LocalChannel, WorkerInbox, local_channel};
