//! Fair handoff of accepted connections from one
//! shared listener to a pool of workers.
//!
//! Only the coordinator binds. Workers join a group (one group per listen
//! spec), and every connection the group's listener accepts is delivered to
//! exactly one of them over its control channel, or closed if the group is
//! torn down first.
//!
//! # Architecture
//!
//! ```text
//! CoordinatorHandle (join / leave / remove_worker / stats / shutdown)
//!   └── Coordinator task
//!       └── ListenSpec → Distributor
//!           ├── ListeningEndpoint  (bind once, close on last leave)
//!           ├── WorkerRegistry     (members + FIFO free list)
//!           ├── PendingQueue       (FIFO of accepted connections)
//!           └── ControlChannel     (one deliver request in flight per worker)
//! ```
//!
//! # Fairness
//!
//! Both queues are FIFO: the longest-idle worker gets the oldest pending
//! connection. A worker that refuses a connection gets it requeued at the
//! tail, so it never starves the rest of the queue.

pub mod channel;
pub mod coordinator;
pub mod distributor;
pub mod endpoint;
pub mod error;
pub mod pending;
pub mod registry;

#[cfg(test)]
mod interleaving;
#[cfg(test)]
mod testutil;

pub use channel::{ControlChannel, Handoff};
pub use coordinator::{Coordinator, CoordinatorHandle};
pub use distributor::{Departure, Distributor, DistributorStats, Event, EventSender, Worker};
pub use endpoint::{
    BoxFuture, ConnectionSink, EndpointFactory, ListeningEndpoint, ListeningHandle,
    TransferableHandle,
};
pub use error::{DistributorError, DistributorResult};
pub use pending::PendingQueue;
pub use registry::{DrainState, WorkerRegistry};
