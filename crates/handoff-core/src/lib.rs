pub mod config;
pub mod errno;
pub mod message;
pub mod types;

pub use config::HandoffConfig;
pub use message::{ControlRequest, DeliverReply, DeliverRequest, JoinAckMessage};
pub use types::*;
