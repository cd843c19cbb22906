//! Distributor error types.

use handoff_core::WorkerId;
use thiserror::Error;

/// Errors surfaced to callers of join/leave.
///
/// Handoff refusals and late replies are not errors; they are absorbed by
/// the distributor and never show up here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DistributorError {
    #[error("worker already joined this group: {0}")]
    DuplicateWorker(WorkerId),

    #[error("listener bind failed with code {code}")]
    BindFailed { code: i32 },

    #[error("join cancelled before the listener was ready")]
    Cancelled,

    #[error("coordinator is not running")]
    CoordinatorClosed,
}

pub type DistributorResult<T> = Result<T, DistributorError>;
