//! Control channel abstraction: one ordered request/reply pipe per worker
//! that can carry a connection handle alongside a deliver request.

use handoff_core::{DeliverReply, DeliverRequest};

use crate::endpoint::BoxFuture;

/// How a single handoff ended.
#[derive(Debug)]
pub enum Handoff<H> {
    /// The worker owns the connection now. Channels that duplicate the
    /// underlying OS resource return the coordinator's copy in `retained`
    /// so it can be closed.
    Accepted { retained: Option<H> },
    /// The worker is shutting down and gave the connection back.
    Refused(H),
    /// The channel closed before a reply arrived. The handle is returned
    /// when the channel still had it.
    Disconnected(Option<H>),
}

impl<H> Handoff<H> {
    /// Build the outcome for a channel that sent a copy of `local` and got
    /// `reply` back.
    pub fn from_reply(reply: DeliverReply, local: H) -> Self {
        if reply.accepted {
            Handoff::Accepted {
                retained: Some(local),
            }
        } else {
            Handoff::Refused(local)
        }
    }

    /// The handle still owned by the coordinator after this outcome, if any.
    pub fn into_returned(self) -> Option<H> {
        match self {
            Handoff::Accepted { retained } => retained,
            Handoff::Refused(handle) => Some(handle),
            Handoff::Disconnected(handle) => handle,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Handoff::Accepted { .. })
    }
}

/// Request/reply transport to one worker.
///
/// Requests on the same channel must be answered in order. The returned
/// future must not borrow the channel; the distributor keeps running while
/// it is pending.
pub trait ControlChannel<H>: Send + 'static {
    fn deliver(&self, request: DeliverRequest, handle: H) -> BoxFuture<Handoff<H>>;
}
