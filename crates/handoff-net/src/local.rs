//! In-process control channel.
//!
//! Workers that live in the same process as the coordinator receive
//! connections through a [`WorkerInbox`]. Each [`Delivery`] must be accepted
//! or refused; dropping one unanswered refuses it, so the connection goes
//! back to the queue instead of vanishing.

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use handoff_core::{DeliverRequest, GroupKey};
use handoff_distributor::{BoxFuture, ControlChannel, Handoff, TransferableHandle};

enum LocalReply<H> {
    Accepted,
    Refused(H),
}

/// A connection offered to a worker, waiting for its answer.
pub struct Delivery<H> {
    request: DeliverRequest,
    parts: Option<(H, oneshot::Sender<LocalReply<H>>)>,
}

impl<H> Delivery<H> {
    pub fn request(&self) -> &DeliverRequest {
        &self.request
    }

    pub fn group_key(&self) -> &GroupKey {
        &self.request.group_key
    }

    /// Take ownership of the connection.
    pub fn accept(mut self) -> H {
        let Some((handle, reply)) = self.parts.take() else {
            unreachable!("delivery answered twice");
        };
        let _ = reply.send(LocalReply::Accepted);
        handle
    }

    /// Give the connection back to the coordinator.
    pub fn refuse(mut self) {
        if let Some((handle, reply)) = self.parts.take() {
            let _ = reply.send(LocalReply::Refused(handle));
        }
    }
}

impl<H> Drop for Delivery<H> {
    fn drop(&mut self) {
        if let Some((handle, reply)) = self.parts.take() {
            debug!(group = %self.request.group_key, "delivery dropped unanswered");
            let _ = reply.send(LocalReply::Refused(handle));
        }
    }
}

/// Receiving half held by the worker.
pub struct WorkerInbox<H> {
    rx: mpsc::UnboundedReceiver<Delivery<H>>,
}

impl<H> WorkerInbox<H> {
    /// Next offered connection, or `None` once the coordinator side is gone.
    pub async fn recv(&mut self) -> Option<Delivery<H>> {
        self.rx.recv().await
    }

    /// Stop taking deliveries. Anything already queued is refused as it is
    /// dropped.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Sending half held by the coordinator.
pub struct LocalChannel<H> {
    tx: mpsc::UnboundedSender<Delivery<H>>,
}

impl<H> Clone for LocalChannel<H> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

pub fn local_channel<H>() -> (LocalChannel<H>, WorkerInbox<H>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (LocalChannel { tx }, WorkerInbox { rx })
}

impl<H: TransferableHandle> ControlChannel<H> for LocalChannel<H> {
    fn deliver(&self, request: DeliverRequest, handle: H) -> BoxFuture<Handoff<H>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let delivery = Delivery {
            request,
            parts: Some((handle, reply_tx)),
        };
        if let Err(mpsc::error::SendError(mut delivery)) = self.tx.send(delivery) {
            // Inbox is gone; recover the handle before the drop hook sees it.
            let handle = delivery.parts.take().map(|(handle, _)| handle);
            return Box::pin(async move { Handoff::Disconnected(handle) });
        }
        Box::pin(async move {
            match reply_rx.await {
                Ok(LocalReply::Accepted) => Handoff::Accepted { retained: None },
                Ok(LocalReply::Refused(handle)) => Handoff::Refused(handle),
                Err(_) => Handoff::Disconnected(None),
            }
        })
    }
}
