//! Listening endpoint and connection handle abstractions.
//!
//! The distributor never looks inside a connection or a listener. It only
//! needs to move them around and close them, so both are modeled as owned
//! values whose `close` consumes `self`: a handle cannot be closed twice or
//! used after it was closed.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use handoff_core::{ListenSpec, LocalAddress};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// One accepted connection that can be handed to a worker.
pub trait TransferableHandle: Send + 'static {
    /// Release the coordinator's reference to the connection.
    fn close(self);
}

/// The live, bound listening resource shared by a group.
pub trait ListeningHandle: Send + 'static {
    fn local_address(&self) -> LocalAddress;

    /// Stop accepting and release the listener.
    fn close(self);
}

/// Produces the listener for a group on demand.
pub trait ListeningEndpoint: Send + 'static {
    type Handle: TransferableHandle;
    type Listener: ListeningHandle;

    /// Bind the listener. Once bound, every accepted connection is pushed
    /// into `sink` until the returned listener is closed.
    fn bind(&mut self, sink: ConnectionSink<Self::Handle>) -> BoxFuture<io::Result<Self::Listener>>;
}

/// Creates an endpoint for each listen spec the coordinator sees.
pub trait EndpointFactory: Send + 'static {
    type Endpoint: ListeningEndpoint;

    fn endpoint(&self, spec: &ListenSpec) -> Self::Endpoint;
}

/// Subscription through which an endpoint reports accepted connections.
pub struct ConnectionSink<H> {
    push: Arc<dyn Fn(H) -> Result<(), H> + Send + Sync>,
}

impl<H> ConnectionSink<H> {
    pub fn new(push: impl Fn(H) -> Result<(), H> + Send + Sync + 'static) -> Self {
        Self {
            push: Arc::new(push),
        }
    }

    /// Hand an accepted connection to the distributor.
    ///
    /// Returns the handle back if nobody is listening any more; the caller
    /// should close it and stop accepting.
    pub fn push(&self, handle: H) -> Result<(), H> {
        (self.push)(handle)
    }
}

impl<H> Clone for ConnectionSink<H> {
    fn clone(&self) -> Self {
        Self {
            push: self.push.clone(),
        }
    }
}
