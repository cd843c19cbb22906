//! In-memory endpoint, channel and handles for driving a distributor step
//! by step in tests.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use handoff_core::{DeliverRequest, JoinAck, ListenSpec, LocalAddress, WorkerId};

use crate::channel::{ControlChannel, Handoff};
use crate::distributor::{Distributor, Event, Worker};
use crate::endpoint::{
    BoxFuture, ConnectionSink, EndpointFactory, ListeningEndpoint, ListeningHandle,
    TransferableHandle,
};

pub fn fake_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 4000))
}

/// Counts closes per handle id.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    closes: Arc<Mutex<HashMap<u32, usize>>>,
}

impl Ledger {
    pub fn handle(&self, id: u32) -> FakeHandle {
        FakeHandle {
            id,
            ledger: self.clone(),
        }
    }

    pub fn closes(&self, id: u32) -> usize {
        self.closes.lock().unwrap().get(&id).copied().unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct FakeHandle {
    pub id: u32,
    ledger: Ledger,
}

impl TransferableHandle for FakeHandle {
    fn close(self) {
        *self.ledger.closes.lock().unwrap().entry(self.id).or_insert(0) += 1;
    }
}

#[derive(Debug)]
pub struct FakeListener {
    local: LocalAddress,
    closes: Arc<AtomicUsize>,
}

impl ListeningHandle for FakeListener {
    fn local_address(&self) -> LocalAddress {
        self.local
    }

    fn close(self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct EndpointState {
    manual: bool,
    binds: usize,
    pending_bind: Option<oneshot::Sender<io::Result<()>>>,
    sink: Option<ConnectionSink<FakeHandle>>,
}

/// Endpoint whose binds succeed at once, or wait for `complete_bind`.
#[derive(Clone, Default)]
pub struct FakeEndpoint {
    state: Arc<Mutex<EndpointState>>,
    listener_closes: Arc<AtomicUsize>,
}

impl FakeEndpoint {
    pub fn manual() -> Self {
        let endpoint = Self::default();
        endpoint.state.lock().unwrap().manual = true;
        endpoint
    }

    pub fn binds(&self) -> usize {
        self.state.lock().unwrap().binds
    }

    pub fn listener_closes(&self) -> usize {
        self.listener_closes.load(Ordering::SeqCst)
    }

    pub fn complete_bind(&self, result: io::Result<()>) {
        let tx = self
            .state
            .lock()
            .unwrap()
            .pending_bind
            .take()
            .expect("no bind in progress");
        let _ = tx.send(result);
    }

    /// Sink handed to the most recent bind.
    pub fn sink(&self) -> ConnectionSink<FakeHandle> {
        self.state.lock().unwrap().sink.clone().expect("never bound")
    }
}

impl ListeningEndpoint for FakeEndpoint {
    type Handle = FakeHandle;
    type Listener = FakeListener;

    fn bind(&mut self, sink: ConnectionSink<FakeHandle>) -> BoxFuture<io::Result<FakeListener>> {
        let mut state = self.state.lock().unwrap();
        state.binds += 1;
        state.sink = Some(sink);
        let listener = FakeListener {
            local: LocalAddress::Inet(fake_addr()),
            closes: self.listener_closes.clone(),
        };
        if !state.manual {
            return Box::pin(async move { Ok(listener) });
        }
        let (tx, rx) = oneshot::channel();
        state.pending_bind = Some(tx);
        Box::pin(async move {
            match rx.await {
                Ok(Ok(())) => Ok(listener),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(io::Error::other("bind abandoned")),
            }
        })
    }
}

/// Hands out clones of one endpoint for every spec.
#[derive(Clone, Default)]
pub struct FakeFactory {
    pub endpoint: FakeEndpoint,
}

impl EndpointFactory for FakeFactory {
    type Endpoint = FakeEndpoint;

    fn endpoint(&self, _spec: &ListenSpec) -> FakeEndpoint {
        self.endpoint.clone()
    }
}

/// A deliver request waiting for the test to answer it.
pub struct Offer {
    pub worker: WorkerId,
    pub request: DeliverRequest,
    handle: FakeHandle,
    reply: oneshot::Sender<Handoff<FakeHandle>>,
}

impl Offer {
    pub fn handle_id(&self) -> u32 {
        self.handle.id
    }

    /// The worker takes the connection; nothing is left behind.
    pub fn accept(self) {
        let _ = self.reply.send(Handoff::Accepted { retained: None });
    }

    /// The worker takes a copy; the coordinator's original comes back.
    pub fn accept_retaining(self) {
        let _ = self.reply.send(Handoff::Accepted {
            retained: Some(self.handle),
        });
    }

    pub fn refuse(self) {
        let _ = self.reply.send(Handoff::Refused(self.handle));
    }

    pub fn disconnect(self) {
        let _ = self.reply.send(Handoff::Disconnected(Some(self.handle)));
    }
}

/// Shared record of every offer made on any fake channel.
#[derive(Clone, Default)]
pub struct Offers {
    log: Arc<Mutex<Vec<Offer>>>,
}

impl Offers {
    pub fn channel(&self, worker: u32) -> FakeChannel {
        FakeChannel {
            worker: WorkerId(worker),
            offers: self.clone(),
        }
    }

    /// Offers made since the last call, in order.
    pub fn take(&self) -> Vec<Offer> {
        std::mem::take(&mut *self.log.lock().unwrap())
    }
}

#[derive(Clone)]
pub struct FakeChannel {
    worker: WorkerId,
    offers: Offers,
}

impl ControlChannel<FakeHandle> for FakeChannel {
    fn deliver(&self, request: DeliverRequest, handle: FakeHandle) -> BoxFuture<Handoff<FakeHandle>> {
        let (tx, rx) = oneshot::channel();
        self.offers.log.lock().unwrap().push(Offer {
            worker: self.worker,
            request,
            handle,
            reply: tx,
        });
        Box::pin(async move { rx.await.unwrap_or(Handoff::Disconnected(None)) })
    }
}

/// A distributor wired to fakes, plus the event queue it posts to.
pub struct Harness {
    pub dist: Distributor<FakeEndpoint, FakeChannel>,
    pub endpoint: FakeEndpoint,
    pub offers: Offers,
    pub ledger: Ledger,
    events_tx: mpsc::UnboundedSender<Event<FakeHandle, FakeListener>>,
    events: mpsc::UnboundedReceiver<Event<FakeHandle, FakeListener>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_endpoint(FakeEndpoint::default())
    }

    pub fn with_manual_bind() -> Self {
        Self::with_endpoint(FakeEndpoint::manual())
    }

    fn with_endpoint(endpoint: FakeEndpoint) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            dist: Distributor::new(Self::spec(), endpoint.clone(), tx.clone()),
            endpoint,
            offers: Offers::default(),
            ledger: Ledger::default(),
            events_tx: tx,
            events: rx,
        }
    }

    fn spec() -> ListenSpec {
        ListenSpec::tcp("127.0.0.1", 4000)
    }

    /// Swap in a fresh distributor for the same spec, the way the
    /// coordinator does after forgetting a torn-down group. Events still in
    /// flight for the old one are delivered to the new one.
    pub fn recreate(&mut self) {
        self.dist = Distributor::new(Self::spec(), self.endpoint.clone(), self.events_tx.clone());
    }

    pub fn local(&self) -> LocalAddress {
        LocalAddress::Inet(fake_addr())
    }

    pub fn join(&mut self, worker: u32) -> oneshot::Receiver<JoinAck> {
        let (tx, rx) = oneshot::channel();
        self.dist
            .join(Worker::new(worker, self.offers.channel(worker)), tx)
            .expect("join rejected");
        rx
    }

    pub fn accept(&mut self, id: u32) {
        let handle = self.ledger.handle(id);
        self.dist.on_accepted(handle);
    }

    /// Wait for the next continuation event and apply it.
    pub async fn pump(&mut self) {
        let event = tokio::time::timeout(Duration::from_secs(1), self.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        self.dist.handle_event(event);
    }

    /// Let spawned handoff and bind tasks run, then apply every event they
    /// posted.
    pub async fn settle(&mut self) {
        for _ in 0..8 {
            tokio::task::yield_now().await;
            while let Ok(event) = self.events.try_recv() {
                self.dist.handle_event(event);
            }
        }
    }
}
