//! Hands connections from one shared listener to a group of
//! workers.
//!
//! The distributor is a plain state machine driven through `&mut self`. It
//! never waits: binding and handoffs run as spawned tasks that post an
//! [`Event`] back to whoever owns the distributor (normally the
//! [`Coordinator`](crate::Coordinator)), which feeds it to
//! [`Distributor::handle_event`].
//!
//! # Handoff cycle
//!
//! ```text
//! accepted ─► PendingQueue tail ─► wake oldest idle worker
//!                                        │
//! drain(worker) ◄──────────────────┐     ▼
//!   ├─ gone?          stop         │  pop head
//!   ├─ queue empty?   → FreeList   │     │
//!   └─ deliver ─► reply ───────────┘◄────┘
//!        accepted: close local copy, keep draining
//!        refused:  requeue at tail, wake another, keep draining
//! ```

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use handoff_core::errno::{bind_error_code, code_name};
use handoff_core::{DeliverRequest, GroupKey, JoinAck, ListenSpec, LocalAddress, WorkerId};

use crate::channel::{ControlChannel, Handoff};
use crate::endpoint::{ConnectionSink, ListeningEndpoint, ListeningHandle, TransferableHandle};
use crate::error::{DistributorError, DistributorResult};
use crate::pending::PendingQueue;
use crate::registry::{DrainState, WorkerRegistry};

/// A worker as seen by the distributor: an id and a way to reach it.
#[derive(Debug, Clone)]
pub struct Worker<C> {
    pub id: WorkerId,
    pub channel: C,
}

impl<C> Worker<C> {
    pub fn new(id: impl Into<WorkerId>, channel: C) -> Self {
        Self {
            id: id.into(),
            channel,
        }
    }
}

/// Continuations posted back to the distributor's owner.
#[derive(Debug)]
pub enum Event<H, L> {
    /// A bind started by a join finished.
    Bound {
        spec: ListenSpec,
        generation: u64,
        result: io::Result<L>,
    },
    /// The listener of `generation` accepted a connection.
    Accepted {
        spec: ListenSpec,
        generation: u64,
        handle: H,
    },
    /// A worker answered (or failed to answer) a deliver request.
    Replied {
        spec: ListenSpec,
        worker: WorkerId,
        serial: u64,
        outcome: Handoff<H>,
    },
}

impl<H: TransferableHandle, L: ListeningHandle> Event<H, L> {
    pub fn spec(&self) -> &ListenSpec {
        match self {
            Event::Bound { spec, .. } | Event::Accepted { spec, .. } | Event::Replied { spec, .. } => {
                spec
            }
        }
    }

    /// Release whatever resource the event carries. Used when the group it
    /// belongs to no longer exists.
    pub fn discard(self) {
        match self {
            Event::Bound { result, .. } => {
                if let Ok(listener) = result {
                    listener.close();
                }
            }
            Event::Accepted { handle, .. } => handle.close(),
            Event::Replied { outcome, .. } => {
                if let Some(handle) = outcome.into_returned() {
                    handle.close();
                }
            }
        }
    }
}

pub type EventSender<H, L> = mpsc::UnboundedSender<Event<H, L>>;

/// Shared by every distributor so a group recreated for the same spec never
/// reuses a generation of the one it replaces.
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Result of a leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// The worker was not in the group. Nothing happened.
    NotMember,
    /// The worker was removed; others remain.
    Removed,
    /// The last worker left: listener and queued connections were closed.
    TornDown,
}

impl Departure {
    pub fn removed(self) -> bool {
        !matches!(self, Departure::NotMember)
    }

    pub fn torn_down(self) -> bool {
        matches!(self, Departure::TornDown)
    }
}

/// Point-in-time view of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DistributorStats {
    pub workers: usize,
    pub idle: usize,
    pub offering: usize,
    pub stalled: usize,
    pub pending: usize,
    pub bound: bool,
}

struct Waiter {
    worker: WorkerId,
    serial: u64,
    ack: oneshot::Sender<JoinAck>,
}

enum ListenerState<L> {
    Closed,
    Binding { waiters: Vec<Waiter> },
    Open { listener: L, local: LocalAddress },
}

/// Fair FIFO handoff of one listener's connections to a group of workers.
pub struct Distributor<E: ListeningEndpoint, C> {
    spec: ListenSpec,
    key: GroupKey,
    endpoint: E,
    listener: ListenerState<E::Listener>,
    /// Bumped on every bind so late events from an old listener are
    /// recognised.
    generation: u64,
    registry: WorkerRegistry<C>,
    pending: PendingQueue<E::Handle>,
    events: EventSender<E::Handle, E::Listener>,
}

impl<E, C> Distributor<E, C>
where
    E: ListeningEndpoint,
    C: ControlChannel<E::Handle>,
{
    pub fn new(spec: ListenSpec, endpoint: E, events: EventSender<E::Handle, E::Listener>) -> Self {
        let key = spec.group_key();
        Self {
            spec,
            key,
            endpoint,
            listener: ListenerState::Closed,
            generation: 0,
            registry: WorkerRegistry::new(),
            pending: PendingQueue::new(),
            events,
        }
    }

    pub fn spec(&self) -> &ListenSpec {
        &self.spec
    }

    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    pub fn contains(&self, worker: WorkerId) -> bool {
        self.registry.contains(worker)
    }

    /// No workers, no listener, nothing queued.
    pub fn is_idle(&self) -> bool {
        self.registry.is_empty()
            && self.pending.is_empty()
            && matches!(self.listener, ListenerState::Closed)
    }

    pub fn local_address(&self) -> Option<LocalAddress> {
        match &self.listener {
            ListenerState::Open { local, .. } => Some(*local),
            _ => None,
        }
    }

    pub fn stats(&self) -> DistributorStats {
        DistributorStats {
            workers: self.registry.len(),
            idle: self.registry.count_in(DrainState::Idle),
            offering: self.registry.count_in(DrainState::Offering),
            stalled: self.registry.count_in(DrainState::Stalled),
            pending: self.pending.len(),
            bound: matches!(self.listener, ListenerState::Open { .. }),
        }
    }

    /// Idle workers, longest-idle first.
    pub fn free_workers(&self) -> Vec<WorkerId> {
        self.registry.free_list().collect()
    }

    /// Add a worker to the group.
    ///
    /// `ack` fires once the shared listener is ready (or failed to bind).
    /// The first join binds the listener; joins that arrive while the bind
    /// is in progress are acknowledged together when it resolves.
    pub fn join(&mut self, worker: Worker<C>, ack: oneshot::Sender<JoinAck>) -> DistributorResult<()> {
        let id = worker.id;
        let Some(serial) = self.registry.insert(id, worker.channel) else {
            warn!(group = %self.key, worker = %id, "duplicate join rejected");
            return Err(DistributorError::DuplicateWorker(id));
        };
        info!(group = %self.key, worker = %id, "worker joined group");

        match &mut self.listener {
            ListenerState::Open { local, .. } => {
                let local = *local;
                let _ = ack.send(JoinAck::Ready(local));
                self.drain(id, serial);
            }
            ListenerState::Binding { waiters } => {
                waiters.push(Waiter {
                    worker: id,
                    serial,
                    ack,
                });
            }
            ListenerState::Closed => {
                self.listener = ListenerState::Binding {
                    waiters: vec![Waiter {
                        worker: id,
                        serial,
                        ack,
                    }],
                };
                self.start_bind();
            }
        }
        Ok(())
    }

    /// Remove a worker from the group.
    ///
    /// When the last worker leaves, every queued connection and the listener
    /// are closed. Safe while a handoff to this worker is outstanding: its
    /// reply will no longer match a registration and only the returned
    /// handle (if any) is dealt with.
    pub fn leave(&mut self, worker: WorkerId) -> Departure {
        let Some(member) = self.registry.remove(worker) else {
            return Departure::NotMember;
        };
        if let ListenerState::Binding { waiters } = &mut self.listener {
            // Dropping the ack tells the joiner it was cancelled.
            waiters.retain(|w| w.worker != worker);
        }
        info!(group = %self.key, %worker, state = ?member.state, "worker left group");

        if !self.registry.is_empty() {
            return Departure::Removed;
        }
        self.teardown();
        Departure::TornDown
    }

    /// Queue a freshly accepted connection and wake the longest-idle worker.
    pub fn on_accepted(&mut self, handle: E::Handle) {
        if self.registry.is_empty() {
            debug!(group = %self.key, "no workers, closing accepted connection");
            handle.close();
            return;
        }
        self.pending.push_back(handle);
        self.wake_idle();
    }

    /// Remove every worker and tear the group down.
    pub fn shutdown(&mut self) {
        let removed = self.registry.clear();
        if let ListenerState::Binding { waiters } = &mut self.listener {
            waiters.clear();
        }
        if !removed.is_empty() {
            info!(group = %self.key, workers = removed.len(), "shutting down group");
        }
        self.teardown();
    }

    /// Apply a continuation event.
    pub fn handle_event(&mut self, event: Event<E::Handle, E::Listener>) {
        match event {
            Event::Bound {
                generation, result, ..
            } => self.on_bound(generation, result),
            Event::Accepted {
                generation, handle, ..
            } => {
                if generation != self.generation
                    || !matches!(self.listener, ListenerState::Open { .. })
                {
                    debug!(group = %self.key, generation, "connection from a closed listener");
                    handle.close();
                    return;
                }
                self.on_accepted(handle);
            }
            Event::Replied {
                worker,
                serial,
                outcome,
                ..
            } => self.on_replied(worker, serial, outcome),
        }
    }

    fn start_bind(&mut self) {
        let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
        self.generation = generation;

        let sink_events = self.events.clone();
        let sink_spec = self.spec.clone();
        let sink = ConnectionSink::new(move |handle| {
            match sink_events.send(Event::Accepted {
                spec: sink_spec.clone(),
                generation,
                handle,
            }) {
                Ok(()) => Ok(()),
                Err(mpsc::error::SendError(Event::Accepted { handle, .. })) => Err(handle),
                Err(_) => Ok(()),
            }
        });

        debug!(group = %self.key, generation, "binding listener");
        let bind = self.endpoint.bind(sink);
        let events = self.events.clone();
        let spec = self.spec.clone();
        tokio::spawn(async move {
            let result = bind.await;
            if let Err(mpsc::error::SendError(event)) = events.send(Event::Bound {
                spec,
                generation,
                result,
            }) {
                event.discard();
            }
        });
    }

    fn on_bound(&mut self, generation: u64, result: io::Result<E::Listener>) {
        let waiters = match std::mem::replace(&mut self.listener, ListenerState::Closed) {
            ListenerState::Binding { waiters } if generation == self.generation => waiters,
            other => {
                self.listener = other;
                if let Ok(listener) = result {
                    debug!(group = %self.key, generation, "closing listener from abandoned bind");
                    listener.close();
                }
                return;
            }
        };

        match result {
            Ok(listener) => {
                let local = listener.local_address();
                self.listener = ListenerState::Open { listener, local };
                info!(group = %self.key, %local, joiners = waiters.len(), "listener ready");

                for waiter in waiters {
                    if !self.registry.is_current(waiter.worker, waiter.serial) {
                        continue;
                    }
                    let _ = waiter.ack.send(JoinAck::Ready(local));
                    self.drain(waiter.worker, waiter.serial);
                }
            }
            Err(err) => {
                let code = bind_error_code(&err);
                warn!(
                    group = %self.key,
                    error = %err,
                    code,
                    name = code_name(code),
                    joiners = waiters.len(),
                    "listener bind failed"
                );
                for waiter in waiters {
                    self.registry.remove(waiter.worker);
                    let _ = waiter.ack.send(JoinAck::Failed(code));
                }
            }
        }
    }

    fn on_replied(&mut self, worker: WorkerId, serial: u64, outcome: Handoff<E::Handle>) {
        let current = self.registry.is_current(worker, serial);

        match outcome {
            Handoff::Accepted { retained } => {
                if let Some(local) = retained {
                    local.close();
                }
                debug!(group = %self.key, %worker, "connection handed off");
                self.drain(worker, serial);
            }
            Handoff::Refused(handle) => {
                debug!(group = %self.key, %worker, "connection refused, requeueing");
                self.requeue(handle);
                self.drain(worker, serial);
            }
            Handoff::Disconnected(returned) => {
                match returned {
                    Some(handle) => {
                        warn!(group = %self.key, %worker, "control channel closed mid-handoff, requeueing");
                        self.requeue(handle);
                    }
                    None => {
                        warn!(group = %self.key, %worker, "control channel closed mid-handoff, connection lost");
                    }
                }
                if current {
                    self.registry.set_state(worker, DrainState::Stalled);
                }
            }
        }
    }

    /// Put a returned connection back at the tail, unless the group was torn
    /// down while it was out.
    fn requeue(&mut self, handle: E::Handle) {
        if self.registry.is_empty() {
            debug!(group = %self.key, "group gone, closing returned connection");
            handle.close();
            return;
        }
        self.pending.push_back(handle);
        self.wake_idle();
    }

    fn wake_idle(&mut self) {
        if let Some((worker, serial)) = self.registry.pop_free() {
            self.drain(worker, serial);
        }
    }

    /// One step of the drain loop for `worker`.
    ///
    /// Either parks the worker in the free list or offers it the oldest
    /// pending connection. The loop continues in `on_replied`.
    fn drain(&mut self, worker: WorkerId, serial: u64) {
        if !self.registry.is_current(worker, serial) {
            return;
        }
        let Some(handle) = self.pending.pop_front() else {
            self.registry.push_free(worker);
            return;
        };
        let Some(channel) = self.registry.begin_offer(worker) else {
            self.pending.push_front(handle);
            return;
        };

        let request = DeliverRequest {
            group_key: self.key.clone(),
        };
        let offer = channel.deliver(request, handle);
        debug!(group = %self.key, %worker, pending = self.pending.len(), "offering connection");

        let events = self.events.clone();
        let spec = self.spec.clone();
        tokio::spawn(async move {
            let outcome = offer.await;
            if let Err(mpsc::error::SendError(event)) = events.send(Event::Replied {
                spec,
                worker,
                serial,
                outcome,
            }) {
                event.discard();
            }
        });
    }

    fn teardown(&mut self) {
        let closed = self.pending.close_all();
        match std::mem::replace(&mut self.listener, ListenerState::Closed) {
            ListenerState::Open { listener, local } => {
                listener.close();
                info!(group = %self.key, %local, closed_connections = closed, "group torn down");
            }
            ListenerState::Binding { .. } => {
                info!(group = %self.key, "group torn down while binding");
            }
            ListenerState::Closed => {}
        }
    }
}
