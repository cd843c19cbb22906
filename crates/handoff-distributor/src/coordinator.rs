//! The single task that owns every group's distributor.
//!
//! Callers talk to it through a cloneable [`CoordinatorHandle`]. Commands
//! and the distributors' continuation events are processed one at a time on
//! the coordinator task, so no distributor is ever touched concurrently.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use handoff_core::{GroupKey, JoinAck, ListenSpec, LocalAddress, WorkerId};

use crate::channel::ControlChannel;
use crate::distributor::{Departure, Distributor, DistributorStats, Event, Worker};
use crate::endpoint::{EndpointFactory, ListeningEndpoint};
use crate::error::{DistributorError, DistributorResult};

type HandleOf<F> = <<F as EndpointFactory>::Endpoint as ListeningEndpoint>::Handle;
type ListenerOf<F> = <<F as EndpointFactory>::Endpoint as ListeningEndpoint>::Listener;

const COMMAND_QUEUE: usize = 256;

enum Command<C> {
    Join {
        spec: ListenSpec,
        worker: Worker<C>,
        registered: oneshot::Sender<DistributorResult<()>>,
        ack: oneshot::Sender<JoinAck>,
    },
    Leave {
        spec: ListenSpec,
        worker: WorkerId,
        reply: oneshot::Sender<Departure>,
    },
    RemoveWorker {
        worker: WorkerId,
        reply: oneshot::Sender<usize>,
    },
    Stats {
        reply: oneshot::Sender<Vec<(GroupKey, DistributorStats)>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Owns one [`Distributor`] per listen spec.
pub struct Coordinator<F: EndpointFactory, C> {
    factory: F,
    groups: HashMap<ListenSpec, Distributor<F::Endpoint, C>>,
    commands: mpsc::Receiver<Command<C>>,
    events_tx: mpsc::UnboundedSender<Event<HandleOf<F>, ListenerOf<F>>>,
    events_rx: mpsc::UnboundedReceiver<Event<HandleOf<F>, ListenerOf<F>>>,
}

impl<F, C> Coordinator<F, C>
where
    F: EndpointFactory,
    C: ControlChannel<HandleOf<F>>,
{
    /// Start the coordinator task.
    pub fn spawn(factory: F) -> (CoordinatorHandle<C>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let coordinator = Coordinator {
            factory,
            groups: HashMap::new(),
            commands: rx,
            events_tx,
            events_rx,
        };
        let task = tokio::spawn(coordinator.run());
        (CoordinatorHandle { tx }, task)
    }

    async fn run(mut self) {
        debug!("coordinator started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event),
            }
        }
        info!("coordinator stopped");
    }

    fn handle_command(&mut self, command: Command<C>) {
        match command {
            Command::Join {
                spec,
                worker,
                registered,
                ack,
            } => {
                let factory = &self.factory;
                let events = &self.events_tx;
                let group = self.groups.entry(spec.clone()).or_insert_with(|| {
                    debug!(group = %spec.group_key(), "creating group");
                    Distributor::new(spec.clone(), factory.endpoint(&spec), events.clone())
                });
                let _ = registered.send(group.join(worker, ack));
                self.forget_if_idle(&spec);
            }
            Command::Leave {
                spec,
                worker,
                reply,
            } => {
                let departure = match self.groups.get_mut(&spec) {
                    Some(group) => group.leave(worker),
                    None => Departure::NotMember,
                };
                self.forget_if_idle(&spec);
                let _ = reply.send(departure);
            }
            Command::RemoveWorker { worker, reply } => {
                let mut left = 0;
                for group in self.groups.values_mut() {
                    if group.leave(worker).removed() {
                        left += 1;
                    }
                }
                self.groups.retain(|_, group| !group.is_idle());
                if left > 0 {
                    info!(%worker, groups = left, "worker removed from all groups");
                }
                let _ = reply.send(left);
            }
            Command::Stats { reply } => {
                let mut stats: Vec<_> = self
                    .groups
                    .values()
                    .map(|group| (group.key().clone(), group.stats()))
                    .collect();
                stats.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
                let _ = reply.send(stats);
            }
            Command::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
            }
        }
    }

    fn handle_event(&mut self, event: Event<HandleOf<F>, ListenerOf<F>>) {
        let spec = event.spec().clone();
        match self.groups.get_mut(&spec) {
            Some(group) => {
                group.handle_event(event);
                self.forget_if_idle(&spec);
            }
            None => {
                debug!(group = %spec.group_key(), "event for a group that no longer exists");
                event.discard();
            }
        }
    }

    /// Drop a group once it has no workers and nothing open.
    fn forget_if_idle(&mut self, spec: &ListenSpec) {
        if self.groups.get(spec).is_some_and(|group| group.is_idle()) {
            self.groups.remove(spec);
            debug!(group = %spec.group_key(), "group removed");
        }
    }

    fn shutdown(&mut self) {
        for (_, mut group) in self.groups.drain() {
            group.shutdown();
        }
    }
}

/// Cloneable handle used by the supervisor to manage membership.
pub struct CoordinatorHandle<C> {
    tx: mpsc::Sender<Command<C>>,
}

impl<C> Clone for CoordinatorHandle<C> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<C: Send + 'static> CoordinatorHandle<C> {
    /// Join `worker` to the group listening on `spec` and wait until the
    /// shared listener is ready.
    pub async fn join(&self, spec: ListenSpec, worker: Worker<C>) -> DistributorResult<LocalAddress> {
        let (registered_tx, registered_rx) = oneshot::channel();
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(Command::Join {
            spec,
            worker,
            registered: registered_tx,
            ack: ack_tx,
        })
        .await?;
        registered_rx
            .await
            .map_err(|_| DistributorError::CoordinatorClosed)??;

        match ack_rx.await {
            Ok(JoinAck::Ready(local)) => Ok(local),
            Ok(JoinAck::Failed(code)) => Err(DistributorError::BindFailed { code }),
            Err(_) => Err(DistributorError::Cancelled),
        }
    }

    /// Remove `worker` from the group on `spec`. Returns whether it was a
    /// member.
    pub async fn leave(&self, spec: ListenSpec, worker: WorkerId) -> DistributorResult<bool> {
        Ok(self.leave_group(spec, worker).await?.removed())
    }

    /// Like [`leave`](Self::leave) but reports whether the group was torn
    /// down.
    pub async fn leave_group(&self, spec: ListenSpec, worker: WorkerId) -> DistributorResult<Departure> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Leave {
            spec,
            worker,
            reply,
        })
        .await?;
        rx.await.map_err(|_| DistributorError::CoordinatorClosed)
    }

    /// Remove `worker` from every group, e.g. after it exited. Returns the
    /// number of groups it was in.
    pub async fn remove_worker(&self, worker: WorkerId) -> DistributorResult<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::RemoveWorker { worker, reply }).await?;
        rx.await.map_err(|_| DistributorError::CoordinatorClosed)
    }

    /// Stats for every live group, ordered by group key.
    pub async fn stats(&self) -> DistributorResult<Vec<(GroupKey, DistributorStats)>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply }).await?;
        rx.await.map_err(|_| DistributorError::CoordinatorClosed)
    }

    /// Tear down every group and stop the coordinator task.
    pub async fn shutdown(&self) -> DistributorResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply }).await?;
        rx.await.map_err(|_| DistributorError::CoordinatorClosed)
    }

    async fn send(&self, command: Command<C>) -> DistributorResult<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| DistributorError::CoordinatorClosed)
    }
}
