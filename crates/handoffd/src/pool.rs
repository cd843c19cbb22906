//! In-process worker pool.
//!
//! Every worker joins the same group and answers each connection it is
//! handed with its banner.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use handoff_core::{ListenSpec, LocalAddress, WorkerId};
use handoff_distributor::{CoordinatorHandle, Worker};
use handoff_net::{Connection, LocalChannel, WorkerInbox, local_channel};

pub const DEFAULT_BANNER: &str = "hello from {id}\n";

pub type Coordinator = CoordinatorHandle<LocalChannel<Connection>>;

pub struct WorkerPool {
    coordinator: Coordinator,
    spec: ListenSpec,
    workers: Vec<(WorkerId, JoinHandle<()>)>,
}

impl WorkerPool {
    /// Start `count` workers on `spec`. Returns once the shared listener is
    /// bound.
    pub async fn start(
        coordinator: Coordinator,
        spec: ListenSpec,
        count: u32,
        banner: Option<String>,
    ) -> anyhow::Result<(Self, LocalAddress)> {
        let banner = banner.unwrap_or_else(|| DEFAULT_BANNER.to_string());
        let mut pool = WorkerPool {
            coordinator,
            spec,
            workers: Vec::with_capacity(count as usize),
        };
        let mut local = LocalAddress::Unaddressable;

        for n in 1..=count {
            let id = WorkerId(n);
            let (channel, inbox) = local_channel();
            let task = tokio::spawn(serve(id, inbox, render(&banner, id)));
            pool.workers.push((id, task));

            match pool.coordinator.join(pool.spec.clone(), Worker::new(id, channel)).await {
                Ok(addr) => local = addr,
                Err(err) => {
                    pool.stop().await;
                    return Err(err.into());
                }
            }
        }

        info!(group = %pool.spec.group_key(), workers = count, "worker pool started");
        Ok((pool, local))
    }

    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.workers.iter().map(|(id, _)| *id).collect()
    }

    /// Leave the group and stop every worker.
    pub async fn stop(self) {
        for (id, task) in self.workers {
            if let Err(err) = self.coordinator.leave(self.spec.clone(), id).await {
                warn!(worker = %id, error = %err, "leave failed");
            }
            task.abort();
        }
        info!(group = %self.spec.group_key(), "worker pool stopped");
    }
}

fn render(banner: &str, id: WorkerId) -> String {
    banner.replace("{id}", &id.0.to_string())
}

async fn serve(id: WorkerId, mut inbox: WorkerInbox<Connection>, banner: String) {
    while let Some(delivery) = inbox.recv().await {
        let connection = delivery.accept();
        debug!(worker = %id, peer = ?connection.peer(), "connection accepted");
        let banner = banner.clone();
        tokio::spawn(async move {
            let result = match connection {
                Connection::Tcp { stream, .. } => greet(stream, &banner).await,
                #[cfg(unix)]
                Connection::Unix { stream } => greet(stream, &banner).await,
            };
            if let Err(err) = result {
                debug!(worker = %id, error = %err, "client went away");
            }
        });
    }
    debug!(worker = %id, "inbox closed");
}

async fn greet<S: AsyncWrite + Unpin>(mut stream: S, banner: &str) -> std::io::Result<()> {
    stream.write_all(banner.as_bytes()).await?;
    stream.shutdown().await
}
