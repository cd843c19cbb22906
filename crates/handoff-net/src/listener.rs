//! TCP and Unix-socket listening endpoints.
//!
//! Binding spawns an accept loop that pushes every accepted stream into the
//! distributor's sink. Closing the listener aborts the loop, which drops
//! the socket (and unlinks the socket file for pipes).

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use handoff_core::{AddressKind, ListenSpec, LocalAddress};
use handoff_distributor::{
    BoxFuture, ConnectionSink, EndpointFactory, ListeningEndpoint, ListeningHandle,
    TransferableHandle,
};

/// Pause after a failed accept (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// One accepted stream.
#[derive(Debug)]
pub enum Connection {
    Tcp { stream: TcpStream, peer: SocketAddr },
    #[cfg(unix)]
    Unix { stream: tokio::net::UnixStream },
}

impl Connection {
    pub fn peer(&self) -> Option<SocketAddr> {
        match self {
            Connection::Tcp { peer, .. } => Some(*peer),
            #[cfg(unix)]
            Connection::Unix { .. } => None,
        }
    }
}

impl TransferableHandle for Connection {
    fn close(self) {
        drop(self);
    }
}

/// A bound listener and the task accepting on it.
#[derive(Debug)]
pub struct AcceptLoop {
    local: LocalAddress,
    task: JoinHandle<()>,
    socket_path: Option<PathBuf>,
}

impl ListeningHandle for AcceptLoop {
    fn local_address(&self) -> LocalAddress {
        self.local
    }

    fn close(self) {
        self.task.abort();
        if let Some(path) = self.socket_path {
            if let Err(err) = std::fs::remove_file(&path) {
                debug!(path = %path.display(), error = %err, "could not remove socket file");
            }
        }
        info!(local = %self.local, "listener closed");
    }
}

/// Listens on whatever a [`ListenSpec`] describes.
#[derive(Debug, Clone)]
pub struct NetEndpoint {
    spec: ListenSpec,
}

impl NetEndpoint {
    pub fn new(spec: ListenSpec) -> Self {
        Self { spec }
    }
}

impl ListeningEndpoint for NetEndpoint {
    type Handle = Connection;
    type Listener = AcceptLoop;

    fn bind(&mut self, sink: ConnectionSink<Connection>) -> BoxFuture<io::Result<AcceptLoop>> {
        let spec = self.spec.clone();
        Box::pin(async move {
            match spec.kind {
                AddressKind::Tcp4 | AddressKind::Tcp6 => bind_tcp(&spec, sink).await,
                AddressKind::Pipe => bind_unix(&spec, sink).await,
            }
        })
    }
}

/// Creates a [`NetEndpoint`] per listen spec.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetEndpointFactory;

impl EndpointFactory for NetEndpointFactory {
    type Endpoint = NetEndpoint;

    fn endpoint(&self, spec: &ListenSpec) -> NetEndpoint {
        NetEndpoint::new(spec.clone())
    }
}

async fn bind_tcp(spec: &ListenSpec, sink: ConnectionSink<Connection>) -> io::Result<AcceptLoop> {
    let ip: IpAddr = spec.address.parse().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid listen address: {}", spec.address),
        )
    })?;
    let listener = TcpListener::bind(SocketAddr::new(ip, spec.port)).await?;
    let local = listener.local_addr()?;
    debug!(%local, "tcp listener bound");

    let task = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    if let Err(conn) = sink.push(Connection::Tcp { stream, peer }) {
                        conn.close();
                        break;
                    }
                }
                Err(err) => {
                    warn!(%local, error = %err, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    });

    Ok(AcceptLoop {
        local: LocalAddress::Inet(local),
        task,
        socket_path: None,
    })
}

#[cfg(unix)]
async fn bind_unix(spec: &ListenSpec, sink: ConnectionSink<Connection>) -> io::Result<AcceptLoop> {
    let path = PathBuf::from(&spec.address);
    let listener = tokio::net::UnixListener::bind(&path)?;
    debug!(path = %path.display(), "unix listener bound");

    let task = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    if let Err(conn) = sink.push(Connection::Unix { stream }) {
                        conn.close();
                        break;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    });

    Ok(AcceptLoop {
        local: LocalAddress::Unaddressable,
        task,
        socket_path: Some(path),
    })
}

#[cfg(not(unix))]
async fn bind_unix(_spec: &ListenSpec, _sink: ConnectionSink<Connection>) -> io::Result<AcceptLoop> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "pipe listeners need unix domain sockets",
    ))
}
