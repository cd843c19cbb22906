//! Shared types used across Handoff crates.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Stable identity of a worker for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub u32);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

impl From<u32> for WorkerId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Kind of listening endpoint a group shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressKind {
    Tcp4,
    Tcp6,
    /// Filesystem path (Unix domain socket). Has no address/port.
    Pipe,
}

impl AddressKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressKind::Tcp4 => "tcp4",
            AddressKind::Tcp6 => "tcp6",
            AddressKind::Pipe => "pipe",
        }
    }

    pub fn is_addressable(&self) -> bool {
        !matches!(self, AddressKind::Pipe)
    }
}

/// What a group of workers asked to listen on.
///
/// Two joins with equal specs share one listener and one distributor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenSpec {
    /// IP address, or socket path for `AddressKind::Pipe`.
    pub address: String,
    #[serde(default)]
    pub port: u16,
    pub kind: AddressKind,
}

impl ListenSpec {
    pub fn tcp(address: impl Into<String>, port: u16) -> Self {
        let address = address.into();
        let kind = if address.contains(':') {
            AddressKind::Tcp6
        } else {
            AddressKind::Tcp4
        };
        Self {
            address,
            port,
            kind,
        }
    }

    pub fn pipe(path: impl Into<String>) -> Self {
        Self {
            address: path.into(),
            port: 0,
            kind: AddressKind::Pipe,
        }
    }

    /// The group key carried in every deliver request.
    pub fn group_key(&self) -> GroupKey {
        GroupKey(format!("{}:{}:{}", self.address, self.port, self.kind.as_str()))
    }
}

/// String key identifying one shared listener, e.g. `127.0.0.1:8080:tcp4`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupKey(String);

impl GroupKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the shared listener ended up bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalAddress {
    Inet(SocketAddr),
    /// Handle-based endpoints (pipes) have no address to report.
    Unaddressable,
}

impl LocalAddress {
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            LocalAddress::Inet(addr) => Some(*addr),
            LocalAddress::Unaddressable => None,
        }
    }
}

impl fmt::Display for LocalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalAddress::Inet(addr) => write!(f, "{addr}"),
            LocalAddress::Unaddressable => f.write_str("<unaddressable>"),
        }
    }
}

/// Result delivered to a joiner once the shared listener is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinAck {
    Ready(LocalAddress),
    /// Bind failed; the code comes from [`crate::errno::bind_error_code`].
    Failed(i32),
}

impl JoinAck {
    pub fn is_ready(&self) -> bool {
        matches!(self, JoinAck::Ready(_))
    }
}
