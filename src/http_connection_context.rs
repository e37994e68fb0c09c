use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::sync::mpsc;

/// Sender side of a connection's outbound queue. Handing a clone to the
/// worker registry is what lets other connections push dispatches to it.
pub type OutboundHandle = mpsc::Sender<Bytes>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// What a handler may know about the connection its request arrived on.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub outbound: OutboundHandle,
}

impl ConnectionContext {
    pub fn new(id: ConnectionId, peer: SocketAddr, outbound: OutboundHandle) -> Self {
        ConnectionContext { id, peer, outbound }
    }
}
