//! Connection ids and the events the server hands to the simulation.

use std::fmt;
use std::net::SocketAddr;

use bytes::BytesMut;

/// Stable connection id.
///
/// The low 32 bits select a slot in the connection table, the high 32 bits
/// are the slot's generation. A slot's generation is bumped when its
/// connection is released, so an id outliving its connection never reaches
/// the slot's next occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(slot: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | slot as u64)
    }

    pub fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn slot(self) -> u32 {
        self.0 as u32
    }

    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.slot(), self.generation())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnEventKind {
    Connected,
    Disconnected,
}

/// Connect or disconnect notification from [`poll_conn`].
///
/// [`poll_conn`]: crate::transport::TcpServer::poll_conn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnEvent {
    pub id: ConnectionId,
    pub addr: SocketAddr,
    pub kind: ConnEventKind,
}

/// Bytes read from one connection in one read.
///
/// Return it with [`free_recv`] once processed so the buffer is reused.
///
/// [`free_recv`]: crate::transport::TcpServer::free_recv
#[derive(Debug)]
pub struct RecvEvent {
    pub id: ConnectionId,
    pub data: BytesMut,
}

impl RecvEvent {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
