//! # TCP Server
//!
//! Async accept/read/write on tokio, exposed to the simulation as pollable
//! event batches.
//!
//! I/O runs on runtime worker tasks. The simulation thread crosses into it
//! only through `poll_conn`, `poll_recv`, `free_recv`, `consume_send` and
//! `disconnect`, which never block on I/O.
//!
//! ## Connection tasks
//! Each accepted socket gets one task that joins a reader and a writer. The
//! reader pushes every read as a [`RecvEvent`] onto one server-wide queue.
//! The writer drains the ring buffers handed over by `consume_send`. Either
//! half ending cancels the other; the slot is then released and a
//! DISCONNECTED event is queued.

use std::collections::VecDeque;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::ServerConfig;
use crate::error::{CoreError, Result};
use crate::transport::connection::{ConnEvent, ConnEventKind, ConnectionId, RecvEvent};
use crate::utils::metrics::ServerMetrics;
use crate::utils::ring_buffer::RingBuffer;

struct Live {
    addr: SocketAddr,
    send_tx: mpsc::Sender<RingBuffer>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Slot {
    generation: u32,
    conn: Option<Live>,
}

struct Shared {
    config: ServerConfig,
    slots: Mutex<Vec<Slot>>,
    conn_events: Mutex<VecDeque<ConnEvent>>,
    recv_events: Mutex<Vec<RecvEvent>>,
    freelist: Mutex<Vec<BytesMut>>,
    metrics: ServerMetrics,
    shutdown: CancellationToken,
}

impl Shared {
    fn push_conn_event(&self, event: ConnEvent) {
        self.conn_events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(event);
    }

    fn recv_buffer(&self) -> BytesMut {
        let size = self.config.recv_buffer_size;
        match self
            .freelist
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
        {
            Some(mut buf) => {
                buf.clear();
                buf.reserve(size);
                buf
            }
            None => BytesMut::with_capacity(size),
        }
    }

    /// Claim a slot for `addr`, or `None` when admission limits are hit.
    fn admit(&self, addr: SocketAddr) -> Option<(ConnectionId, mpsc::Receiver<RingBuffer>, CancellationToken)> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let per_ip = self.config.max_connections_per_ip;
        if per_ip > 0 {
            let same_ip = slots
                .iter()
                .filter_map(|s| s.conn.as_ref())
                .filter(|c| c.addr.ip() == addr.ip())
                .count();
            if same_ip >= per_ip {
                debug!(%addr, same_ip, "Per-IP connection limit reached");
                return None;
            }
        }
        let Some(index) = slots.iter().position(|s| s.conn.is_none()) else {
            debug!(%addr, "Connection table full");
            return None;
        };

        let (send_tx, send_rx) = mpsc::channel(self.config.send_queue_depth.max(1));
        let cancel = self.shutdown.child_token();
        let slot = &mut slots[index];
        slot.conn = Some(Live {
            addr,
            send_tx,
            cancel: cancel.clone(),
        });
        let id = ConnectionId::new(index as u32, slot.generation);
        // Queued under the slot lock so it always precedes this id's
        // DISCONNECTED event.
        self.push_conn_event(ConnEvent {
            id,
            addr,
            kind: ConnEventKind::Connected,
        });
        Some((id, send_rx, cancel))
    }

    fn release(&self, id: ConnectionId) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(slot) = slots.get_mut(id.slot() as usize) else {
            return;
        };
        if slot.generation != id.generation() {
            return;
        }
        if let Some(live) = slot.conn.take() {
            slot.generation = slot.generation.wrapping_add(1);
            self.metrics.connection_closed();
            self.push_conn_event(ConnEvent {
                id,
                addr: live.addr,
                kind: ConnEventKind::Disconnected,
            });
            debug!(%id, addr = %live.addr, "Connection released");
        }
    }

    /// Run `f` on the live connection behind `id`, if it is still current.
    fn with_live<R>(&self, id: ConnectionId, f: impl FnOnce(&Live) -> R) -> Option<R> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.get(id.slot() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.conn.as_ref().map(f)
    }
}

/// Async TCP server with pollable connection and receive queues.
pub struct TcpServer {
    shared: Arc<Shared>,
    listener: Mutex<Option<std::net::TcpListener>>,
    local_addr: SocketAddr,
}

impl TcpServer {
    /// Bind `addr:port` with a table of `max_connections` slots.
    pub fn create(addr: &str, port: u16, max_connections: u32) -> Result<Self> {
        let defaults = ServerConfig::default();
        let config = ServerConfig {
            address: addr.to_string(),
            port,
            max_connections: max_connections as usize,
            max_connections_per_ip: defaults
                .max_connections_per_ip
                .min(max_connections as usize),
            ..defaults
        };
        Self::from_config(&config)
    }

    /// Bind using every setting in `config`.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(CoreError::ConfigError(errors.join("; ")));
        }
        let ip: IpAddr = config
            .address
            .parse()
            .map_err(|_| CoreError::ConfigError(format!("Invalid address: {}", config.address)))?;
        let listener = std::net::TcpListener::bind(SocketAddr::new(ip, config.port))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let slots = (0..config.max_connections).map(|_| Slot::default()).collect();
        info!(%local_addr, max_connections = config.max_connections, "TCP server bound");

        Ok(Self {
            shared: Arc::new(Shared {
                config: config.clone(),
                slots: Mutex::new(slots),
                conn_events: Mutex::new(VecDeque::new()),
                recv_events: Mutex::new(Vec::new()),
                freelist: Mutex::new(Vec::new()),
                metrics: ServerMetrics::new(),
                shutdown: CancellationToken::new(),
            }),
            listener: Mutex::new(Some(listener)),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn metrics(&self) -> &ServerMetrics {
        &self.shared.metrics
    }

    /// Start the accept loop on `handle`. Connection tasks are spawned on
    /// the same runtime as they are accepted.
    pub fn spawn_tasks(&self, handle: &Handle) -> Result<()> {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| {
                CoreError::Io(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "server tasks already spawned",
                ))
            })?;
        let shared = self.shared.clone();
        handle.spawn(async move {
            match TcpListener::from_std(listener) {
                Ok(listener) => accept_loop(shared, listener).await,
                Err(e) => warn!(error = %e, "Failed to register listener"),
            }
        });
        Ok(())
    }

    /// Move up to `max` pending connection events into `out`.
    pub fn poll_conn(&self, out: &mut Vec<ConnEvent>, max: usize) -> usize {
        let mut events = self
            .shared
            .conn_events
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let count = events.len().min(max);
        out.extend(events.drain(..count));
        count
    }

    /// Take every pending receive event, oldest first.
    pub fn poll_recv(&self) -> Vec<RecvEvent> {
        std::mem::take(
            &mut *self
                .shared
                .recv_events
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Return a processed receive event's buffer for reuse.
    pub fn free_recv(&self, event: RecvEvent) {
        let mut freelist = self
            .shared
            .freelist
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if freelist.len() < self.shared.config.recv_freelist_limit {
            freelist.push(event.data);
        }
    }

    /// Hand `ring` to the connection's writer. The ring is dropped if the
    /// connection is gone; a full send queue disconnects the connection.
    pub fn consume_send(&self, id: ConnectionId, ring: RingBuffer) {
        if ring.is_empty() {
            return;
        }
        let outcome = self.shared.with_live(id, |live| {
            match live.send_tx.try_send(ring) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    live.cancel.cancel();
                    Err("send queue full")
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Err("connection closing"),
            }
        });
        match outcome {
            Some(Ok(())) => self.shared.metrics.send_queued(),
            Some(Err(reason)) => {
                self.shared.metrics.send_dropped();
                debug!(%id, reason, "Send dropped");
            }
            None => {
                self.shared.metrics.send_dropped();
                trace!(%id, "Send to stale connection dropped");
            }
        }
    }

    /// Request a close. A DISCONNECTED event follows for a current id.
    pub fn disconnect(&self, id: ConnectionId) {
        if self.shared.with_live(id, |live| live.cancel.cancel()).is_some() {
            debug!(%id, "Disconnect requested");
        }
    }

    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.shared.with_live(id, |_| ()).is_some()
    }

    pub fn connection_count(&self) -> usize {
        self.shared
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.conn.is_some())
            .count()
    }

    /// Stop accepting and close every connection.
    pub fn shutdown(&self) {
        if !self.shared.shutdown.is_cancelled() {
            info!(addr = %self.local_addr, "TCP server shutting down");
            self.shared.shutdown.cancel();
        }
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[instrument(skip_all, fields(addr = ?listener.local_addr().ok()))]
async fn accept_loop(shared: Arc<Shared>, listener: TcpListener) {
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => accept_one(&shared, stream, addr),
                Err(e) => {
                    shared.metrics.io_error();
                    warn!(error = %e, "Accept failed");
                    tokio::time::sleep(shared.config.accept_backoff).await;
                }
            }
        }
    }
    debug!("Accept loop stopped");
}

fn accept_one(shared: &Arc<Shared>, stream: TcpStream, addr: SocketAddr) {
    let Some((id, send_rx, cancel)) = shared.admit(addr) else {
        shared.metrics.connection_rejected();
        return;
    };
    shared.metrics.connection_accepted();
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%id, error = %e, "Failed to set TCP_NODELAY");
    }
    debug!(%id, %addr, "Connection accepted");
    tokio::spawn(connection_task(shared.clone(), id, stream, send_rx, cancel));
}

async fn connection_task(
    shared: Arc<Shared>,
    id: ConnectionId,
    stream: TcpStream,
    send_rx: mpsc::Receiver<RingBuffer>,
    cancel: CancellationToken,
) {
    let (reader, writer) = stream.into_split();
    tokio::join!(
        read_half(&shared, id, reader, &cancel),
        write_half(&shared, id, writer, send_rx, &cancel),
    );
    shared.release(id);
}

async fn read_half(shared: &Shared, id: ConnectionId, mut reader: OwnedReadHalf, cancel: &CancellationToken) {
    loop {
        let mut buf = shared.recv_buffer();
        tokio::select! {
            _ = cancel.cancelled() => break,
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) => {
                    trace!(%id, "Peer closed");
                    break;
                }
                Ok(n) => {
                    shared.metrics.received(n as u64);
                    shared
                        .recv_events
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(RecvEvent { id, data: buf });
                }
                Err(e) => {
                    shared.metrics.io_error();
                    debug!(%id, error = %e, "Read failed");
                    break;
                }
            }
        }
    }
    cancel.cancel();
}

async fn write_half(
    shared: &Shared,
    id: ConnectionId,
    mut writer: OwnedWriteHalf,
    mut send_rx: mpsc::Receiver<RingBuffer>,
    cancel: &CancellationToken,
) {
    loop {
        let mut ring = tokio::select! {
            _ = cancel.cancelled() => break,
            next = send_rx.recv() => match next {
                Some(ring) => ring,
                None => break,
            },
        };
        tokio::select! {
            _ = cancel.cancelled() => break,
            written = drain_ring(&mut writer, &mut ring) => match written {
                Ok(n) => shared.metrics.sent(n),
                Err(e) => {
                    shared.metrics.io_error();
                    debug!(%id, error = %e, "Write failed");
                    break;
                }
            }
        }
    }
    cancel.cancel();
    let _ = writer.shutdown().await;
}

/// Write the whole ring to the socket across as many writes as needed.
async fn drain_ring(writer: &mut OwnedWriteHalf, ring: &mut RingBuffer) -> io::Result<u64> {
    let mut total = 0u64;
    while !ring.is_empty() {
        let n = writer.write(ring.contiguous()).await?;
        if n == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
        ring.forward_read(n);
        total += n as u64;
    }
    Ok(total)
}
