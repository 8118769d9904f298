//! # Transport Layer
//!
//! Async TCP connection layer. Moves byte buffers and connection ids only;
//! framing and decoding belong to the caller.
//!
//! ## Components
//! - **Connection**: ids with slot generations, connect/receive events
//! - **TCP**: listener, admission limits, per-connection reader/writer tasks
//!
//! ## Usage
//! ```rust,no_run
//! use realm_core::transport::{ConnEventKind, TcpServer};
//! use realm_core::utils::RingBuffer;
//!
//! # async fn run() -> realm_core::error::Result<()> {
//! let server = TcpServer::create("127.0.0.1", 7777, 64)?;
//! server.spawn_tasks(&tokio::runtime::Handle::current())?;
//!
//! let mut events = Vec::new();
//! server.poll_conn(&mut events, 32);
//! for event in server.poll_recv() {
//!     let mut reply = RingBuffer::new(event.len());
//!     reply.write(&event.data);
//!     server.consume_send(event.id, reply);
//!     server.free_recv(event);
//! }
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod tcp;

pub use connection::{ConnEvent, ConnEventKind, ConnectionId, RecvEvent};
pub use tcp::TcpServer;
