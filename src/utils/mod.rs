//! # Utility Modules
//!
//! Supporting pieces shared by the codec and the connection layer.
//!
//! ## Components
//! - **Buffer Pool**: reusable fixed-capacity encode buffers
//! - **Ring Buffer**: fixed-capacity byte FIFO for outbound data
//! - **Logging**: `tracing-subscriber` setup from [`LoggingConfig`](crate::config::LoggingConfig)
//! - **Metrics**: atomic connection-layer counters

pub mod buffer_pool;
pub mod logging;
pub mod metrics;
pub mod ring_buffer;

pub use buffer_pool::{PacketBufferPool, PooledBuffer};
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use ring_buffer::RingBuffer;
