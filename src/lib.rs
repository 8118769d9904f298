//! # realm-core
//!
//! Substrate for multiplayer game servers.
//!
//! ## Layers
//! - [`core`]: schema-driven binary packet codec with bit-flag optional fields
//! - [`module`]: named modules with lifecycle passes, callbacks, record
//!   attachments and persistence hooks
//! - [`transport`]: async TCP server exposing pollable connection and
//!   receive queues to a single simulation thread
//! - [`utils`]: ring buffers, encode buffer pool, metrics and logging setup
//!
//! ## Example
//! ```rust
//! use realm_core::core::{FieldType, Header, Message, Schema};
//!
//! let schema = Schema::define(1, &[(FieldType::UInt16, 1), (FieldType::Char, 16)]).unwrap();
//! let mut buf = [0u8; 64];
//! let len = Message::new(&schema)
//!     .with(0, 300u16)
//!     .encode_top_level(&mut buf, Header::new(5))
//!     .unwrap();
//!
//! let decoded = schema.decode_top_level(&buf[..len]).unwrap();
//! assert_eq!(decoded.get::<u16>(0), Some(300));
//! assert!(!decoded.is_present(1));
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod module;
pub mod transport;
pub mod utils;

pub use config::CoreConfig;
pub use error::{CoreError, Result};
