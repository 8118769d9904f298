//! # Packet Codec
//!
//! Schema-driven binary messages with bit-flag encoded optional fields.
//!
//! A schema is defined once; messages are encoded into pre-sized buffers
//! without allocation and decoded into zero-copy views over the input.
//!
//! ## Components
//! - **Field / Schema**: field types, flag word widths, schema definition
//! - **Message**: builder-over-optionals encoder
//! - **Decoded**: bounds-checked, borrowing decoder output
//! - **Codec**: Tokio framing for top-level messages over byte streams
//!
//! ## Wire Format
//! ```text
//! Top-level: [0xD6] [Length:u16] [Type:u8] [Flags:u8] [Owner:u32] [Tick:u32] [FlagWord:1|2|4] [Fields...] [0x6B]
//! Nested:    [Length:u16] [FlagWord:1|2|4] [Fields...]
//! Block:     [Len:u16] [Bytes]
//! Array:     [Count:u8] ([Len:u16] [Nested body])*
//! ```
//! All integers are little-endian.
//!
//! ## Security
//! - Decode never reads past the declared or actual end of the buffer
//! - Guard bytes only detect desynchronisation; bounds checks are the trust boundary
//! - Malformed input is dropped without any response

pub mod codec;
pub mod decoded;
pub mod field;
pub mod message;
pub mod schema;

pub use codec::{drain_frames, PacketFramer};
pub use decoded::{Decoded, PacketIter};
pub use field::{FieldSpec, FieldType, FlagWidth};
pub use message::{FieldValue, Message, Scalar};
pub use schema::{
    Header, Schema, SchemaBuilder, FRONT_GUARD_BYTE, HEADER_LEN, LENGTH_PREFIX_LEN, MAX_FIELDS,
    MAX_PACKET_SIZE, REAR_GUARD_BYTE,
};
