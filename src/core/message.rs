//! # Message Encoding
//!
//! [`Message`] pairs a [`Schema`] with optional field values. Fields that are
//! never set stay absent: their presence bit is clear and they occupy zero
//! bytes on the wire.
//!
//! Encoding is two-pass. [`Message::encoded_len`] sums the size of every
//! present field first; the copy pass then writes into a caller-provided
//! buffer that must already be large enough. The encoder never grows or
//! reallocates its output.
//!
//! ## Usage
//! ```rust
//! use realm_core::core::{FieldType, FieldValue, Header, Message, Schema};
//!
//! let schema = Schema::define(1, &[
//!     (FieldType::UInt8, 1),
//!     (FieldType::UInt32, 1),
//!     (FieldType::MemoryBlock, 1),
//! ]).unwrap();
//!
//! let mut buf = [0u8; 64];
//! let len = Message::new(&schema)
//!     .with(0, 3u8)
//!     .with(1, 77u32)
//!     .with(2, FieldValue::block(b"hello"))
//!     .encode_top_level(&mut buf, Header::new(1))
//!     .unwrap();
//! assert_eq!(len, 14 + 1 + 4 + 7 + 1);
//! ```

use crate::core::field::{FieldSpec, FieldType};
use crate::core::schema::{Header, Schema, LENGTH_PREFIX_LEN, MAX_FIELDS, MAX_PACKET_SIZE};
use crate::error::{constants, CoreError, Result};

/// Largest scalar stored inline in a [`FieldValue`].
const INLINE_CAPACITY: usize = 16;

/// A small fixed-width value held by value, already in wire byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inline {
    bytes: [u8; INLINE_CAPACITY],
    len: u8,
}

impl Inline {
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

/// Fixed-width Rust values that map onto wire scalars.
pub trait Scalar: Copy {
    const WIDTH: usize;

    /// Caller guarantees `bytes.len() >= Self::WIDTH`.
    fn from_le_slice(bytes: &[u8]) -> Self;

    fn write_le(self, out: &mut [u8]);
}

macro_rules! impl_scalar {
    ($($t:ty),*) => {
        $(
            impl Scalar for $t {
                const WIDTH: usize = std::mem::size_of::<$t>();

                #[inline]
                fn from_le_slice(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(&bytes[..Self::WIDTH]);
                    <$t>::from_le_bytes(raw)
                }

                #[inline]
                fn write_le(self, out: &mut [u8]) {
                    out[..Self::WIDTH].copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_scalar!(u8, i8, u16, i16, u32, i32, u64, i64, f32);

impl Scalar for [f32; 3] {
    const WIDTH: usize = 12;

    fn from_le_slice(bytes: &[u8]) -> Self {
        [
            f32::from_le_slice(&bytes[0..4]),
            f32::from_le_slice(&bytes[4..8]),
            f32::from_le_slice(&bytes[8..12]),
        ]
    }

    fn write_le(self, out: &mut [u8]) {
        for (i, v) in self.iter().enumerate() {
            v.write_le(&mut out[i * 4..]);
        }
    }
}

impl Scalar for [i16; 3] {
    const WIDTH: usize = 6;

    fn from_le_slice(bytes: &[u8]) -> Self {
        [
            i16::from_le_slice(&bytes[0..2]),
            i16::from_le_slice(&bytes[2..4]),
            i16::from_le_slice(&bytes[4..6]),
        ]
    }

    fn write_le(self, out: &mut [u8]) {
        for (i, v) in self.iter().enumerate() {
            v.write_le(&mut out[i * 2..]);
        }
    }
}

/// The value supplied for one present field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    /// A scalar converted from a Rust primitive. Must match the field size exactly.
    Inline(Inline),
    /// Pre-encoded fixed-width bytes. Shorter input is zero-padded.
    Raw(&'a [u8]),
    /// Opaque memory block, written as `[len:u16][bytes]`.
    Block(&'a [u8]),
    /// A complete nested message including its 2-byte length prefix.
    Packet(&'a [u8]),
    /// Nested messages for an array field. Empty means absent.
    PacketArray(&'a [&'a [u8]]),
}

impl<'a> FieldValue<'a> {
    pub fn scalar<T: Scalar>(value: T) -> Self {
        let mut bytes = [0u8; INLINE_CAPACITY];
        value.write_le(&mut bytes);
        FieldValue::Inline(Inline {
            bytes,
            len: T::WIDTH as u8,
        })
    }

    pub fn raw(bytes: &'a [u8]) -> Self {
        FieldValue::Raw(bytes)
    }

    pub fn block(bytes: &'a [u8]) -> Self {
        FieldValue::Block(bytes)
    }

    pub fn packet(encoded: &'a [u8]) -> Self {
        FieldValue::Packet(encoded)
    }

    pub fn packets(encoded: &'a [&'a [u8]]) -> Self {
        FieldValue::PacketArray(encoded)
    }
}

macro_rules! impl_from_scalar {
    ($($t:ty),*) => {
        $(
            impl From<$t> for FieldValue<'_> {
                fn from(value: $t) -> Self {
                    FieldValue::scalar(value)
                }
            }
        )*
    };
}

impl_from_scalar!(u8, i8, u16, i16, u32, i32, u64, i64, f32, [f32; 3], [i16; 3]);

impl<'a> From<&'a str> for FieldValue<'a> {
    fn from(value: &'a str) -> Self {
        FieldValue::Raw(value.as_bytes())
    }
}

/// Read the length prefix of a nested encoding and check it covers the slice.
fn sub_packet_len(field: usize, encoded: &[u8]) -> Result<usize> {
    if encoded.len() < LENGTH_PREFIX_LEN {
        return Err(CoreError::Encode {
            field,
            reason: constants::ERR_BAD_SUB_PACKET,
        });
    }
    let body = u16::from_le_bytes([encoded[0], encoded[1]]) as usize;
    if body + LENGTH_PREFIX_LEN != encoded.len() {
        return Err(CoreError::Encode {
            field,
            reason: constants::ERR_BAD_SUB_PACKET,
        });
    }
    Ok(encoded.len())
}

/// A message under construction.
#[derive(Debug, Clone)]
pub struct Message<'a> {
    schema: &'a Schema,
    values: [Option<FieldValue<'a>>; MAX_FIELDS],
    bad_index: Option<usize>,
}

impl<'a> Message<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self {
            schema,
            values: [None; MAX_FIELDS],
            bad_index: None,
        }
    }

    /// Supply a value for field `index`.
    pub fn set(&mut self, index: usize, value: impl Into<FieldValue<'a>>) -> &mut Self {
        if index < self.schema.len() {
            self.values[index] = Some(value.into());
        } else {
            self.bad_index.get_or_insert(index);
        }
        self
    }

    /// Supply a value only when one is available.
    pub fn set_opt<V: Into<FieldValue<'a>>>(&mut self, index: usize, value: Option<V>) -> &mut Self {
        match value {
            Some(v) => self.set(index, v),
            None => self.clear(index),
        }
    }

    /// Mark field `index` absent again.
    pub fn clear(&mut self, index: usize) -> &mut Self {
        if let Some(slot) = self.values.get_mut(index) {
            *slot = None;
        }
        self
    }

    /// Chaining form of [`Message::set`].
    pub fn with(mut self, index: usize, value: impl Into<FieldValue<'a>>) -> Self {
        self.set(index, value);
        self
    }

    #[inline]
    pub fn schema(&self) -> &'a Schema {
        self.schema
    }

    /// Size in bytes of field `index` if it is encoded, `None` if it is absent.
    fn field_len(&self, index: usize, spec: &FieldSpec) -> Result<Option<usize>> {
        let value = match self.values[index] {
            Some(v) => v,
            None => return Ok(None),
        };
        let mismatch = CoreError::Encode {
            field: index,
            reason: constants::ERR_VALUE_MISMATCH,
        };
        match (spec.ty, value) {
            (FieldType::MemoryBlock, FieldValue::Block(bytes)) => {
                if bytes.len() > u16::MAX as usize {
                    return Err(CoreError::Encode {
                        field: index,
                        reason: constants::ERR_VALUE_TOO_LONG,
                    });
                }
                Ok(Some(LENGTH_PREFIX_LEN + bytes.len()))
            }
            (FieldType::Packet, FieldValue::Packet(encoded)) if !spec.is_packet_array() => {
                sub_packet_len(index, encoded).map(Some)
            }
            (FieldType::Packet, FieldValue::Packet(encoded)) => {
                sub_packet_len(index, encoded).map(|len| Some(1 + len))
            }
            (FieldType::Packet, FieldValue::PacketArray(list)) if spec.is_packet_array() => {
                if list.is_empty() {
                    return Ok(None);
                }
                if list.len() > spec.count as usize || list.len() > u8::MAX as usize {
                    return Err(CoreError::Encode {
                        field: index,
                        reason: constants::ERR_ARRAY_TOO_LONG,
                    });
                }
                let mut total = 1;
                for encoded in list {
                    total += sub_packet_len(index, encoded)?;
                }
                Ok(Some(total))
            }
            (ty, FieldValue::Inline(inline)) if ty.is_fixed() => {
                if inline.len as usize != spec.fixed_len() {
                    return Err(mismatch);
                }
                Ok(Some(spec.fixed_len()))
            }
            (ty, FieldValue::Raw(bytes)) if ty.is_fixed() => {
                if bytes.len() > spec.fixed_len() {
                    return Err(CoreError::Encode {
                        field: index,
                        reason: constants::ERR_VALUE_TOO_LONG,
                    });
                }
                Ok(Some(spec.fixed_len()))
            }
            _ => Err(mismatch),
        }
    }

    /// Presence flags and summed size of all present fields.
    fn measure(&self) -> Result<(u32, usize)> {
        if let Some(index) = self.bad_index {
            return Err(CoreError::FieldOutOfRange(index));
        }
        let mut flags = 0u32;
        let mut total = 0usize;
        for (i, spec) in self.schema.fields().iter().enumerate() {
            if let Some(len) = self.field_len(i, spec)? {
                flags |= 1 << i;
                total += len;
            }
        }
        Ok((flags, total))
    }

    /// Exact size of the top-level encoding, header and rear guard included.
    pub fn encoded_len(&self) -> Result<usize> {
        let (_, body) = self.measure()?;
        Ok(self.schema.top_level_overhead() + body + 1)
    }

    /// Exact size of the nested encoding, length prefix included.
    pub fn nested_len(&self) -> Result<usize> {
        let (_, body) = self.measure()?;
        Ok(self.schema.nested_overhead() + body)
    }

    /// Encode as a top-level message. Returns the number of bytes written.
    pub fn encode_top_level(&self, buf: &mut [u8], header: Header) -> Result<usize> {
        let (flags, body) = self.measure()?;
        let overhead = self.schema.top_level_overhead();
        let total = overhead + body + 1;
        if total > MAX_PACKET_SIZE {
            return Err(CoreError::OversizedPacket(total));
        }
        if buf.len() < total {
            return Err(CoreError::BufferTooSmall {
                needed: total,
                available: buf.len(),
            });
        }

        header.write(buf, total as u16);
        self.schema.flag_width().write(&mut buf[overhead - self.schema.flag_width().bytes()..], flags);
        let end = self.write_fields(&mut buf[overhead..total - 1]);
        debug_assert_eq!(overhead + end, total - 1);
        buf[total - 1] = crate::core::schema::REAR_GUARD_BYTE;
        Ok(total)
    }

    /// Encode as a nested message (`[len:u16][flags][fields]`).
    /// Returns the number of bytes written, prefix included.
    pub fn encode_nested(&self, buf: &mut [u8]) -> Result<usize> {
        let (flags, body) = self.measure()?;
        let overhead = self.schema.nested_overhead();
        let total = overhead + body;
        if total - LENGTH_PREFIX_LEN > MAX_PACKET_SIZE {
            return Err(CoreError::OversizedPacket(total));
        }
        if buf.len() < total {
            return Err(CoreError::BufferTooSmall {
                needed: total,
                available: buf.len(),
            });
        }

        buf[..LENGTH_PREFIX_LEN].copy_from_slice(&((total - LENGTH_PREFIX_LEN) as u16).to_le_bytes());
        self.schema.flag_width().write(&mut buf[LENGTH_PREFIX_LEN..], flags);
        self.write_fields(&mut buf[overhead..total]);
        Ok(total)
    }

    /// Allocating convenience for building sub-packets outside the hot path.
    pub fn encode_nested_to_vec(&self) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.nested_len()?];
        let len = self.encode_nested(&mut out)?;
        out.truncate(len);
        Ok(out)
    }

    /// Copy pass. `out` is exactly the size computed by `measure`.
    fn write_fields(&self, out: &mut [u8]) -> usize {
        let mut cursor = 0;
        for (i, spec) in self.schema.fields().iter().enumerate() {
            let value = match self.values[i] {
                Some(v) => v,
                None => continue,
            };
            match value {
                FieldValue::Inline(inline) => {
                    let bytes = inline.as_bytes();
                    out[cursor..cursor + bytes.len()].copy_from_slice(bytes);
                    cursor += bytes.len();
                }
                FieldValue::Raw(bytes) => {
                    let len = spec.fixed_len();
                    out[cursor..cursor + bytes.len()].copy_from_slice(bytes);
                    out[cursor + bytes.len()..cursor + len].fill(0);
                    cursor += len;
                }
                FieldValue::Block(bytes) => {
                    out[cursor..cursor + 2].copy_from_slice(&(bytes.len() as u16).to_le_bytes());
                    cursor += 2;
                    out[cursor..cursor + bytes.len()].copy_from_slice(bytes);
                    cursor += bytes.len();
                }
                FieldValue::Packet(encoded) => {
                    if spec.is_packet_array() {
                        out[cursor] = 1;
                        cursor += 1;
                    }
                    out[cursor..cursor + encoded.len()].copy_from_slice(encoded);
                    cursor += encoded.len();
                }
                FieldValue::PacketArray(list) => {
                    if list.is_empty() {
                        continue;
                    }
                    out[cursor] = list.len() as u8;
                    cursor += 1;
                    for encoded in list {
                        out[cursor..cursor + encoded.len()].copy_from_slice(encoded);
                        cursor += encoded.len();
                    }
                }
            }
        }
        cursor
    }
}
