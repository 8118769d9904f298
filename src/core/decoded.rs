//! # Message Decoding
//!
//! Decoding walks a [`Schema`] against a byte slice and produces a
//! [`Decoded`] view that borrows the input. Memory blocks, nested packets
//! and character fields are returned as zero-copy slices; scalars are copied
//! out on request.
//!
//! Every cursor advance is checked against the end of the message before
//! any byte is read. A failure rejects the whole message: there are no
//! partial results.

use crate::core::field::FieldType;
use crate::core::message::Scalar;
use crate::core::schema::{
    Header, Schema, FRONT_GUARD_BYTE, HEADER_LEN, LENGTH_PREFIX_LEN, MAX_FIELDS, REAR_GUARD_BYTE,
};
use crate::error::{DecodeError, Result};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot<'a> {
    Absent,
    Fixed(FieldType, &'a [u8]),
    Block(&'a [u8]),
    Packet(&'a [u8]),
    Array { count: u8, region: &'a [u8] },
}

/// A successfully decoded message. Borrows the input buffer.
#[derive(Debug, Clone)]
pub struct Decoded<'a> {
    header: Option<Header>,
    flags: u32,
    field_count: usize,
    slots: [Slot<'a>; MAX_FIELDS],
}

/// Bounds-checked cursor over `data[..end]`.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> std::result::Result<&'a [u8], DecodeError> {
        let next = self.pos.checked_add(n).ok_or(DecodeError::Truncated)?;
        if next > self.end {
            return Err(DecodeError::Truncated);
        }
        let slice = &self.data[self.pos..next];
        self.pos = next;
        Ok(slice)
    }

    fn u8(&mut self) -> std::result::Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    /// Take one `[len:u16][bytes]` unit, returning it with its prefix.
    fn prefixed(&mut self) -> std::result::Result<&'a [u8], DecodeError> {
        let start = self.pos;
        let len = self.take(LENGTH_PREFIX_LEN)?;
        let len = u16::from_le_bytes([len[0], len[1]]) as usize;
        self.take(len)?;
        Ok(&self.data[start..self.pos])
    }
}

impl Schema {
    /// Decode a top-level message.
    ///
    /// Checks the front guard, that `data` holds the declared length and the
    /// rear guard at the declared end. Bytes past the declared length are
    /// ignored.
    pub fn decode_top_level<'a>(&self, data: &'a [u8]) -> Result<Decoded<'a>> {
        self.try_decode_top_level(data).map_err(|e| {
            trace!(reason = %e, len = data.len(), "Dropping top-level message");
            e.into()
        })
    }

    /// Decode a nested message starting at its 2-byte length prefix.
    pub fn decode_nested<'a>(&self, data: &'a [u8]) -> Result<Decoded<'a>> {
        self.try_decode_nested(data).map_err(|e| {
            trace!(reason = %e, len = data.len(), "Dropping nested message");
            e.into()
        })
    }

    fn try_decode_top_level<'a>(
        &self,
        data: &'a [u8],
    ) -> std::result::Result<Decoded<'a>, DecodeError> {
        let overhead = self.top_level_overhead();
        if data.len() < overhead + 1 {
            return Err(DecodeError::Truncated);
        }
        if data[0] != FRONT_GUARD_BYTE {
            return Err(DecodeError::BadGuard);
        }
        let (header, declared) = Header::read(data);
        let declared = declared as usize;
        if declared < overhead + 1 {
            return Err(DecodeError::BadLength);
        }
        if declared > data.len() {
            return Err(DecodeError::Truncated);
        }
        if data[declared - 1] != REAR_GUARD_BYTE {
            return Err(DecodeError::BadGuard);
        }
        let flags = self.flag_width().read(&data[HEADER_LEN..]);
        let mut cursor = Cursor {
            data,
            pos: overhead,
            end: declared - 1,
        };
        let slots = self.walk(&mut cursor, flags)?;
        Ok(Decoded {
            header: Some(header),
            flags,
            field_count: self.len(),
            slots,
        })
    }

    fn try_decode_nested<'a>(&self, data: &'a [u8]) -> std::result::Result<Decoded<'a>, DecodeError> {
        if data.len() < LENGTH_PREFIX_LEN {
            return Err(DecodeError::Truncated);
        }
        let body = u16::from_le_bytes([data[0], data[1]]) as usize;
        let end = LENGTH_PREFIX_LEN + body;
        if end > data.len() {
            return Err(DecodeError::Truncated);
        }
        if body < self.flag_width().bytes() {
            return Err(DecodeError::BadLength);
        }
        let flags = self.flag_width().read(&data[LENGTH_PREFIX_LEN..]);
        let mut cursor = Cursor {
            data,
            pos: self.nested_overhead(),
            end,
        };
        let slots = self.walk(&mut cursor, flags)?;
        Ok(Decoded {
            header: None,
            flags,
            field_count: self.len(),
            slots,
        })
    }

    fn walk<'a>(
        &self,
        cursor: &mut Cursor<'a>,
        flags: u32,
    ) -> std::result::Result<[Slot<'a>; MAX_FIELDS], DecodeError> {
        let mut slots = [Slot::Absent; MAX_FIELDS];
        for (i, spec) in self.fields().iter().enumerate() {
            if flags & (1 << i) == 0 {
                continue;
            }
            slots[i] = match spec.ty {
                FieldType::Packet if spec.is_packet_array() => {
                    let count = cursor.u8()?;
                    if count as usize > spec.count as usize {
                        return Err(DecodeError::ArrayOverflow);
                    }
                    let start = cursor.pos;
                    for _ in 0..count {
                        cursor.prefixed()?;
                    }
                    Slot::Array {
                        count,
                        region: &cursor.data[start..cursor.pos],
                    }
                }
                FieldType::Packet => Slot::Packet(cursor.prefixed()?),
                FieldType::MemoryBlock => {
                    Slot::Block(&cursor.prefixed()?[LENGTH_PREFIX_LEN..])
                }
                ty => Slot::Fixed(ty, cursor.take(spec.fixed_len())?),
            };
        }
        Ok(slots)
    }
}

impl<'a> Decoded<'a> {
    /// Header of a top-level message. `None` for nested messages.
    #[inline]
    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    /// Raw presence flag word as read from the wire.
    #[inline]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    #[inline]
    pub fn is_present(&self, index: usize) -> bool {
        index < self.field_count && !matches!(self.slots[index], Slot::Absent)
    }

    fn slot(&self, index: usize) -> Slot<'a> {
        if index < self.field_count {
            self.slots[index]
        } else {
            Slot::Absent
        }
    }

    /// Copy a scalar field out. `None` when absent or when `T` has the wrong width.
    pub fn get<T: Scalar>(&self, index: usize) -> Option<T> {
        match self.slot(index) {
            Slot::Fixed(_, bytes) if bytes.len() == T::WIDTH => Some(T::from_le_slice(bytes)),
            _ => None,
        }
    }

    /// Copy a scalar field into `out`. Leaves `out` untouched and returns
    /// false when the field is absent.
    pub fn read_into<T: Scalar>(&self, index: usize, out: &mut T) -> bool {
        match self.get(index) {
            Some(value) => {
                *out = value;
                true
            }
            None => false,
        }
    }

    /// Fixed-width bytes of a present field, for repeated scalars and matrices.
    pub fn fixed(&self, index: usize) -> Option<&'a [u8]> {
        match self.slot(index) {
            Slot::Fixed(_, bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Zero-copy view of a character field.
    pub fn chars(&self, index: usize) -> Option<&'a [u8]> {
        match self.slot(index) {
            Slot::Fixed(FieldType::Char, bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Character field up to the first NUL, if it is valid UTF-8.
    pub fn chars_str(&self, index: usize) -> Option<&'a str> {
        let bytes = self.chars(index)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        std::str::from_utf8(&bytes[..end]).ok()
    }

    /// Zero-copy view of a memory block, without its length prefix.
    /// A present empty block yields `Some(&[])`.
    pub fn block(&self, index: usize) -> Option<&'a [u8]> {
        match self.slot(index) {
            Slot::Block(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// A nested message including its length prefix, ready for
    /// [`Schema::decode_nested`].
    pub fn packet(&self, index: usize) -> Option<&'a [u8]> {
        match self.slot(index) {
            Slot::Packet(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Number of elements actually carried by a packet array field.
    pub fn packet_count(&self, index: usize) -> Option<usize> {
        match self.slot(index) {
            Slot::Array { count, .. } => Some(count as usize),
            _ => None,
        }
    }

    /// Elements of a packet array field. Empty when absent.
    pub fn packets(&self, index: usize) -> PacketIter<'a> {
        match self.slot(index) {
            Slot::Array { count, region } => PacketIter {
                region,
                remaining: count,
            },
            _ => PacketIter {
                region: &[],
                remaining: 0,
            },
        }
    }
}

/// Iterator over the elements of a decoded packet array.
///
/// The region was validated during decode, so iteration only re-reads
/// length prefixes it has already checked.
#[derive(Debug, Clone)]
pub struct PacketIter<'a> {
    region: &'a [u8],
    remaining: u8,
}

impl<'a> Iterator for PacketIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 || self.region.len() < LENGTH_PREFIX_LEN {
            return None;
        }
        let len = u16::from_le_bytes([self.region[0], self.region[1]]) as usize + LENGTH_PREFIX_LEN;
        let len = len.min(self.region.len());
        let (item, rest) = self.region.split_at(len);
        self.region = rest;
        self.remaining -= 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining as usize, Some(self.remaining as usize))
    }
}
