//! Packet schemas and the top-level header.
//!
//! A [`Schema`] is defined once at startup and shared read-only afterwards.
//! It fixes the order of fields, their types and repeat counts, and the
//! width of the presence flag word.

use crate::core::field::{FieldSpec, FieldType, FlagWidth};
use crate::error::{constants, CoreError, Result};

/// Maximum number of fields in one schema.
pub const MAX_FIELDS: usize = 64;

/// First byte of every top-level message.
pub const FRONT_GUARD_BYTE: u8 = 0xD6;

/// Last byte of every top-level message.
pub const REAR_GUARD_BYTE: u8 = 0x6B;

/// `[guard:u8][length:u16][type:u8][flags:u8][owner_id:u32][frame_tick:u32]`
pub const HEADER_LEN: usize = 13;

/// Length prefix of nested messages, memory blocks and array elements.
pub const LENGTH_PREFIX_LEN: usize = 2;

/// Largest encodable message, bounded by the `u16` length field.
pub const MAX_PACKET_SIZE: usize = u16::MAX as usize;

/// Header of a top-level message, minus the guard and length bytes which
/// the encoder derives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub msg_type: u8,
    pub flags: u8,
    pub owner_id: u32,
    pub frame_tick: u32,
}

impl Header {
    pub fn new(msg_type: u8) -> Self {
        Self {
            msg_type,
            ..Self::default()
        }
    }

    pub(crate) fn write(&self, out: &mut [u8], total_len: u16) {
        out[0] = FRONT_GUARD_BYTE;
        out[1..3].copy_from_slice(&total_len.to_le_bytes());
        out[3] = self.msg_type;
        out[4] = self.flags;
        out[5..9].copy_from_slice(&self.owner_id.to_le_bytes());
        out[9..13].copy_from_slice(&self.frame_tick.to_le_bytes());
    }

    /// Caller guarantees `data` holds at least [`HEADER_LEN`] bytes.
    pub(crate) fn read(data: &[u8]) -> (Self, u16) {
        let length = u16::from_le_bytes([data[1], data[2]]);
        let header = Self {
            msg_type: data[3],
            flags: data[4],
            owner_id: u32::from_le_bytes([data[5], data[6], data[7], data[8]]),
            frame_tick: u32::from_le_bytes([data[9], data[10], data[11], data[12]]),
        };
        (header, length)
    }
}

/// Immutable description of a message's fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<FieldSpec>,
    flag_width: FlagWidth,
}

impl Schema {
    /// Start defining a schema with the given flag word width.
    pub fn builder(flag_width: FlagWidth) -> SchemaBuilder {
        SchemaBuilder {
            fields: Vec::new(),
            flag_width,
            error: None,
        }
    }

    /// Define a schema from a field list in one call.
    ///
    /// `flag_bytes` must be 1, 2 or 4.
    pub fn define(flag_bytes: u8, fields: &[(FieldType, u16)]) -> Result<Self> {
        let width = FlagWidth::from_bytes(flag_bytes)?;
        fields
            .iter()
            .fold(Self::builder(width), |b, &(ty, count)| b.field(ty, count))
            .build()
    }

    #[inline]
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    #[inline]
    pub fn field(&self, index: usize) -> Option<&FieldSpec> {
        self.fields.get(index)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[inline]
    pub fn flag_width(&self) -> FlagWidth {
        self.flag_width
    }

    /// Bytes preceding the first field of a top-level message.
    #[inline]
    pub fn top_level_overhead(&self) -> usize {
        HEADER_LEN + self.flag_width.bytes()
    }

    /// Bytes preceding the first field of a nested message.
    #[inline]
    pub fn nested_overhead(&self) -> usize {
        LENGTH_PREFIX_LEN + self.flag_width.bytes()
    }
}

/// Builder for [`Schema`]. Errors are deferred to [`SchemaBuilder::build`].
#[derive(Debug)]
pub struct SchemaBuilder {
    fields: Vec<FieldSpec>,
    flag_width: FlagWidth,
    error: Option<&'static str>,
}

impl SchemaBuilder {
    /// Append a field. `count` is the repeat count (array capacity for packets).
    pub fn field(mut self, ty: FieldType, count: u16) -> Self {
        if self.error.is_some() {
            return self;
        }
        if count == 0 {
            self.error = Some(constants::ERR_ZERO_COUNT);
        } else if self.fields.len() >= MAX_FIELDS {
            self.error = Some(constants::ERR_TOO_MANY_FIELDS);
        } else if self.fields.len() >= self.flag_width.bits() {
            self.error = Some(constants::ERR_NO_FIELDS_ALLOWED);
        } else {
            self.fields.push(FieldSpec { ty, count });
        }
        self
    }

    pub fn scalar(self, ty: FieldType) -> Self {
        self.field(ty, 1)
    }

    pub fn memory_block(self) -> Self {
        self.field(FieldType::MemoryBlock, 1)
    }

    pub fn packet(self) -> Self {
        self.field(FieldType::Packet, 1)
    }

    pub fn packet_array(self, capacity: u16) -> Self {
        self.field(FieldType::Packet, capacity)
    }

    pub fn build(self) -> Result<Schema> {
        match self.error {
            Some(reason) => Err(CoreError::Schema(reason)),
            None => Ok(Schema {
                fields: self.fields,
                flag_width: self.flag_width,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_schema() {
        let schema = Schema::define(
            1,
            &[
                (FieldType::UInt8, 1),
                (FieldType::UInt32, 1),
                (FieldType::MemoryBlock, 1),
            ],
        )
        .expect("valid schema");
        assert_eq!(schema.len(), 3);
        assert_eq!(schema.top_level_overhead(), 14);
        assert_eq!(schema.nested_overhead(), 3);
    }

    #[test]
    fn test_zero_count_rejected() {
        let result = Schema::builder(FlagWidth::One)
            .field(FieldType::UInt8, 0)
            .build();
        assert!(matches!(result, Err(CoreError::Schema(_))));
    }

    #[test]
    fn test_flag_width_limits_field_count() {
        let mut builder = Schema::builder(FlagWidth::One);
        for _ in 0..9 {
            builder = builder.scalar(FieldType::UInt8);
        }
        assert!(builder.build().is_err());

        let mut builder = Schema::builder(FlagWidth::Four);
        for _ in 0..32 {
            builder = builder.scalar(FieldType::UInt8);
        }
        assert_eq!(builder.build().map(|s| s.len()).ok(), Some(32));
    }

    #[test]
    fn test_define_rejects_width_three() {
        assert!(matches!(
            Schema::define(3, &[(FieldType::UInt8, 1)]),
            Err(CoreError::InvalidFlagWidth(3))
        ));
    }

    #[test]
    fn test_header_roundtrip() {
        let header = Header {
            msg_type: 7,
            flags: 1,
            owner_id: 0xDEADBEEF,
            frame_tick: 42,
        };
        let mut buf = [0u8; HEADER_LEN];
        header.write(&mut buf, 100);
        assert_eq!(buf[0], FRONT_GUARD_BYTE);
        let (decoded, len) = Header::read(&buf);
        assert_eq!(decoded, header);
        assert_eq!(len, 100);
    }
}
