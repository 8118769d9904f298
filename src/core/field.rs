//! Field types and flag word widths.

use crate::error::{CoreError, Result};

/// Wire type of a schema field.
///
/// Fixed-width types occupy `width() * count` bytes. `Packet` and
/// `MemoryBlock` are length-prefixed and sized per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldType {
    /// Character data. Decoded as a zero-copy slice rather than copied out.
    Char = 0,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    /// Three `f32` coordinates.
    Pos,
    /// Sixteen `f32` values.
    Matrix,
    /// Nested message (or, with count > 1, an array of nested messages).
    Packet,
    /// Opaque `[len:u16][bytes]` block.
    MemoryBlock,
    /// Three `i16` coordinates relative to a base position.
    PosBaseMeter,
    WChar,
}

impl FieldType {
    /// Width in bytes of a single element. Zero for length-prefixed types.
    #[inline]
    pub const fn width(self) -> usize {
        match self {
            FieldType::Char | FieldType::Int8 | FieldType::UInt8 => 1,
            FieldType::Int16 | FieldType::UInt16 | FieldType::WChar => 2,
            FieldType::Int32 | FieldType::UInt32 | FieldType::Float => 4,
            FieldType::Int64 | FieldType::UInt64 => 8,
            FieldType::Pos => 12,
            FieldType::Matrix => 64,
            FieldType::PosBaseMeter => 6,
            FieldType::Packet | FieldType::MemoryBlock => 0,
        }
    }

    /// True for types whose size is fixed by the schema.
    #[inline]
    pub const fn is_fixed(self) -> bool {
        !matches!(self, FieldType::Packet | FieldType::MemoryBlock)
    }

    pub fn name(self) -> &'static str {
        match self {
            FieldType::Char => "char",
            FieldType::Int8 => "i8",
            FieldType::UInt8 => "u8",
            FieldType::Int16 => "i16",
            FieldType::UInt16 => "u16",
            FieldType::Int32 => "i32",
            FieldType::UInt32 => "u32",
            FieldType::Int64 => "i64",
            FieldType::UInt64 => "u64",
            FieldType::Float => "f32",
            FieldType::Pos => "pos",
            FieldType::Matrix => "matrix",
            FieldType::Packet => "packet",
            FieldType::MemoryBlock => "memory_block",
            FieldType::PosBaseMeter => "pos_base_meter",
            FieldType::WChar => "wchar",
        }
    }
}

/// Width of the presence flag word that follows the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagWidth {
    One,
    Two,
    Four,
}

impl FlagWidth {
    /// Parse a raw byte width. Only 1, 2 and 4 are valid.
    pub fn from_bytes(bytes: u8) -> Result<Self> {
        match bytes {
            1 => Ok(FlagWidth::One),
            2 => Ok(FlagWidth::Two),
            4 => Ok(FlagWidth::Four),
            other => Err(CoreError::InvalidFlagWidth(other)),
        }
    }

    #[inline]
    pub const fn bytes(self) -> usize {
        match self {
            FlagWidth::One => 1,
            FlagWidth::Two => 2,
            FlagWidth::Four => 4,
        }
    }

    /// Number of presence bits the word can hold.
    #[inline]
    pub const fn bits(self) -> usize {
        self.bytes() * 8
    }

    pub(crate) fn write(self, out: &mut [u8], flags: u32) {
        match self {
            FlagWidth::One => out[0] = flags as u8,
            FlagWidth::Two => out[..2].copy_from_slice(&(flags as u16).to_le_bytes()),
            FlagWidth::Four => out[..4].copy_from_slice(&flags.to_le_bytes()),
        }
    }

    /// Caller guarantees `data` holds at least `self.bytes()` bytes.
    pub(crate) fn read(self, data: &[u8]) -> u32 {
        match self {
            FlagWidth::One => u32::from(data[0]),
            FlagWidth::Two => u32::from(u16::from_le_bytes([data[0], data[1]])),
            FlagWidth::Four => u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
        }
    }
}

/// One schema entry: a type and a repeat count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub ty: FieldType,
    pub count: u16,
}

impl FieldSpec {
    /// Encoded size for fixed-width fields.
    #[inline]
    pub fn fixed_len(&self) -> usize {
        self.ty.width() * self.count as usize
    }

    /// A packet field with count > 1 is an array of nested messages.
    #[inline]
    pub fn is_packet_array(&self) -> bool {
        self.ty == FieldType::Packet && self.count > 1
    }
}
