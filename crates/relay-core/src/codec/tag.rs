//! Wire type tags.

use std::fmt;

/// Tag byte that prefixes every value on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireType {
    Terminator,
    Byte,
    Integer,
    Double,
    Boolean,
    String,
    Array,
    List,
    Complex,
}

impl WireType {
    pub const TERMINATOR_BYTE: u8 = 0xFF;

    /// Decode a tag byte. Returns `None` for bytes that name no type.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            Self::TERMINATOR_BYTE => Some(WireType::Terminator),
            0 => Some(WireType::Byte),
            1 => Some(WireType::Integer),
            2 => Some(WireType::Double),
            3 => Some(WireType::Boolean),
            4 => Some(WireType::String),
            5 => Some(WireType::Array),
            6 => Some(WireType::List),
            7 => Some(WireType::Complex),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            WireType::Terminator => Self::TERMINATOR_BYTE,
            WireType::Byte => 0,
            WireType::Integer => 1,
            WireType::Double => 2,
            WireType::Boolean => 3,
            WireType::String => 4,
            WireType::Array => 5,
            WireType::List => 6,
            WireType::Complex => 7,
        }
    }

    /// Payload width for fixed-size scalars.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            WireType::Byte | WireType::Boolean => Some(1),
            WireType::Integer => Some(4),
            WireType::Double => Some(8),
            WireType::Complex => Some(16),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            WireType::Terminator => "terminator",
            WireType::Byte => "byte",
            WireType::Integer => "integer",
            WireType::Double => "double",
            WireType::Boolean => "boolean",
            WireType::String => "string",
            WireType::Array => "array",
            WireType::List => "list",
            WireType::Complex => "complex",
        }
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
