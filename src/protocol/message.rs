//! Thrift binary message constants
//!
//! Versioned envelope layout (big-endian):
//! ┌──────────────────────────────┬──────────┬───────────┬─────────────┐
//! │ VERSION_1 | type (i32)       │ len (i32)│ name      │ seq id (i32)│
//! └──────────────────────────────┴──────────┴───────────┴─────────────┘
//!
//! Legacy unversioned layout:
//! ┌──────────┬───────────┬─────────────┐
//! │ len (i32)│ name      │ seq id (i32)│
//! └──────────┴───────────┴─────────────┘

/// Top 16 bits of the first word select the version
pub const VERSION_MASK: i32 = 0xffff_0000_u32 as i32;
/// `0x80010000`, i.e. -2147418112
pub const VERSION_1: i32 = 0x8001_0000_u32 as i32;
/// Low byte of the first word carries the message type
pub const TYPE_MASK: i32 = 0x0000_00ff;

/// Tipe pesan dalam envelope
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Request expecting a reply
    Call = 1,
    /// Successful reply
    Reply = 2,
    /// Application or protocol exception
    Exception = 3,
    /// Request without a reply
    Oneway = 4,
}

impl MessageType {
    #[inline(always)]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Call),
            2 => Some(Self::Reply),
            3 => Some(Self::Exception),
            4 => Some(Self::Oneway),
            _ => None,
        }
    }
}

/// Wire type tags
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TType {
    Stop = 0,
    Void = 1,
    Bool = 2,
    Byte = 3,
    Double = 4,
    I16 = 6,
    I32 = 8,
    U64 = 9,
    I64 = 10,
    String = 11,
    Struct = 12,
    Map = 13,
    Set = 14,
    List = 15,
    Utf8 = 16,
    Utf16 = 17,
}

impl TType {
    #[inline(always)]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Stop),
            1 => Some(Self::Void),
            2 => Some(Self::Bool),
            3 => Some(Self::Byte),
            4 => Some(Self::Double),
            6 => Some(Self::I16),
            8 => Some(Self::I32),
            9 => Some(Self::U64),
            10 => Some(Self::I64),
            11 => Some(Self::String),
            12 => Some(Self::Struct),
            13 => Some(Self::Map),
            14 => Some(Self::Set),
            15 => Some(Self::List),
            16 => Some(Self::Utf8),
            17 => Some(Self::Utf16),
            _ => None,
        }
    }

    /// Encoded width of fixed-size scalars.
    #[inline(always)]
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            Self::Bool | Self::Byte => Some(1),
            Self::I16 => Some(2),
            Self::I32 => Some(4),
            Self::I64 | Self::U64 | Self::Double => Some(8),
            _ => None,
        }
    }

    /// `i32` length prefix followed by that many bytes.
    #[inline(always)]
    pub fn is_length_prefixed(self) -> bool {
        matches!(self, Self::String | Self::Utf8 | Self::Utf16)
    }

    #[inline(always)]
    pub fn is_composite(self) -> bool {
        matches!(self, Self::Struct | Self::Map | Self::Set | Self::List)
    }
}
