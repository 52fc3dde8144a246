//! RPC controller addresses
//!
//! The controller exposes two memory areas: 16-bit words (individually
//! bit-addressable) and 64-bit doubles. Bit addresses sort inside their
//! word so that range discovery over bits and words agrees.

use machlink_core::Address;
use std::fmt;

/// Number of bits in one word
pub const BITS_PER_WORD: u8 = 16;

/// Memory area of an [`RpcAddress`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Area {
    /// Word area, addressed whole or by bit
    Word,
    /// Double area
    Double,
}

/// One cell on the RPC controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcAddress {
    /// A whole 16-bit word
    Word { index: u16 },
    /// One bit of a word
    Bit { index: u16, bit: u8 },
    /// A 64-bit double
    Double { index: u16 },
}

impl RpcAddress {
    /// Word at `index`
    pub const fn word(index: u16) -> Self {
        RpcAddress::Word { index }
    }

    /// Double at `index`
    pub const fn double(index: u16) -> Self {
        RpcAddress::Double { index }
    }

    /// Bit `bit` of word `index`; bits past the word carry into later words
    pub fn bit(index: u16, bit: u8) -> Option<Self> {
        let carry = u16::from(bit / BITS_PER_WORD);
        Some(RpcAddress::Bit {
            index: index.checked_add(carry)?,
            bit: bit % BITS_PER_WORD,
        })
    }

    /// Memory area
    pub fn area(&self) -> Area {
        match self {
            RpcAddress::Word { .. } | RpcAddress::Bit { .. } => Area::Word,
            RpcAddress::Double { .. } => Area::Double,
        }
    }

    /// Index into the address's area
    pub fn index(&self) -> u16 {
        match self {
            RpcAddress::Word { index } | RpcAddress::Bit { index, .. } | RpcAddress::Double { index } => {
                *index
            }
        }
    }

    /// Bit position for bit addresses
    pub fn bit_position(&self) -> Option<u8> {
        match self {
            RpcAddress::Bit { bit, .. } => Some(*bit),
            _ => None,
        }
    }

    /// Whether the address lives in the word area
    pub fn is_word_area(&self) -> bool {
        self.area() == Area::Word
    }

    /// Whether the address lives in the double area
    pub fn is_double_area(&self) -> bool {
        self.area() == Area::Double
    }
}

impl RpcAddress {
    fn sort_key(&self) -> (u8, u16, u8, u8) {
        match *self {
            RpcAddress::Word { index } => (0, index, 0, 0),
            RpcAddress::Bit { index, bit } => (0, index, 1, bit),
            RpcAddress::Double { index } => (1, index, 0, 0),
        }
    }
}

// Words order by index with their bits right after them, doubles last.
impl Ord for RpcAddress {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for RpcAddress {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RpcAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcAddress::Word { index } => write!(f, "W{}", index),
            RpcAddress::Bit { index, bit } => write!(f, "W{}.{}", index, bit),
            RpcAddress::Double { index } => write!(f, "D{}", index),
        }
    }
}

impl Address for RpcAddress {
    fn increment(&self) -> Option<Self> {
        match *self {
            RpcAddress::Word { index } => index.checked_add(1).map(RpcAddress::word),
            RpcAddress::Double { index } => index.checked_add(1).map(RpcAddress::double),
            RpcAddress::Bit { index, bit } if bit + 1 < BITS_PER_WORD => {
                Some(RpcAddress::Bit { index, bit: bit + 1 })
            }
            RpcAddress::Bit { index, .. } => index
                .checked_add(1)
                .map(|index| RpcAddress::Bit { index, bit: 0 }),
        }
    }
}
