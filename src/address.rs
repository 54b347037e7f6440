// S7200Drv - SCADA driver core for Siemens S7-200 PLCs over S7 (ISO-on-TCP).

//! S7-200 address grammar.
//!
//! Addresses are short ASCII designators such as `VW1984`, `VB2978.20`,
//! `V255.3` or `M10.0`. The first character selects the memory area, the
//! second the word length; the rest is the start byte plus an optional
//! dot-suffix whose meaning depends on the word length: under `Bit` it is the
//! bit offset, under `Byte` it is a string length in bytes.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Top-level S7 memory region. The S7-200 exposes a single implicit DB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Area {
    DataBlock,
    Inputs,
    Outputs,
    Memory,
    Timers,
    Counters,
}

impl Area {
    /// S7 protocol area id, as used in the item spec of a request telegram.
    pub fn code(self) -> u8 {
        match self {
            Area::Inputs => 0x81,
            Area::Outputs => 0x82,
            Area::Memory => 0x83,
            Area::DataBlock => 0x84,
            Area::Counters => 0x1C,
            Area::Timers => 0x1D,
        }
    }

    fn from_tag(tag: char) -> Option<Area> {
        match tag.to_ascii_lowercase() {
            'v' => Some(Area::DataBlock),
            'i' | 'e' => Some(Area::Inputs),
            'q' | 'a' => Some(Area::Outputs),
            'm' | 'f' => Some(Area::Memory),
            't' => Some(Area::Timers),
            'c' | 'z' => Some(Area::Counters),
            _ => None,
        }
    }

    fn tag(self) -> char {
        match self {
            Area::DataBlock => 'V',
            Area::Inputs => 'I',
            Area::Outputs => 'Q',
            Area::Memory => 'M',
            Area::Timers => 'T',
            Area::Counters => 'C',
        }
    }
}

/// S7 transport word length. `Counter` and `Timer` exist in the protocol
/// tables but the S7-200 address grammar never produces them; timer and
/// counter cells are reached as bit accesses (`T5.0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WordLen {
    Bit,
    Byte,
    Word,
    DWord,
    Real,
    Counter,
    Timer,
}

impl WordLen {
    /// S7 protocol word-length id.
    pub fn code(self) -> u8 {
        match self {
            WordLen::Bit => 0x01,
            WordLen::Byte => 0x02,
            WordLen::Word => 0x04,
            WordLen::DWord => 0x06,
            WordLen::Real => 0x08,
            WordLen::Counter => 0x1C,
            WordLen::Timer => 0x1D,
        }
    }

    /// Bytes occupied by one element on the wire. A bit is carried in a
    /// full byte with the value in the low bit.
    pub fn bytes_per_element(self) -> usize {
        match self {
            WordLen::Bit | WordLen::Byte => 1,
            WordLen::Word | WordLen::Counter | WordLen::Timer => 2,
            WordLen::DWord | WordLen::Real => 4,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("address `{0}` is too short")]
    TooShort(String),
    #[error("address `{0}`: unknown memory area")]
    UnknownArea(String),
    #[error("address `{0}`: malformed start byte")]
    BadStart(String),
    #[error("address `{0}`: bit access needs a `.bit` suffix in 0..=7")]
    BadBit(String),
    #[error("address `{0}`: zero-length amount")]
    ZeroAmount(String),
}

/// Parsed form of an S7-200 address string. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressDescriptor {
    pub area: Area,
    pub word_len: WordLen,
    /// Always 1: the S7-200 exposes a single implicit data block.
    pub db_number: u16,
    pub start_byte: u32,
    /// 0 unless `word_len == Bit`.
    pub bit_offset: u8,
    /// Element count. `VB<n>.<m>` reads as a string of `m` bytes.
    pub amount: u16,
}

impl AddressDescriptor {
    /// Parses an address string. Pure and deterministic; never panics.
    pub fn parse(raw: &str) -> Result<AddressDescriptor, AddressError> {
        if raw.len() < 2 || !raw.is_ascii() {
            return Err(AddressError::TooShort(raw.to_owned()));
        }
        let bytes = raw.as_bytes();

        let area = Area::from_tag(bytes[0] as char)
            .ok_or_else(|| AddressError::UnknownArea(raw.to_owned()))?;

        // The second character decides the word length; anything that is not
        // b/w/d is a bit access whose start begins right there (`V255.3`).
        let word_len = match (bytes[1] as char).to_ascii_lowercase() {
            'b' => WordLen::Byte,
            'w' => WordLen::Word,
            'd' => WordLen::Real, // double words are read as 32-bit floats
            _ => WordLen::Bit,
        };

        match word_len {
            WordLen::Bit => {
                let rest = &raw[1..];
                let dot = rest
                    .find('.')
                    .ok_or_else(|| AddressError::BadBit(raw.to_owned()))?;
                let start_byte = parse_decimal(&rest[..dot])
                    .ok_or_else(|| AddressError::BadStart(raw.to_owned()))?;
                let bit_offset: u8 = rest[dot + 1..]
                    .parse()
                    .ok()
                    .filter(|b| *b <= 7)
                    .ok_or_else(|| AddressError::BadBit(raw.to_owned()))?;
                Ok(AddressDescriptor {
                    area,
                    word_len,
                    db_number: 1,
                    start_byte,
                    bit_offset,
                    amount: 1,
                })
            }
            _ => {
                let rest = &raw[2..];
                let (start_text, suffix) = match rest.find('.') {
                    Some(dot) => (&rest[..dot], Some(&rest[dot + 1..])),
                    None => (rest, None),
                };
                let start_byte = parse_decimal(start_text)
                    .ok_or_else(|| AddressError::BadStart(raw.to_owned()))?;
                // A dot under the Byte word length means "string of m bytes";
                // under Word/Real the suffix carries no information.
                let amount = match (word_len, suffix) {
                    (WordLen::Byte, Some(m)) => {
                        let m: u16 = m
                            .parse()
                            .map_err(|_| AddressError::BadStart(raw.to_owned()))?;
                        if m == 0 {
                            return Err(AddressError::ZeroAmount(raw.to_owned()));
                        }
                        m
                    }
                    _ => 1,
                };
                Ok(AddressDescriptor {
                    area,
                    word_len,
                    db_number: 1,
                    start_byte,
                    bit_offset: 0,
                    amount,
                })
            }
        }
    }

    /// Total wire size of the access in bytes. Strictly positive for every
    /// descriptor this module hands out.
    pub fn size_bytes(&self) -> usize {
        self.word_len.bytes_per_element() * self.amount as usize
    }

    /// Start expressed the way the protocol wants it: bit accesses address
    /// individual bits, everything else addresses bytes.
    pub fn wire_start(&self) -> u32 {
        match self.word_len {
            WordLen::Bit => self.start_byte * 8 + u32::from(self.bit_offset),
            _ => self.start_byte,
        }
    }
}

fn parse_decimal(text: &str) -> Option<u32> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

impl FromStr for AddressDescriptor {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AddressDescriptor::parse(s)
    }
}

impl fmt::Display for AddressDescriptor {
    /// Canonical upper-case rendering; `parse(format(d)) == d` for every
    /// descriptor the parser can produce.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let area = self.area.tag();
        match self.word_len {
            WordLen::Bit => write!(f, "{}{}.{}", area, self.start_byte, self.bit_offset),
            WordLen::Byte if self.amount > 1 => {
                write!(f, "{}B{}.{}", area, self.start_byte, self.amount)
            }
            WordLen::Byte => write!(f, "{}B{}", area, self.start_byte),
            WordLen::Word => write!(f, "{}W{}", area, self.start_byte),
            WordLen::DWord | WordLen::Real => write!(f, "{}D{}", area, self.start_byte),
            // not producible by the grammar; render the bare cell number
            WordLen::Counter | WordLen::Timer => write!(f, "{}{}", area, self.start_byte),
        }
    }
}
