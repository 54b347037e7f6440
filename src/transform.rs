// S7200Drv - SCADA driver core for Siemens S7-200 PLCs over S7 (ISO-on-TCP).

//! Value transformations between host variants and periphery buffers.
//!
//! The wire is big-endian. `to_periph` always produces wire order; `to_var`
//! consumes whatever the read path delivers, which for Word payloads is host
//! order because the packer swaps them as they come off the wire.

use std::fmt;

use byteorder::{BigEndian, ByteOrder, NativeEndian};
use thiserror::Error;

use crate::address::{AddressDescriptor, WordLen};

/// Maximum string payload carried for a `VB<n>.<m>` address.
pub const MAX_STRING_SIZE: usize = 256;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("wrong variant for {kind:?} transformation")]
    WrongVariant { kind: TransformationKind },
    #[error("buffer of {got} bytes too small for {kind:?} (need {need})")]
    ShortBuffer {
        kind: TransformationKind,
        need: usize,
        got: usize,
    },
    #[error("string of {0} bytes exceeds the {MAX_STRING_SIZE}-byte limit")]
    StringTooLong(usize),
}

/// Host-side variant value, the shape the SCADA runtime trades in.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Uint8(u8),
    Int16(i16),
    Int32(i32),
    Float(f32),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Uint8(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v}"),
        }
    }
}

/// Which codec a configured point uses. Selected from the address shape at
/// configure time, except for `_`-prefixed special keys where the host's
/// choice is accepted verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformationKind {
    Bool,
    Uint8,
    Int16,
    Int32,
    Float,
    String,
}

impl TransformationKind {
    /// Codec for a parsed polled address: a multi-byte `VB` is a string,
    /// everything else follows the word length.
    pub fn for_address(descriptor: &AddressDescriptor) -> TransformationKind {
        if descriptor.word_len == WordLen::Byte && descriptor.amount > 1 {
            return TransformationKind::String;
        }
        match descriptor.word_len {
            WordLen::Bit => TransformationKind::Bool,
            WordLen::Byte => TransformationKind::Uint8,
            WordLen::Word | WordLen::Counter | WordLen::Timer => TransformationKind::Int16,
            WordLen::DWord => TransformationKind::Int32,
            WordLen::Real => TransformationKind::Float,
        }
    }

    /// Bytes one item of this kind occupies in a periphery buffer.
    pub fn item_size(self) -> usize {
        match self {
            TransformationKind::Bool | TransformationKind::Uint8 => 1,
            TransformationKind::Int16 => 2,
            TransformationKind::Int32 | TransformationKind::Float => 4,
            TransformationKind::String => MAX_STRING_SIZE,
        }
    }

    /// Host value to wire-order periphery buffer.
    pub fn to_periph(self, value: &Value) -> Result<Vec<u8>, TransformError> {
        match (self, value) {
            (TransformationKind::Bool, Value::Bool(v)) => Ok(vec![u8::from(*v)]),
            (TransformationKind::Uint8, Value::Uint8(v)) => Ok(vec![*v]),
            (TransformationKind::Int16, Value::Int16(v)) => {
                let mut buf = [0u8; 2];
                BigEndian::write_i16(&mut buf, *v);
                Ok(buf.to_vec())
            }
            (TransformationKind::Int32, Value::Int32(v)) => {
                let mut buf = [0u8; 4];
                BigEndian::write_i32(&mut buf, *v);
                Ok(buf.to_vec())
            }
            (TransformationKind::Float, Value::Float(v)) => {
                let mut buf = [0u8; 4];
                BigEndian::write_f32(&mut buf, *v);
                Ok(buf.to_vec())
            }
            (TransformationKind::String, Value::Text(v)) => {
                if v.len() > MAX_STRING_SIZE {
                    return Err(TransformError::StringTooLong(v.len()));
                }
                let mut buf = v.clone().into_bytes();
                buf.push(0);
                Ok(buf)
            }
            (kind, _) => Err(TransformError::WrongVariant { kind }),
        }
    }

    /// Periphery buffer to host value.
    pub fn to_var(self, buf: &[u8]) -> Result<Value, TransformError> {
        let need = match self {
            TransformationKind::String => 1,
            other => other.item_size(),
        };
        if buf.len() < need {
            return Err(TransformError::ShortBuffer {
                kind: self,
                need,
                got: buf.len(),
            });
        }
        Ok(match self {
            TransformationKind::Bool => Value::Bool(buf[0] != 0),
            TransformationKind::Uint8 => Value::Uint8(buf[0]),
            // Word payloads were already swapped to host order by the packer.
            TransformationKind::Int16 => Value::Int16(NativeEndian::read_i16(buf)),
            TransformationKind::Int32 => Value::Int32(BigEndian::read_i32(buf)),
            TransformationKind::Float => Value::Float(BigEndian::read_f32(buf)),
            TransformationKind::String => {
                let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
                Value::Text(String::from_utf8_lossy(&buf[..end]).into_owned())
            }
        })
    }
}

/// Swaps a 2-byte wire payload into host order in place. No-op on a
/// big-endian host.
pub fn word_to_host(buf: &mut [u8]) {
    if buf.len() >= 2 {
        let v = BigEndian::read_u16(buf);
        NativeEndian::write_u16(buf, v);
    }
}
