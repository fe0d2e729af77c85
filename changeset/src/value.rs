//! The tagged value union and its wire codec.
//!
//! Wire tags are fixed constants, never to be renumbered: `0x00`
//! UNDEF, `0x01` INT64, `0x02` FLOAT64, `0x03` TEXT, `0x04` BLOB,
//! `0x05` NULL.

use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt};
use common::err::{CsError, CsResult};
use memory::varint;
use memory::Buffer;

pub const TAG_UNDEF: u8 = 0x00;
pub const TAG_INT64: u8 = 0x01;
pub const TAG_FLOAT64: u8 = 0x02;
pub const TAG_TEXT: u8 = 0x03;
pub const TAG_BLOB: u8 = 0x04;
pub const TAG_NULL: u8 = 0x05;

/// A single column value, or the sentinel meaning "no value present"
/// (legal only in UPDATE images for an unmodified column).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// No value present; omitted column in an UPDATE image.
    Undef,
    Null,
    Int64(i64),
    Float64(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    #[inline]
    pub fn tag(&self) -> u8 {
        match self {
            Value::Undef => TAG_UNDEF,
            Value::Null => TAG_NULL,
            Value::Int64(_) => TAG_INT64,
            Value::Float64(_) => TAG_FLOAT64,
            Value::Text(_) => TAG_TEXT,
            Value::Blob(_) => TAG_BLOB,
        }
    }

    #[inline]
    pub fn is_undef(&self) -> bool {
        matches!(self, Value::Undef)
    }

    /// Appends this value's wire encoding (tag byte plus payload) to
    /// `buf`. Floats are transmitted via bit-level reinterpretation
    /// of the IEEE-754 double, never a textual round-trip.
    pub fn serialize(&self, buf: &mut Buffer) -> CsResult<()> {
        buf.append_u8(self.tag())?;
        match self {
            Value::Undef | Value::Null => {}
            Value::Int64(v) => buf.append_fixed8_be(v.to_be_bytes())?,
            Value::Float64(v) => buf.append_fixed8_be(v.to_bits().to_be_bytes())?,
            Value::Text(s) => {
                buf.append_varint(s.len() as u32)?;
                buf.append_bytes(s.as_bytes())?;
            }
            Value::Blob(b) => {
                buf.append_varint(b.len() as u32)?;
                buf.append_bytes(b)?;
            }
        }
        Ok(())
    }

    /// The number of bytes `serialize` would write for this value,
    /// computable without actually serializing it. Used by the
    /// session recorder's two-pass pre-image capture.
    pub fn serialized_len(&self) -> usize {
        match self {
            Value::Undef | Value::Null => 1,
            Value::Int64(_) | Value::Float64(_) => 9,
            Value::Text(s) => {
                let mut len_buf = Vec::new();
                1 + varint::encode_varint(s.len() as u32, &mut len_buf) + s.len()
            }
            Value::Blob(b) => {
                let mut len_buf = Vec::new();
                1 + varint::encode_varint(b.len() as u32, &mut len_buf) + b.len()
            }
        }
    }

    /// Reads one wire-encoded value from `cursor`, advancing it past
    /// the value. Fails with `CorruptFormat` on an unknown tag, a
    /// truncated payload, or a text/blob length that runs past the
    /// end of the slice.
    pub fn deserialize(cursor: &mut Cursor<&[u8]>) -> CsResult<Value> {
        let tag = cursor
            .read_u8()
            .map_err(|_| CsError::CorruptFormat("truncated value tag".into()))?;
        match tag {
            TAG_UNDEF => Ok(Value::Undef),
            TAG_NULL => Ok(Value::Null),
            TAG_INT64 => {
                let v = cursor
                    .read_i64::<BigEndian>()
                    .map_err(|_| CsError::CorruptFormat("truncated int64".into()))?;
                Ok(Value::Int64(v))
            }
            TAG_FLOAT64 => {
                let bits = cursor
                    .read_u64::<BigEndian>()
                    .map_err(|_| CsError::CorruptFormat("truncated float64".into()))?;
                Ok(Value::Float64(f64::from_bits(bits)))
            }
            TAG_TEXT => {
                let bytes = read_length_prefixed(cursor)?;
                let s = String::from_utf8(bytes)?;
                Ok(Value::Text(s))
            }
            TAG_BLOB => {
                let bytes = read_length_prefixed(cursor)?;
                Ok(Value::Blob(bytes))
            }
            other => Err(CsError::CorruptFormat(format!(
                "unknown value tag 0x{other:02x}"
            ))),
        }
    }

    /// Computes the byte length of the value encoded at the front of
    /// `bytes`, without materializing it. Mirrors `deserialize`'s
    /// layout rules but only ever touches the length prefix for
    /// TEXT/BLOB.
    pub fn size_at(bytes: &[u8]) -> CsResult<usize> {
        let tag = *bytes
            .first()
            .ok_or_else(|| CsError::CorruptFormat("truncated value tag".into()))?;
        match tag {
            TAG_UNDEF | TAG_NULL => Ok(1),
            TAG_INT64 | TAG_FLOAT64 => {
                if bytes.len() < 9 {
                    Err(CsError::CorruptFormat("truncated fixed-width value".into()))
                } else {
                    Ok(9)
                }
            }
            TAG_TEXT | TAG_BLOB => {
                let (len, varint_len) = varint::decode_varint(&bytes[1..])?;
                let total = 1 + varint_len + len as usize;
                if bytes.len() < total {
                    Err(CsError::CorruptFormat(
                        "text/blob length extends past record bounds".into(),
                    ))
                } else {
                    Ok(total)
                }
            }
            other => Err(CsError::CorruptFormat(format!(
                "unknown value tag 0x{other:02x}"
            ))),
        }
    }
}

fn read_length_prefixed(cursor: &mut Cursor<&[u8]>) -> CsResult<Vec<u8>> {
    let remaining = {
        let pos = cursor.position() as usize;
        let data = *cursor.get_ref();
        &data[pos..]
    };
    let (len, varint_len) = varint::decode_varint(remaining)?;
    let len = len as usize;
    if remaining.len() < varint_len + len {
        return Err(CsError::CorruptFormat(
            "text/blob length extends past record bounds".into(),
        ));
    }
    let start = varint_len;
    let bytes = remaining[start..start + len].to_vec();
    cursor.set_position(cursor.position() + (varint_len + len) as u64);
    Ok(bytes)
}
