//! The bit-exact cell wire format.
//!
//! `total-length (i32 BE)`, `flags (i16 BE)`: low 12 bits are the payload
//! type tag, bit 13 marks null, bit 14 marks a deflate-compressed payload.
//! Compression is only attempted for `String`/`Binary`/`Object` payloads
//! longer than [`COMPRESSION_THRESHOLD`] bytes uncompressed, and only kept
//! when the deflated form is strictly smaller.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use rdbcore_primitives::BlobRef;

use crate::buffer::{BufReader, BufWriter, DecodeError};
use crate::value::{Numeric, NumericState, TObject};

pub const TYPE_BOOLEAN: u16 = 1;
pub const TYPE_I64: u16 = 2;
pub const TYPE_NUMERIC: u16 = 3;
pub const TYPE_STRING: u16 = 4;
pub const TYPE_DATE: u16 = 5;
pub const TYPE_BINARY: u16 = 6;
pub const TYPE_OBJECT: u16 = 7;

const FLAG_TYPE_MASK: u16 = 0x0FFF;
const FLAG_NULL: u16 = 1 << 12;
const FLAG_COMPRESSED: u16 = 1 << 13;

/// Payloads shorter than this are never worth attempting to compress.
pub const COMPRESSION_THRESHOLD: usize = 150;

/// Encodes `value` as a cell, given the column's declared payload type
/// (needed to give a `Null` cell a type tag, since `TObject::Null` doesn't
/// carry one itself).
pub fn encode_cell(value: &TObject, column_type: u16, out: &mut Vec<u8>) {
    if value.is_null() {
        out.put_i32(2);
        out.put_u16(FLAG_NULL | (column_type & FLAG_TYPE_MASK));
        return;
    }

    let type_tag = value.type_tag().expect("non-null value has a type tag");
    let mut payload = Vec::new();
    encode_payload(value, &mut payload);

    let compressible = matches!(value, TObject::String(_) | TObject::Binary(_) | TObject::Object(..));
    if compressible && payload.len() > COMPRESSION_THRESHOLD {
        if let Some(compressed) = try_deflate(&payload) {
            let mut body = Vec::with_capacity(4 + compressed.len());
            body.put_i32(payload.len() as i32);
            body.put_slice(&compressed);
            out.put_i32((2 + body.len()) as i32);
            out.put_u16(FLAG_COMPRESSED | (type_tag & FLAG_TYPE_MASK));
            out.put_slice(&body);
            return;
        }
    }

    out.put_i32((2 + payload.len()) as i32);
    out.put_u16(type_tag & FLAG_TYPE_MASK);
    out.put_slice(&payload);
}

/// Decodes one cell, returning the value and the type tag it (or the
/// column, for a null cell) was encoded with.
pub fn decode_cell<'a>(reader: &mut impl BufReader<'a>) -> Result<(TObject, u16), DecodeError> {
    let total_len = reader.get_i32()? as usize;
    let body = reader.get_slice(total_len)?;
    let mut body = crate::buffer::Cursor::new(body);

    let flags = body.get_u16()?;
    let type_tag = flags & FLAG_TYPE_MASK;
    let is_null = flags & FLAG_NULL != 0;
    let is_compressed = flags & FLAG_COMPRESSED != 0;

    if is_null {
        return Ok((TObject::Null, type_tag));
    }

    let remaining = body.get_slice(body.remaining())?;
    let payload = if is_compressed {
        let mut cur = crate::buffer::Cursor::new(remaining);
        let uncompressed_len = cur.get_i32()? as usize;
        let deflated = cur.get_slice(cur.remaining())?;
        inflate(deflated, uncompressed_len)?
    } else {
        remaining.to_vec()
    };

    let value = decode_payload(type_tag, &payload)?;
    Ok((value, type_tag))
}

fn encode_payload(value: &TObject, out: &mut Vec<u8>) {
    match value {
        TObject::Null => {}
        TObject::Boolean(b) => out.put_u8(if *b { 1 } else { 0 }),
        TObject::I64(v) => out.put_i64(*v),
        TObject::Numeric(n) => {
            out.put_u8(n.state.to_tag());
            out.put_i16(n.scale);
            out.put_i32(n.magnitude.len() as i32);
            out.put_slice(&n.magnitude);
        }
        TObject::String(s) => {
            let units: Vec<u16> = s.encode_utf16().collect();
            out.put_i32(units.len() as i32);
            for unit in units {
                out.put_u16(unit);
            }
        }
        TObject::Date(ms) => out.put_i64(*ms),
        TObject::Binary(blob) => {
            out.put_i32(8);
            out.put_u64(blob.raw());
        }
        TObject::Object(blob, class_tag) => {
            out.put_i32(12);
            out.put_u32(*class_tag);
            out.put_u64(blob.raw());
        }
    }
}

fn decode_payload(type_tag: u16, payload: &[u8]) -> Result<TObject, DecodeError> {
    let mut cur = crate::buffer::Cursor::new(payload);
    match type_tag {
        TYPE_BOOLEAN => Ok(TObject::Boolean(cur.get_u8()? != 0)),
        TYPE_I64 => Ok(TObject::I64(cur.get_i64()?)),
        TYPE_NUMERIC => {
            let state_tag = cur.get_u8()?;
            let state = NumericState::from_tag(state_tag).ok_or(DecodeError::InvalidTag {
                what: "Numeric state",
                tag: state_tag as u32,
            })?;
            let scale = cur.get_i16()?;
            let len = cur.get_i32()? as usize;
            let magnitude = cur.get_slice(len)?.to_vec();
            Ok(TObject::Numeric(Numeric { state, scale, magnitude }))
        }
        TYPE_STRING => {
            let len = cur.get_i32()? as usize;
            let mut units = Vec::with_capacity(len);
            for _ in 0..len {
                units.push(cur.get_u16()?);
            }
            let s = String::from_utf16(&units).map_err(|_| DecodeError::InvalidTag {
                what: "String code units",
                tag: type_tag as u32,
            })?;
            Ok(TObject::String(s))
        }
        TYPE_DATE => Ok(TObject::Date(cur.get_i64()?)),
        TYPE_BINARY => {
            let len = cur.get_i32()? as usize;
            let bytes = cur.get_slice(len)?;
            let mut id = [0u8; 8];
            id.copy_from_slice(&bytes[..8]);
            Ok(TObject::Binary(BlobRef::new(u64::from_be_bytes(id))))
        }
        TYPE_OBJECT => {
            let len = cur.get_i32()? as usize;
            let bytes = cur.get_slice(len)?;
            let class_tag = u32::from_be_bytes(bytes[..4].try_into().unwrap());
            let mut id = [0u8; 8];
            id.copy_from_slice(&bytes[4..12]);
            Ok(TObject::Object(BlobRef::new(u64::from_be_bytes(id)), class_tag))
        }
        other => Err(DecodeError::InvalidTag {
            what: "cell payload type",
            tag: other as u32,
        }),
    }
}

/// Order-preserving bytes for a cell value, for use as an `IndexSet` sort
/// key. `Null` sorts before every non-null value of the same column;
/// signed integers are encoded by flipping the sign bit so big-endian byte
/// order matches numeric order.
///
/// Only the scalar types an index column can hold are meaningful here
/// (`Boolean`, `I64`, `String`, `Date`); `Numeric`/`Binary`/`Object` are
/// encoded too (for `ColList`-uniform code paths) but only compare
/// consistently within a single column's own value domain.
pub fn index_key_bytes(value: &TObject) -> Vec<u8> {
    let mut out = Vec::new();
    match value {
        TObject::Null => out.push(0),
        TObject::Boolean(b) => {
            out.push(1);
            out.push(*b as u8);
        }
        TObject::I64(v) => {
            out.push(1);
            out.extend_from_slice(&(*v as u64 ^ 0x8000_0000_0000_0000).to_be_bytes());
        }
        TObject::Date(ms) => {
            out.push(1);
            out.extend_from_slice(&(*ms as u64 ^ 0x8000_0000_0000_0000).to_be_bytes());
        }
        TObject::String(s) => {
            out.push(1);
            out.extend_from_slice(s.as_bytes());
        }
        TObject::Numeric(n) => {
            out.push(1);
            out.push(n.state.to_tag());
            out.extend_from_slice(&n.magnitude);
        }
        TObject::Binary(blob) => {
            out.push(1);
            out.extend_from_slice(&blob.raw().to_be_bytes());
        }
        TObject::Object(blob, _) => {
            out.push(1);
            out.extend_from_slice(&blob.raw().to_be_bytes());
        }
    }
    out
}

fn try_deflate(payload: &[u8]) -> Option<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload).ok()?;
    let compressed = encoder.finish().ok()?;
    (compressed.len() < payload.len()).then_some(compressed)
}

fn inflate(compressed: &[u8], uncompressed_len: usize) -> Result<Vec<u8>, DecodeError> {
    let mut decoder = DeflateDecoder::new(compressed);
    let mut out = Vec::with_capacity(uncompressed_len);
    decoder.read_to_end(&mut out).map_err(|_| DecodeError::InvalidTag {
        what: "deflate stream",
        tag: 0,
    })?;
    Ok(out)
}
