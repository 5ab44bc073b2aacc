//! The narrow buffer codec every bit-exact wire format in the workspace is
//! built on: big-endian fixed-width integers and raw byte slices, read from
//! and written to in-memory buffers.

use std::fmt;

/// Error produced when a [`BufReader`] is asked for more bytes than remain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("buffer underflow: needed {needed} bytes, had {available} remaining")]
    BufferLength { needed: usize, available: usize },
    #[error("invalid tag {tag} for {what}")]
    InvalidTag { what: &'static str, tag: u32 },
}

/// A source of bytes to decode from, always in big-endian byte order.
///
/// Implementations borrow from the underlying buffer for the lifetime `'a`,
/// so decoded slices (e.g. strings) can avoid copying where the caller
/// doesn't need to own them.
pub trait BufReader<'a> {
    fn get_slice(&mut self, len: usize) -> Result<&'a [u8], DecodeError>;
    fn remaining(&self) -> usize;

    fn get_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let slice = self.get_slice(N)?;
        Ok(slice.try_into().expect("get_slice(N) returns exactly N bytes"))
    }

    fn get_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.get_array::<1>()?[0])
    }

    fn get_i8(&mut self) -> Result<i8, DecodeError> {
        Ok(self.get_u8()? as i8)
    }

    fn get_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes(self.get_array()?))
    }

    fn get_i16(&mut self) -> Result<i16, DecodeError> {
        Ok(i16::from_be_bytes(self.get_array()?))
    }

    fn get_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes(self.get_array()?))
    }

    fn get_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_be_bytes(self.get_array()?))
    }

    fn get_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_be_bytes(self.get_array()?))
    }

    fn get_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_be_bytes(self.get_array()?))
    }
}

/// A sink of bytes to encode into, always in big-endian byte order.
pub trait BufWriter {
    fn put_slice(&mut self, slice: &[u8]);

    fn put_u8(&mut self, v: u8) {
        self.put_slice(&[v]);
    }

    fn put_i8(&mut self, v: i8) {
        self.put_u8(v as u8);
    }

    fn put_u16(&mut self, v: u16) {
        self.put_slice(&v.to_be_bytes());
    }

    fn put_i16(&mut self, v: i16) {
        self.put_slice(&v.to_be_bytes());
    }

    fn put_u32(&mut self, v: u32) {
        self.put_slice(&v.to_be_bytes());
    }

    fn put_i32(&mut self, v: i32) {
        self.put_slice(&v.to_be_bytes());
    }

    fn put_u64(&mut self, v: u64) {
        self.put_slice(&v.to_be_bytes());
    }

    fn put_i64(&mut self, v: i64) {
        self.put_slice(&v.to_be_bytes());
    }
}

impl BufWriter for Vec<u8> {
    fn put_slice(&mut self, slice: &[u8]) {
        self.extend_from_slice(slice);
    }
}

/// A [`BufReader`] over a borrowed byte slice, tracking a read position.
#[derive(Clone, Copy)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }
}

impl fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("pos", &self.pos)
            .field("len", &self.buf.len())
            .finish()
    }
}

impl<'a> BufReader<'a> for Cursor<'a> {
    fn get_slice(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::BufferLength {
                needed: len,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_fixed_width_integers() {
        let mut out = Vec::new();
        out.put_u8(1);
        out.put_i16(-2);
        out.put_u32(3);
        out.put_i64(-4);

        let mut cur = Cursor::new(&out);
        assert_eq!(cur.get_u8().unwrap(), 1);
        assert_eq!(cur.get_i16().unwrap(), -2);
        assert_eq!(cur.get_u32().unwrap(), 3);
        assert_eq!(cur.get_i64().unwrap(), -4);
        assert_eq!(cur.remaining(), 0);
    }

    #[test]
    fn underflow_is_reported_not_panicked() {
        let buf = [0u8; 2];
        let mut cur = Cursor::new(&buf);
        assert_eq!(
            cur.get_u32().unwrap_err(),
            DecodeError::BufferLength { needed: 4, available: 2 }
        );
    }
}
