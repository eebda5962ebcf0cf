//! Avro binary primitives: zig-zag varints, IEEE floats, length-prefixed bytes.
use crate::error::{Error, Result};

pub fn write_long(buf: &mut Vec<u8>, v: i64) {
    let mut n = ((v << 1) ^ (v >> 63)) as u64;
    while n >= 0x80 {
        buf.push((n as u8 & 0x7f) | 0x80);
        n >>= 7;
    }
    buf.push(n as u8);
}

pub fn write_int(buf: &mut Vec<u8>, v: i32) {
    write_long(buf, i64::from(v));
}

pub fn write_bool(buf: &mut Vec<u8>, v: bool) {
    buf.push(u8::from(v));
}

pub fn write_float(buf: &mut Vec<u8>, v: f32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub fn write_double(buf: &mut Vec<u8>, v: f64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub fn write_bytes(buf: &mut Vec<u8>, v: &[u8]) {
    write_long(buf, v.len() as i64);
    buf.extend_from_slice(v);
}

pub fn write_string(buf: &mut Vec<u8>, v: &str) {
    write_bytes(buf, v.as_bytes());
}

/// Deepest record nesting a decode follows before giving up.
pub const MAX_DEPTH: usize = 128;

/// Most items one collection of zero-width elements (`null`, or records of
/// nothing but `null`s) may claim; such items consume no input.
pub const MAX_ZERO_WIDTH_ITEMS: usize = 1 << 16;

/// Cursor over one Avro body. Every read is bounds-checked.
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Decoder { buf, pos: 0, depth: 0 }
    }

    /// Run `f` one record level deeper. Past [`MAX_DEPTH`] the input is
    /// rejected instead of recursing further.
    pub fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_DEPTH {
            return Err(Error::malformed(format!(
                "records nested deeper than {MAX_DEPTH} levels at offset {}",
                self.pos
            )));
        }
        self.depth += 1;
        let out = f(self);
        self.depth -= 1;
        out
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(Error::malformed(format!(
                "need {n} bytes at offset {}, only {} left",
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_long(&mut self) -> Result<i64> {
        let start = self.pos;
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = *self
                .buf
                .get(self.pos)
                .ok_or_else(|| Error::malformed(format!("varint at offset {start} is truncated")))?;
            self.pos += 1;
            if shift == 63 && byte > 1 {
                return Err(Error::malformed(format!("varint at offset {start} overflows 64 bits")));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        Ok((value >> 1) as i64 ^ -((value & 1) as i64))
    }

    pub fn read_int(&mut self) -> Result<i32> {
        let start = self.pos;
        let v = self.read_long()?;
        i32::try_from(v).map_err(|_| Error::malformed(format!("int at offset {start} is out of range: {v}")))
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        match self.take(1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::malformed(format!("invalid boolean byte {other:#04x}"))),
        }
    }

    pub fn read_float(&mut self) -> Result<f32> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_double(&mut self) -> Result<f64> {
        let b = self.take(8)?;
        Ok(f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    fn read_len(&mut self) -> Result<usize> {
        let start = self.pos;
        let len = self.read_long()?;
        usize::try_from(len).map_err(|_| Error::malformed(format!("negative length {len} at offset {start}")))
    }

    pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_len()?;
        self.take(len)
    }

    pub fn read_string(&mut self) -> Result<&'a str> {
        let start = self.pos;
        let bytes = self.read_bytes()?;
        std::str::from_utf8(bytes).map_err(|e| Error::malformed(format!("string at offset {start}: {e}")))
    }

    /// Item count of the next array/map block; 0 ends the sequence. Negative
    /// counts are followed by the block's byte size, which is skipped.
    pub fn read_block_len(&mut self) -> Result<usize> {
        let start = self.pos;
        let count = self.read_long()?;
        if count < 0 {
            self.read_long()?;
        }
        usize::try_from(count.unsigned_abs())
            .map_err(|_| Error::malformed(format!("block count {count} at offset {start} is too large")))
    }

    /// Item count of the next block of a collection already holding `taken`
    /// items. An item that is not zero-width takes at least one byte, so a
    /// count beyond the bytes left cannot be honest.
    pub fn next_block(&mut self, zero_width: bool, taken: usize) -> Result<usize> {
        let start = self.pos;
        let count = self.read_block_len()?;
        if zero_width {
            if taken.saturating_add(count) > MAX_ZERO_WIDTH_ITEMS {
                return Err(Error::malformed(format!(
                    "block at offset {start} claims more than {MAX_ZERO_WIDTH_ITEMS} empty items"
                )));
            }
        } else if count > self.remaining() {
            return Err(Error::malformed(format!(
                "block at offset {start} claims {count} items, only {} bytes left",
                self.remaining()
            )));
        }
        Ok(count)
    }

    /// Fails when bytes are left over after the datum.
    pub fn finish(self) -> Result<()> {
        if self.remaining() == 0 {
            Ok(())
        } else {
            Err(Error::malformed(format!("{} trailing bytes after the datum", self.remaining())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_bytes(v: i64) -> Vec<u8> {
        let mut buf = Vec::new();
        write_long(&mut buf, v);
        buf
    }

    #[test]
    fn zigzag_matches_the_avro_reference_vectors() {
        assert_eq!(long_bytes(0), [0x00]);
        assert_eq!(long_bytes(-1), [0x01]);
        assert_eq!(long_bytes(1), [0x02]);
        assert_eq!(long_bytes(-64), [0x7f]);
        assert_eq!(long_bytes(64), [0x80, 0x01]);
        assert_eq!(long_bytes(i64::MIN).len(), 10);
    }

    #[test]
    fn extremes_decode() {
        for v in [i64::MIN, i64::MAX, -1, 0, 1, 300] {
            let buf = long_bytes(v);
            let mut r = Decoder::new(&buf);
            assert_eq!(r.read_long().unwrap(), v);
            r.finish().unwrap();
        }
    }

    #[test]
    fn truncated_and_overlong_varints_are_malformed() {
        assert!(matches!(Decoder::new(&[0x80]).read_long(), Err(Error::Malformed(_))));
        let overlong = [0xff; 11];
        assert!(matches!(Decoder::new(&overlong).read_long(), Err(Error::Malformed(_))));
    }

    #[test]
    fn strings_check_length_and_encoding() {
        let mut buf = Vec::new();
        write_string(&mut buf, "héllo");
        assert_eq!(Decoder::new(&buf).read_string().unwrap(), "héllo");

        // claims 10 bytes, has 1
        assert!(Decoder::new(&[0x14, b'a']).read_string().is_err());
        // negative length
        assert!(Decoder::new(&[0x01]).read_bytes().is_err());
        // invalid utf-8
        assert!(Decoder::new(&[0x02, 0xff]).read_string().is_err());
    }

    #[test]
    fn negative_block_counts_skip_the_size() {
        // count -2, size 4
        let mut r = Decoder::new(&[0x03, 0x08]);
        assert_eq!(r.read_block_len().unwrap(), 2);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn block_counts_are_bounded_by_the_input() {
        // 1000 items, 2 bytes left
        let mut buf = long_bytes(1000);
        buf.extend_from_slice(&[0x02, 0x02]);
        assert!(matches!(Decoder::new(&buf).next_block(false, 0), Err(Error::Malformed(_))));
        assert_eq!(Decoder::new(&buf).next_block(true, 0).unwrap(), 1000);

        let huge = long_bytes(i64::MAX);
        assert!(matches!(Decoder::new(&huge).next_block(true, 0), Err(Error::Malformed(_))));
        assert!(Decoder::new(&long_bytes(10)).next_block(true, MAX_ZERO_WIDTH_ITEMS - 5).is_err());
    }

    #[test]
    fn nesting_stops_at_the_depth_limit() {
        fn descend(r: &mut Decoder<'_>, levels: usize) -> Result<usize> {
            if levels == 0 {
                return Ok(0);
            }
            r.nested(|r| descend(r, levels - 1).map(|n| n + 1))
        }
        let mut r = Decoder::new(&[]);
        assert_eq!(descend(&mut r, MAX_DEPTH).unwrap(), MAX_DEPTH);
        assert!(matches!(descend(&mut r, MAX_DEPTH + 1), Err(Error::Malformed(_))));
        // the failed descent unwound its levels
        assert_eq!(descend(&mut r, 3).unwrap(), 3);
    }

    #[test]
    fn trailing_bytes_are_reported() {
        let mut r = Decoder::new(&[0x02, 0x00]);
        r.read_long().unwrap();
        assert!(r.finish().is_err());
    }
}
