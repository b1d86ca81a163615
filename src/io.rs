//! Byte-stream helpers for the text serialization format
//!
//! The binary format goes straight through `std::io::Write`/`Read` (counts
//! via `byteorder`, entries via `bincode`). The text format additionally
//! needs a single-character assert-and-consume primitive and a way to stop
//! reading a decimal count at the first non-digit, so reads flow through
//! [`ByteReader`], a one-byte-lookahead wrapper over any `Read`.

use std::io::{Read, Write};

use crate::{AggError, Result};

/// Write a single delimiter character.
pub fn write_char<W: Write>(w: &mut W, ch: u8) -> Result<()> {
    w.write_all(&[ch])?;
    Ok(())
}

/// Write an unsigned integer in decimal text form.
pub fn write_text_u64<W: Write>(w: &mut W, n: u64) -> Result<()> {
    write!(w, "{}", n)?;
    Ok(())
}

// ============================================================================
// ByteReader
// ============================================================================

/// Sequential byte source with one byte of lookahead.
pub struct ByteReader<R> {
    inner: R,
    peeked: Option<u8>,
}

impl<R: Read> ByteReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, peeked: None }
    }

    /// Look at the next byte without consuming it. `None` at end of stream.
    pub fn peek(&mut self) -> Result<Option<u8>> {
        if self.peeked.is_none() {
            let mut buf = [0u8; 1];
            let n = self.inner.read(&mut buf)?;
            if n == 1 {
                self.peeked = Some(buf[0]);
            }
        }
        Ok(self.peeked)
    }

    /// Consume and return the next byte. `None` at end of stream.
    pub fn next_byte(&mut self) -> Result<Option<u8>> {
        let b = self.peek()?;
        self.peeked = None;
        Ok(b)
    }

    /// Consume one byte and fail unless it equals `expected`.
    pub fn assert_char(&mut self, expected: u8) -> Result<()> {
        match self.next_byte()? {
            Some(b) if b == expected => Ok(()),
            found => Err(AggError::UnexpectedByte {
                expected: expected as char,
                found: found.map(|b| b as char),
            }),
        }
    }

    /// Read a decimal unsigned integer, stopping at the first non-digit
    /// (which stays in the stream). At least one digit is required.
    pub fn read_text_u64(&mut self) -> Result<u64> {
        match self.peek()? {
            Some(b) if b.is_ascii_digit() => {}
            found => {
                return Err(AggError::MissingDigit {
                    found: found.map(|b| b as char),
                })
            }
        }

        let mut n: u64 = 0;
        while let Some(b) = self.peek()? {
            if !b.is_ascii_digit() {
                break;
            }
            self.peeked = None;
            n = n
                .checked_mul(10)
                .and_then(|n| n.checked_add(u64::from(b - b'0')))
                .ok_or(AggError::NumberOverflow)?;
        }
        Ok(n)
    }
}

impl<R: Read> Read for ByteReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(b) = self.peeked.take() {
            buf[0] = b;
            return Ok(1);
        }
        self.inner.read(buf)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_assert_char() {
        let mut r = ByteReader::new(Cursor::new(b"a,b"));
        r.assert_char(b'a').unwrap();
        r.assert_char(b',').unwrap();
        assert!(matches!(
            r.assert_char(b','),
            Err(AggError::UnexpectedByte { expected: ',', found: Some('b') })
        ));
        // end of stream
        assert!(r.assert_char(b',').is_err());
    }

    #[test]
    fn test_read_text_u64_stops_at_delimiter() {
        let mut r = ByteReader::new(Cursor::new(b"1234,56"));
        assert_eq!(r.read_text_u64().unwrap(), 1234);
        r.assert_char(b',').unwrap();
        assert_eq!(r.read_text_u64().unwrap(), 56);
        assert_eq!(r.next_byte().unwrap(), None);
    }

    #[test]
    fn test_read_text_u64_rejects_oversized_count() {
        // 21 digits, wider than u64: a parse error, never a wrap or panic
        let mut r = ByteReader::new(Cursor::new(b"999999999999999999999,"));
        assert!(matches!(r.read_text_u64(), Err(AggError::NumberOverflow)));

        // u64::MAX itself still parses
        let mut r = ByteReader::new(Cursor::new(b"18446744073709551615,"));
        assert_eq!(r.read_text_u64().unwrap(), u64::MAX);

        // one past u64::MAX overflows on the final add
        let mut r = ByteReader::new(Cursor::new(b"18446744073709551616,"));
        assert!(matches!(r.read_text_u64(), Err(AggError::NumberOverflow)));
    }

    #[test]
    fn test_read_text_u64_requires_digit() {
        let mut r = ByteReader::new(Cursor::new(b",1"));
        assert!(matches!(
            r.read_text_u64(),
            Err(AggError::MissingDigit { found: Some(',') })
        ));
    }

    #[test]
    fn test_read_serves_peeked_byte_first() {
        let mut r = ByteReader::new(Cursor::new(b"xyz"));
        assert_eq!(r.peek().unwrap(), Some(b'x'));
        let mut buf = [0u8; 3];
        let n = r.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"x");
        let n = r.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"yz");
    }
}
