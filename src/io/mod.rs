//! Primitive binary framing: a buffered, CRC-accumulating [`Writer`]/[`Reader`] pair.
//!
//! This replaces a stateless encode/decode trait pair with objects that carry a running
//! CRC-32 (the same IEEE/zlib polynomial computed by [`crc32fast`], reversed polynomial
//! `0xEDB88320`, initial value `0xFFFFFFFF`, finalized by bitwise NOT) over every byte
//! written or read, including bytes advanced via [`Reader::skip`]. The main file header and
//! each WAL entry both need "checksum of everything after this point", which a stateless
//! encoder can't give you without a second pass — so the CRC lives on the `Writer`/`Reader`
//! itself rather than being bolted on by callers.
//!
//! All multi-byte integers are explicit little-endian. Strings are length-prefixed with a
//! `u16` (not `u32`): record payloads here are small and bounded by a configurable cap
//! (default 4096 bytes), unlike the general-purpose encoding this module's sibling
//! `encoding` layer used to provide.

#[cfg(test)]
mod tests;

use std::io::{self, Read, Write};

use thiserror::Error;

/// Default maximum accepted length for a decoded string, in bytes.
pub const DEFAULT_STRING_CAP: u16 = 4096;

/// Errors produced by [`Writer`] and [`Reader`].
#[derive(Debug, Error)]
pub enum IoFrameError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A decoded string exceeded the configured cap.
    #[error("string length {len} exceeds cap {cap}")]
    StringTooLong {
        /// Length claimed by the wire-format prefix.
        len: usize,
        /// Configured maximum.
        cap: u16,
    },

    /// Decoded bytes were not valid UTF-8.
    #[error("invalid UTF-8 in decoded string")]
    InvalidUtf8,
}

type FrameResult<T> = std::result::Result<T, IoFrameError>;

/// A buffered writer that accumulates a running CRC-32 over every byte written.
pub struct Writer<W: Write> {
    inner: W,
    hasher: crc32fast::Hasher,
}

impl<W: Write> Writer<W> {
    /// Wrap `inner`, starting a fresh CRC accumulator.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
        }
    }

    /// The CRC-32 of every byte written so far.
    pub fn crc(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Write a raw buffer verbatim.
    pub fn write_bytes(&mut self, buf: &[u8]) -> FrameResult<()> {
        self.inner.write_all(buf)?;
        self.hasher.update(buf);
        Ok(())
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, v: u8) -> FrameResult<()> {
        self.write_bytes(&[v])
    }

    /// Write a `u16`, little-endian.
    pub fn write_u16(&mut self, v: u16) -> FrameResult<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    /// Write a `u32`, little-endian.
    pub fn write_u32(&mut self, v: u32) -> FrameResult<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    /// Write a `u64`, little-endian.
    pub fn write_u64(&mut self, v: u64) -> FrameResult<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    /// Write an `i64`, little-endian.
    pub fn write_i64(&mut self, v: i64) -> FrameResult<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    /// Write an `f64`, little-endian.
    pub fn write_f64(&mut self, v: f64) -> FrameResult<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    /// Write a `bool` as a single `0x00`/`0x01` byte.
    pub fn write_bool(&mut self, v: bool) -> FrameResult<()> {
        self.write_u8(if v { 1 } else { 0 })
    }

    /// Write a `u16`-length-prefixed UTF-8 string. The caller is responsible for ensuring
    /// `s.len()` fits the configured cap on the reading side; writers do not enforce a cap
    /// (a record type that writes an oversize string will simply fail to read back).
    pub fn write_str(&mut self, s: &str) -> FrameResult<()> {
        let len: u16 = s
            .len()
            .try_into()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "string too long"))?;
        self.write_u16(len)?;
        self.write_bytes(s.as_bytes())
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) -> FrameResult<()> {
        self.inner.flush()?;
        Ok(())
    }

    /// Consume the writer, returning the wrapped value.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// A buffered reader that accumulates a running CRC-32 over every byte read or skipped.
pub struct Reader<R: Read> {
    inner: R,
    hasher: crc32fast::Hasher,
    string_cap: u16,
}

impl<R: Read> Reader<R> {
    /// Wrap `inner` with the default string cap ([`DEFAULT_STRING_CAP`]).
    pub fn new(inner: R) -> Self {
        Self::with_string_cap(inner, DEFAULT_STRING_CAP)
    }

    /// Wrap `inner`, rejecting any decoded string longer than `string_cap`.
    pub fn with_string_cap(inner: R, string_cap: u16) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
            string_cap,
        }
    }

    /// The CRC-32 of every byte read (or skipped) so far.
    pub fn crc(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Read exactly `buf.len()` bytes.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> FrameResult<()> {
        self.inner.read_exact(buf)?;
        self.hasher.update(buf);
        Ok(())
    }

    /// Read `len` bytes into a freshly allocated `Vec<u8>`.
    pub fn read_vec(&mut self, len: usize) -> FrameResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_bytes(&mut buf)?;
        Ok(buf)
    }

    /// Advance past `len` bytes without materializing them, still folding them into the
    /// running CRC. Used by [`crate::record::Record::skip`] to pass over a record the
    /// caller isn't interested in.
    pub fn skip(&mut self, len: usize) -> FrameResult<()> {
        const CHUNK: usize = 4096;
        let mut remaining = len;
        let mut buf = [0u8; CHUNK];
        while remaining > 0 {
            let n = remaining.min(CHUNK);
            self.read_bytes(&mut buf[..n])?;
            remaining -= n;
        }
        Ok(())
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> FrameResult<u8> {
        let mut b = [0u8; 1];
        self.read_bytes(&mut b)?;
        Ok(b[0])
    }

    /// Read a `u16`, little-endian.
    pub fn read_u16(&mut self) -> FrameResult<u16> {
        let mut b = [0u8; 2];
        self.read_bytes(&mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    /// Read a `u32`, little-endian.
    pub fn read_u32(&mut self) -> FrameResult<u32> {
        let mut b = [0u8; 4];
        self.read_bytes(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    /// Read a `u64`, little-endian.
    pub fn read_u64(&mut self) -> FrameResult<u64> {
        let mut b = [0u8; 8];
        self.read_bytes(&mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    /// Read an `i64`, little-endian.
    pub fn read_i64(&mut self) -> FrameResult<i64> {
        let mut b = [0u8; 8];
        self.read_bytes(&mut b)?;
        Ok(i64::from_le_bytes(b))
    }

    /// Read an `f64`, little-endian.
    pub fn read_f64(&mut self) -> FrameResult<f64> {
        let mut b = [0u8; 8];
        self.read_bytes(&mut b)?;
        Ok(f64::from_le_bytes(b))
    }

    /// Read a `bool` from a single byte (any nonzero byte is `true`).
    pub fn read_bool(&mut self) -> FrameResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a `u16`-length-prefixed UTF-8 string, rejecting lengths beyond the configured
    /// cap.
    pub fn read_str(&mut self) -> FrameResult<String> {
        let len = self.read_u16()?;
        if len > self.string_cap {
            return Err(IoFrameError::StringTooLong {
                len: len as usize,
                cap: self.string_cap,
            });
        }
        let buf = self.read_vec(len as usize)?;
        String::from_utf8(buf).map_err(|_| IoFrameError::InvalidUtf8)
    }

    /// Consume the reader, returning the wrapped value.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Compute the CRC-32 of a byte slice directly (used when a caller already has a
/// contiguous buffer and doesn't need the incremental `Writer`/`Reader` wrapper, e.g. the
/// main file's "checksum of everything after the header" patch-after-the-fact step).
pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}
