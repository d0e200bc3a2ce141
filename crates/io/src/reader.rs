//! Binary reader for the persisted state layout.

use crate::error::{IoError, Result};

/// Maximum length accepted for any single length-prefixed field. Guards
/// against a corrupted length prefix causing an unbounded allocation.
pub const MAX_FIELD_LEN: usize = 64 * 1024 * 1024;

/// Cursor over a borrowed byte slice with length-prefixed helpers
/// matching [`crate::writer::BinaryWriter`].
pub struct BinaryReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BinaryReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn is_eof(&self) -> bool {
        self.position >= self.data.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(IoError::EndOfStream {
                wanted: len,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes: [u8; 4] = self.take(4)?.try_into().expect("exact length");
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let bytes: [u8; 8] = self.take(8)?.try_into().expect("exact length");
        Ok(u64::from_le_bytes(bytes))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let bytes: [u8; 8] = self.take(8)?.try_into().expect("exact length");
        Ok(i64::from_le_bytes(bytes))
    }

    pub fn read_fixed<const N: usize>(&mut self) -> Result<[u8; N]> {
        Ok(self.take(N)?.try_into().expect("exact length"))
    }

    /// Reads a `u32` length prefix followed by that many raw bytes.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u32()? as usize;
        if len > MAX_FIELD_LEN {
            return Err(IoError::LengthExceeded {
                field: "bytes",
                len,
                max: MAX_FIELD_LEN,
            });
        }
        Ok(self.take(len)?.to_vec())
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|_| IoError::InvalidUtf8 { field: "string" })
    }
}
