//! Binary writer for the persisted state layout.

/// A small append-only byte buffer with length-prefixed helpers.
///
/// Everything is little-endian; length prefixes are `u32`.
#[derive(Debug, Default)]
pub struct BinaryWriter {
    buffer: Vec<u8>,
}

impl BinaryWriter {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_fixed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Writes a `u32` length prefix followed by the raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_u32(bytes.len() as u32);
        self.buffer.extend_from_slice(bytes);
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn write_string(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BinaryReader;

    #[test]
    fn round_trips_mixed_fields() {
        let mut writer = BinaryWriter::new();
        writer.write_u32(7);
        writer.write_string("starstream_resume_auction");
        writer.write_bytes(&[1, 2, 3, 4]);
        writer.write_u64(u64::MAX);

        let bytes = writer.into_bytes();
        let mut reader = BinaryReader::new(&bytes);
        assert_eq!(reader.read_u32().unwrap(), 7);
        assert_eq!(reader.read_string().unwrap(), "starstream_resume_auction");
        assert_eq!(reader.read_bytes().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(reader.read_u64().unwrap(), u64::MAX);
        assert!(reader.is_eof());
    }
}
