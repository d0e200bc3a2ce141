//! The transaction log: an ordered, observable record of every host-mediated
//! exchange within a transaction. This is what an external interleaving
//! prover binds to.

use crate::program_id::ProgramId;
use starstream_io::{BinaryReader, BinaryWriter, Result as IoResult};

/// The kind of host-mediated exchange a log entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogTag {
    New,
    Resume,
    Yield,
    Query,
    Mutate,
    Consume,
    Mint,
    Burn,
    Event,
}

impl LogTag {
    fn as_u8(self) -> u8 {
        match self {
            LogTag::New => 0,
            LogTag::Resume => 1,
            LogTag::Yield => 2,
            LogTag::Query => 3,
            LogTag::Mutate => 4,
            LogTag::Consume => 5,
            LogTag::Mint => 6,
            LogTag::Burn => 7,
            LogTag::Event => 8,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => LogTag::New,
            1 => LogTag::Resume,
            2 => LogTag::Yield,
            3 => LogTag::Query,
            4 => LogTag::Mutate,
            5 => LogTag::Consume,
            6 => LogTag::Mint,
            7 => LogTag::Burn,
            8 => LogTag::Event,
            _ => return None,
        })
    }
}

/// One entry: (tag, program id, operation name, input bytes, output bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionLogEntry {
    pub tag: LogTag,
    pub program_id: ProgramId,
    pub operation: String,
    pub input: Vec<u8>,
    pub output: Vec<u8>,
}

impl TransactionLogEntry {
    fn write(&self, writer: &mut BinaryWriter) {
        writer.write_u8(self.tag.as_u8());
        writer.write_fixed(self.program_id.as_bytes());
        writer.write_string(&self.operation);
        writer.write_bytes(&self.input);
        writer.write_bytes(&self.output);
    }

    fn read(reader: &mut BinaryReader) -> IoResult<Option<Self>> {
        let tag = match LogTag::from_u8(reader.read_u8()?) {
            Some(tag) => tag,
            None => return Ok(None),
        };
        let program_id = ProgramId::from_bytes(reader.read_fixed::<32>()?);
        let operation = reader.read_string()?;
        let input = reader.read_bytes()?;
        let output = reader.read_bytes()?;
        Ok(Some(Self {
            tag,
            program_id,
            operation,
            input,
            output,
        }))
    }
}

/// The append-only, in-program-order log of a single transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxLog(Vec<TransactionLogEntry>);

impl TxLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: TransactionLogEntry) {
        self.0.push(entry);
    }

    pub fn entries(&self) -> &[TransactionLogEntry] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::with_capacity(self.0.len() * 64);
        writer.write_u32(self.0.len() as u32);
        for entry in &self.0 {
            entry.write(&mut writer);
        }
        writer.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> IoResult<Self> {
        let mut reader = BinaryReader::new(bytes);
        let count = reader.read_u32()?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            if let Some(entry) = TransactionLogEntry::read(&mut reader)? {
                entries.push(entry);
            }
        }
        Ok(Self(entries))
    }
}
