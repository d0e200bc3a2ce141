//! Injected capability that populates the contract-code registry lazily.

use starstream_core::ProgramId;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

/// Supplies raw module bytes for a program id the registry hasn't seen yet.
pub trait ByteProvider: Send + Sync {
    fn bytes_for(&self, program_id: &ProgramId) -> Option<Vec<u8>>;
}

/// An in-memory byte provider, useful for tests and for embeddings that
/// preload every module up front.
#[derive(Default)]
pub struct MemoryByteProvider {
    modules: RwLock<HashMap<ProgramId, Vec<u8>>>,
}

impl MemoryByteProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `bytes` under its own computed id and returns that id.
    pub fn insert(&self, bytes: Vec<u8>) -> ProgramId {
        let id = ProgramId::of(&bytes);
        self.modules.write().expect("lock poisoned").insert(id, bytes);
        id
    }
}

impl ByteProvider for MemoryByteProvider {
    fn bytes_for(&self, program_id: &ProgramId) -> Option<Vec<u8>> {
        self.modules.read().expect("lock poisoned").get(program_id).cloned()
    }
}

/// Resolves a program id to `<dir>/<hex digest>.wasm` on disk.
pub struct DirectoryByteProvider {
    dir: PathBuf,
}

impl DirectoryByteProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, program_id: &ProgramId) -> PathBuf {
        self.dir.join(format!("{}.wasm", program_id.to_hex()))
    }
}

impl ByteProvider for DirectoryByteProvider {
    fn bytes_for(&self, program_id: &ProgramId) -> Option<Vec<u8>> {
        std::fs::read(self.path_for(program_id)).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_provider_round_trips_by_computed_id() {
        let provider = MemoryByteProvider::new();
        let id = provider.insert(b"module bytes".to_vec());
        assert_eq!(provider.bytes_for(&id), Some(b"module bytes".to_vec()));
    }

    #[test]
    fn memory_provider_misses_unknown_id() {
        let provider = MemoryByteProvider::new();
        assert_eq!(provider.bytes_for(&ProgramId::of(b"nope")), None);
    }

    #[test]
    fn directory_provider_reads_bytes_named_by_hex_digest() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = b"wasm bytes here".to_vec();
        let id = ProgramId::of(&bytes);
        std::fs::write(dir.path().join(format!("{}.wasm", id.to_hex())), &bytes).unwrap();

        let provider = DirectoryByteProvider::new(dir.path());
        assert_eq!(provider.bytes_for(&id), Some(bytes));
    }

    #[test]
    fn directory_provider_misses_absent_file() {
        let dir = tempfile::tempdir().unwrap();
        let provider = DirectoryByteProvider::new(dir.path());
        assert_eq!(provider.bytes_for(&ProgramId::of(b"missing")), None);
    }
}
