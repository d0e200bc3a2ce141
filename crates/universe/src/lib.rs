//! The Universe: the ledger-side authoritative set of live UTXOs and their
//! tokens.
//!
//! The Universe is mutated only by the scheduler at transaction commit
//! time (§4.6); everything staged during a transaction lives in loaded
//! activations elsewhere and is discarded on failure. `snapshot`/`restore`
//! give that rollback boundary a concrete, testable implementation.

pub mod persist;
pub mod token;
pub mod utxo;

pub use token::TokenRecord;
pub use utxo::{Utxo, UtxoId, UtxoLifecycle};

use indexmap::IndexMap;
use starstream_core::ProgramId;
use std::collections::HashMap;
use tracing::debug;

/// A point-in-time copy of the Universe's live UTXO set, used to implement
/// atomic commit/rollback (P5).
#[derive(Debug, Clone)]
pub struct UniverseSnapshot {
    utxos: IndexMap<UtxoId, Utxo>,
    next_id: u64,
    mint_memory: HashMap<ProgramId, Vec<u8>>,
}

/// The set of live UTXOs and their attached tokens, plus the durable linear
/// memory of every token-mint program that has minted or burned anything.
/// A token-mint contract is stateless across transactions unless it keeps
/// its own state here (e.g. a running `supply` counter) — this is the only
/// thing a token-mint activation persists, since it has no UTXO lifecycle
/// of its own.
#[derive(Debug, Clone, Default)]
pub struct Universe {
    utxos: IndexMap<UtxoId, Utxo>,
    next_id: u64,
    mint_memory: HashMap<ProgramId, Vec<u8>>,
}

impl Universe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a fresh UTXO and returns its durable id.
    pub fn insert(&mut self, utxo: Utxo) -> UtxoId {
        let id = UtxoId::new(self.next_id);
        self.next_id += 1;
        debug!(%id, program_id = %utxo.program_id, "universe: insert");
        self.utxos.insert(id, utxo);
        id
    }

    /// Re-inserts (or overwrites) a UTXO under an id it already held, used
    /// by commit to persist a UTXO whose handle predates this transaction.
    pub fn put(&mut self, id: UtxoId, utxo: Utxo) {
        self.utxos.insert(id, utxo);
    }

    pub fn get(&self, id: UtxoId) -> Option<&Utxo> {
        self.utxos.get(&id)
    }

    pub fn get_mut(&mut self, id: UtxoId) -> Option<&mut Utxo> {
        self.utxos.get_mut(&id)
    }

    pub fn remove(&mut self, id: UtxoId) -> Option<Utxo> {
        self.utxos.shift_remove(&id)
    }

    pub fn contains(&self, id: UtxoId) -> bool {
        self.utxos.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (UtxoId, &Utxo)> {
        self.utxos.iter().map(|(id, utxo)| (*id, utxo))
    }

    /// A token-mint program's persisted linear memory, if it has ever
    /// minted or burned before.
    pub fn mint_memory(&self, program_id: ProgramId) -> Option<&[u8]> {
        self.mint_memory.get(&program_id).map(Vec::as_slice)
    }

    pub fn set_mint_memory(&mut self, program_id: ProgramId, bytes: Vec<u8>) {
        self.mint_memory.insert(program_id, bytes);
    }

    /// A snapshot of every token-mint program's persisted memory, used to
    /// seed a transaction's working copy.
    pub fn mint_memory_snapshot(&self) -> HashMap<ProgramId, Vec<u8>> {
        self.mint_memory.clone()
    }

    /// Replaces the persisted mint-memory set wholesale, used at commit to
    /// write back a transaction's working copy.
    pub fn apply_mint_memory(&mut self, memory: HashMap<ProgramId, Vec<u8>>) {
        self.mint_memory = memory;
    }

    /// Captures the current state for later `restore`.
    pub fn snapshot(&self) -> UniverseSnapshot {
        UniverseSnapshot {
            utxos: self.utxos.clone(),
            next_id: self.next_id,
            mint_memory: self.mint_memory.clone(),
        }
    }

    /// Discards any changes made since `snapshot` was taken.
    pub fn restore(&mut self, snapshot: UniverseSnapshot) {
        debug!(restored_count = snapshot.utxos.len(), "universe: restore");
        self.utxos = snapshot.utxos;
        self.next_id = snapshot.next_id;
        self.mint_memory = snapshot.mint_memory;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starstream_core::ProgramId;

    #[test]
    fn insert_assigns_distinct_ids() {
        let mut universe = Universe::new();
        let a = universe.insert(Utxo::new(ProgramId::of(b"a"), "main"));
        let b = universe.insert(Utxo::new(ProgramId::of(b"b"), "main"));
        assert_ne!(a, b);
        assert_eq!(universe.len(), 2);
    }

    #[test]
    fn restore_undoes_every_change_since_snapshot() {
        let mut universe = Universe::new();
        let kept = universe.insert(Utxo::new(ProgramId::of(b"kept"), "main"));
        let before = universe.snapshot();

        universe.insert(Utxo::new(ProgramId::of(b"new"), "main"));
        universe.remove(kept);
        assert_eq!(universe.len(), 1);

        universe.restore(before);
        assert_eq!(universe.len(), 1);
        assert!(universe.contains(kept));
    }
}
