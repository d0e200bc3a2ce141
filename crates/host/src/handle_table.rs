//! The coordination-local handle table (§4.4): a random 30-bit integer
//! naming each UTXO visible during one transaction, plus its reverse
//! mapping so re-naming the same UTXO twice is a no-op.

use rand::Rng;
use starstream_config::HandleSpace;
use starstream_core::{Handle, HostError};
use starstream_universe::UtxoId;
use std::collections::HashMap;

/// Maps handles to `UtxoId`s for the lifetime of a single transaction.
/// Never persisted (I6): a fresh table is created per `run_transaction` call.
#[derive(Debug, Default)]
pub struct HandleTable {
    space: HandleSpace,
    forward: HashMap<Handle, UtxoId>,
    reverse: HashMap<UtxoId, Handle>,
}

impl HandleTable {
    pub fn new(space: HandleSpace) -> Self {
        Self {
            space,
            forward: HashMap::new(),
            reverse: HashMap::new(),
        }
    }

    /// Installs `utxo_id` under a fresh handle, or returns its existing one
    /// if it is already visible in this transaction.
    pub fn install(&mut self, utxo_id: UtxoId) -> Handle {
        if let Some(existing) = self.reverse.get(&utxo_id) {
            return *existing;
        }
        let mut rng = rand::thread_rng();
        loop {
            let candidate = rng.gen_range(self.space.min..=self.space.max);
            let Some(handle) = Handle::new(candidate, &self.space) else {
                continue;
            };
            if let std::collections::hash_map::Entry::Vacant(entry) = self.forward.entry(handle) {
                entry.insert(utxo_id);
                self.reverse.insert(utxo_id, handle);
                return handle;
            }
        }
    }

    pub fn resolve(&self, handle: Handle) -> Result<UtxoId, HostError> {
        self.forward.get(&handle).copied().ok_or(HostError::UnknownHandle { handle: handle.get() })
    }

    pub fn handle_for(&self, utxo_id: UtxoId) -> Option<Handle> {
        self.reverse.get(&utxo_id).copied()
    }

    pub fn installed_ids(&self) -> impl Iterator<Item = UtxoId> + '_ {
        self.forward.values().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starstream_core::ProgramId;
    use starstream_universe::{Universe, Utxo};

    fn two_utxo_ids() -> (UtxoId, UtxoId) {
        let mut universe = Universe::new();
        let a = universe.insert(Utxo::new(ProgramId::of(b"a"), "main"));
        let b = universe.insert(Utxo::new(ProgramId::of(b"b"), "main"));
        (a, b)
    }

    #[test]
    fn install_is_idempotent_for_the_same_utxo() {
        let mut table = HandleTable::new(HandleSpace::default());
        let (id, _) = two_utxo_ids();
        let a = table.install(id);
        let b = table.install(id);
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_utxos_get_distinct_handles() {
        let mut table = HandleTable::new(HandleSpace::default());
        let (id_a, id_b) = two_utxo_ids();
        let a = table.install(id_a);
        let b = table.install(id_b);
        assert_ne!(a, b);
    }

    #[test]
    fn resolve_fails_on_unknown_handle() {
        let table = HandleTable::new(HandleSpace::default());
        let bogus = Handle::new(5, &HandleSpace::default()).unwrap();
        assert!(matches!(table.resolve(bogus), Err(HostError::UnknownHandle { .. })));
    }
}
