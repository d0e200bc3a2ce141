//! The transaction scheduler (§4.6): instantiates a fresh coordination
//! instance, drives its entry point to completion, and commits the
//! resulting Universe mutations or rolls them all back atomically.

use crate::coordination::{CoordinationDispatcher, TransactionState};
use starstream_config::HostConfig;
use starstream_core::{ContractRole, Handle, HostError, TxLog};
use starstream_universe::{Universe, Utxo, UtxoId};
use starstream_wasm::{ContractCode, ContractCodeRegistry, ContractInstance, HostImportDispatcher};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// What a committed transaction hands back to its caller (§4.6): either the
/// coordination entry point's raw scalar results, or — when those results
/// happen to equal a handle that is still live after commit — the `Utxo`
/// that handle names.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOutcome {
    Scalars(Vec<i64>),
    Utxo(Utxo),
}

/// A committed transaction's result plus the ordered log of every
/// host-mediated exchange it performed (§4.6 "the transaction log is
/// emitted").
#[derive(Debug, Clone)]
pub struct TransactionReceipt {
    pub outcome: TransactionOutcome,
    pub log: TxLog,
}

/// Drives transactions against a shared contract-code registry. Stateless
/// between calls: all per-transaction state lives in `TransactionState`,
/// created fresh by `run_transaction`.
pub struct Scheduler {
    registry: Arc<ContractCodeRegistry>,
    config: HostConfig,
}

impl Scheduler {
    pub fn new(registry: Arc<ContractCodeRegistry>, config: HostConfig) -> Self {
        Self { registry, config }
    }

    /// Runs one transaction. On success, `universe` reflects the commit; on
    /// any error, `universe` is byte-identical to its state before the call
    /// (P5) and the error is returned.
    pub fn run_transaction(
        &self,
        universe: &mut Universe,
        coordination_code: &ContractCode,
        entry_point: &str,
        inputs: &[i64],
    ) -> Result<TransactionReceipt, HostError> {
        let snapshot = universe.snapshot();
        let owned_universe = std::mem::take(universe);

        let state = Arc::new(Mutex::new(TransactionState::new(
            self.registry.clone(),
            coordination_code.program_id,
            owned_universe,
            self.config.handle_space,
        )));
        let dispatcher = Arc::new(CoordinationDispatcher::new(state.clone()));

        let outcome = self.drive_coordination(coordination_code, entry_point, inputs, dispatcher);

        let mut state = Arc::try_unwrap(state)
            .unwrap_or_else(|_| panic!("coordination instance outlived its own dispatcher"))
            .into_inner()
            .expect("lock poisoned");

        let result = outcome.and_then(|values| {
            if state.intermediates_pending > 0 {
                return Err(HostError::UnresolvedIntermediate {
                    count: state.intermediates_pending,
                });
            }
            self.commit(&mut state)?;
            Ok(self.resolve_outcome(&state, values))
        });

        match result {
            Ok(outcome) => {
                let log = std::mem::take(&mut state.log);
                *universe = state.universe;
                info!(entry_point, entries = log.len(), "transaction committed");
                Ok(TransactionReceipt { outcome, log })
            }
            Err(err) => {
                let mut restored = Universe::new();
                restored.restore(snapshot);
                *universe = restored;
                warn!(entry_point, error = %err, "transaction rolled back");
                Err(err)
            }
        }
    }

    fn drive_coordination(
        &self,
        code: &ContractCode,
        entry_point: &str,
        inputs: &[i64],
        dispatcher: Arc<CoordinationDispatcher>,
    ) -> Result<Vec<i64>, HostError> {
        let dispatcher: Arc<dyn HostImportDispatcher> = dispatcher;
        let mut instance = ContractInstance::instantiate(
            code,
            ContractRole::Coordination,
            Some(code.program_id),
            Some(dispatcher),
        )?;
        Ok(instance.call_direct(entry_point, inputs)?)
    }

    /// Persists every handle-table entry that is still alive, archiving its
    /// memory; drops every consumed or returned one (§4.6 "Commit").
    fn commit(&self, state: &mut TransactionState) -> Result<(), HostError> {
        let ids: Vec<UtxoId> = state.handles.installed_ids().collect();
        for id in ids {
            let Some(instance) = state.loaded.remove(&id) else {
                continue;
            };
            if instance.is_alive() {
                let record = instance.unload()?;
                state.universe.put(id, record);
            }
        }
        let mint_memory = state.mint_memory.lock().expect("lock poisoned").clone();
        state.universe.apply_mint_memory(mint_memory);
        Ok(())
    }

    /// §4.6 "Return value": substitutes the `Utxo` for a scalar return that
    /// matches a still-live handle, per the prototype's lossy convention.
    fn resolve_outcome(&self, state: &TransactionState, values: Vec<i64>) -> TransactionOutcome {
        if let [raw] = values[..] {
            if let Some(handle) = Handle::new(raw as u32, &self.config.handle_space) {
                if let Ok(id) = state.handles.resolve(handle) {
                    if let Some(utxo) = state.universe.get(id) {
                        return TransactionOutcome::Utxo(utxo.clone());
                    }
                }
            }
        }
        TransactionOutcome::Scalars(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starstream_wasm::new_engine;

    fn registry() -> Arc<ContractCodeRegistry> {
        Arc::new(ContractCodeRegistry::new(new_engine().unwrap()))
    }

    fn trivial_coordination() -> Vec<u8> {
        wat::parse_str(
            r#"
            (module
              (memory (export "memory") 1)
              (func (export "run") (result i64) (i64.const 99)))
            "#,
        )
        .unwrap()
    }

    #[test]
    fn a_trivial_transaction_commits_with_the_scalar_return() {
        let registry = registry();
        let code = registry.load(trivial_coordination()).unwrap();
        let scheduler = Scheduler::new(registry, HostConfig::default());
        let mut universe = Universe::new();

        let receipt = scheduler.run_transaction(&mut universe, &code, "run", &[]).unwrap();
        assert_eq!(receipt.outcome, TransactionOutcome::Scalars(vec![99]));
        assert!(universe.is_empty());
    }

    #[test]
    fn a_trapping_entry_point_leaves_the_universe_untouched() {
        let registry = registry();
        let bytes = wat::parse_str(
            r#"
            (module
              (memory (export "memory") 1)
              (func (export "run") (result i64) unreachable))
            "#,
        )
        .unwrap();
        let code = registry.load(bytes).unwrap();
        let scheduler = Scheduler::new(registry, HostConfig::default());
        let mut universe = Universe::new();
        let before = universe.snapshot();

        let result = scheduler.run_transaction(&mut universe, &code, "run", &[]);
        assert!(result.is_err());
        universe.restore(before);
        assert!(universe.is_empty());
    }
}
