//! A loaded UTXO activation (§4.3): a `ContractInstance` under the `utxo`
//! role, paired with the durable bookkeeping (lifecycle state, attached
//! tokens) that the Universe persists once the activation is unloaded.

use crate::token::{TokenDispatcher, TokenHandleTable};
use starstream_config::HandleSpace;
use starstream_core::{ContractRole, HostError, ProgramId};
use starstream_universe::{TokenRecord, Utxo, UtxoId, UtxoLifecycle};
use starstream_wasm::{ContractCode, ContractCodeRegistry, ContractInstance, HostImportDispatcher, StepOutcome};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A live UTXO activation. At most one exists per `UtxoId` at any moment
/// (I4) — the scheduler enforces this by removing an id from its loaded set
/// before handing out a fresh one for the same id.
pub struct UtxoInstance {
    id: UtxoId,
    program_id: ProgramId,
    entry_point: String,
    state: UtxoLifecycle,
    tokens: Arc<Mutex<TokenHandleTable>>,
    mints: Arc<Mutex<u32>>,
    instance: ContractInstance,
}

impl UtxoInstance {
    /// Instantiates `code` fresh, not yet started (§4.3 `not_started`).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: UtxoId,
        code: &ContractCode,
        entry_point: impl Into<String>,
        coordination_program_id: ProgramId,
        registry: Arc<ContractCodeRegistry>,
        handle_space: HandleSpace,
        mint_memory: Arc<Mutex<HashMap<ProgramId, Vec<u8>>>>,
    ) -> Result<Self, HostError> {
        let tokens = Arc::new(Mutex::new(TokenHandleTable::new(handle_space)));
        let mints = Arc::new(Mutex::new(0));
        let dispatcher: Arc<dyn HostImportDispatcher> =
            Arc::new(TokenDispatcher::new(registry, tokens.clone(), mints.clone(), handle_space, mint_memory));
        let instance = ContractInstance::instantiate(
            code,
            ContractRole::Utxo,
            Some(coordination_program_id),
            Some(dispatcher),
        )?;
        Ok(Self {
            id,
            program_id: code.program_id,
            entry_point: entry_point.into(),
            state: UtxoLifecycle::NotStarted,
            tokens,
            mints,
            instance,
        })
    }

    /// Reinstantiates `record`'s code and restores its archived memory,
    /// ready to resume where it was unloaded (§4.3 "Load").
    #[allow(clippy::too_many_arguments)]
    pub fn load(
        id: UtxoId,
        record: Utxo,
        code: &ContractCode,
        coordination_program_id: ProgramId,
        registry: Arc<ContractCodeRegistry>,
        handle_space: HandleSpace,
        mint_memory: Arc<Mutex<HashMap<ProgramId, Vec<u8>>>>,
    ) -> Result<Self, HostError> {
        let tokens = Arc::new(Mutex::new(TokenHandleTable::seed(handle_space, record.tokens)));
        let mints = Arc::new(Mutex::new(0));
        let dispatcher: Arc<dyn HostImportDispatcher> =
            Arc::new(TokenDispatcher::new(registry, tokens.clone(), mints.clone(), handle_space, mint_memory));
        let mut instance = ContractInstance::instantiate(
            code,
            ContractRole::Utxo,
            Some(coordination_program_id),
            Some(dispatcher),
        )?;
        if let Some(bytes) = &record.memory {
            instance.restore_memory(bytes)?;
        }
        Ok(Self {
            id,
            program_id: record.program_id,
            entry_point: record.entry_point,
            state: record.state,
            tokens,
            mints,
            instance,
        })
    }

    pub fn id(&self) -> UtxoId {
        self.id
    }

    pub fn program_id(&self) -> ProgramId {
        self.program_id
    }

    pub fn is_alive(&self) -> bool {
        self.state.is_alive()
    }

    /// Returns and resets the count of mints performed since the last call
    /// to this method, used by the scheduler to resolve pending token
    /// intermediates (§4.5).
    pub fn take_mint_count(&mut self) -> u32 {
        std::mem::take(&mut *self.mints.lock().expect("lock poisoned"))
    }

    pub fn start(&mut self, args: &[i64]) -> Result<StepOutcome, HostError> {
        self.require_state(UtxoLifecycle::NotStarted, "start")?;
        let outcome = self.instance.start(&self.entry_point, args)?;
        self.apply(outcome)
    }

    pub fn resume(&mut self, bytes: Vec<u8>) -> Result<StepOutcome, HostError> {
        self.require_state(UtxoLifecycle::Yielded, "resume")?;
        let outcome = self.instance.resume(bytes)?;
        self.apply(outcome)
    }

    pub fn query(&mut self, export: &str, args: &[i64]) -> Result<Vec<i64>, HostError> {
        self.require_state(UtxoLifecycle::Yielded, "query")?;
        Ok(self.instance.call_direct(export, args)?)
    }

    pub fn mutate(&mut self, export: &str, args: &[i64]) -> Result<Vec<i64>, HostError> {
        self.require_state(UtxoLifecycle::Yielded, "mutate")?;
        Ok(self.instance.call_direct(export, args)?)
    }

    /// Calls `export`, transitions to `consumed`, and hands back the tokens
    /// that were attached — the caller (the scheduler) owns resolving them
    /// as pending intermediates (§4.5).
    pub fn consume(&mut self, export: &str, args: &[i64]) -> Result<(Vec<i64>, Vec<TokenRecord>), HostError> {
        self.require_state(UtxoLifecycle::Yielded, "consume")?;
        let values = self.instance.call_direct(export, args)?;
        self.state = UtxoLifecycle::Consumed;
        let tokens = self.tokens.lock().expect("lock poisoned").take_all();
        Ok((values, tokens))
    }

    /// Archives this instance's memory and returns the durable record for
    /// the Universe. Consumes `self`: per I4, there is no activation left.
    pub fn unload(mut self) -> Result<Utxo, HostError> {
        let memory = self.instance.dump_memory()?;
        let tokens = self.tokens.lock().expect("lock poisoned").records();
        Ok(Utxo {
            program_id: self.program_id,
            entry_point: self.entry_point,
            tokens,
            state: self.state,
            memory: Some(memory),
        })
    }

    fn apply(&mut self, outcome: StepOutcome) -> Result<StepOutcome, HostError> {
        match &outcome {
            StepOutcome::Suspended { .. } => self.state = UtxoLifecycle::Yielded,
            StepOutcome::Returned(_) => self.state = UtxoLifecycle::Returned,
        }
        Ok(outcome)
    }

    fn require_state(&self, expected: UtxoLifecycle, attempted: &str) -> Result<(), HostError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(HostError::BadState {
                state: self.state.to_string(),
                attempted: attempted.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starstream_universe::{Universe, Utxo};
    use starstream_wasm::ContractCodeRegistry;

    fn engine() -> wasmtime::Engine {
        starstream_wasm::new_engine().unwrap()
    }

    fn returning_module() -> Vec<u8> {
        wat::parse_str(
            r#"
            (module
              (memory (export "memory") 1)
              (func (export "starstream_new_main") (result i64) (i64.const 7))
              (func (export "starstream_query_balance") (param i64) (result i64)
                (i64.add (local.get 0) (i64.const 1))))
            "#,
        )
        .unwrap()
    }

    fn yielding_module() -> Vec<u8> {
        wat::parse_str(
            r#"
            (module
              (import "starstream_utxo_env" "starstream_yield"
                (func $yield (param i32 i32 i32 i32 i32 i32)))
              (memory (export "memory") 1)
              (data (i32.const 0) "hi")
              (func (export "starstream_new_main")
                (call $yield (i32.const 0) (i32.const 2) (i32.const 0) (i32.const 0) (i32.const 10) (i32.const 0)))
              (func (export "starstream_consume_done") (result i64) (i64.const 1)))
            "#,
        )
        .unwrap()
    }

    fn fresh_instance(bytes: Vec<u8>) -> (UtxoInstance, UtxoId) {
        let registry = Arc::new(ContractCodeRegistry::new(engine()));
        let code = registry.load(bytes).unwrap();
        let mut universe = Universe::new();
        let id = universe.insert(Utxo::new(code.program_id, "starstream_new_main"));
        let coordination_id = code.program_id;
        let instance = UtxoInstance::new(
            id,
            &code,
            "starstream_new_main",
            coordination_id,
            registry,
            HandleSpace::default(),
            Arc::new(Mutex::new(HashMap::new())),
        )
        .unwrap();
        (instance, id)
    }

    #[test]
    fn starting_twice_is_rejected_by_lifecycle() {
        let (mut instance, _id) = fresh_instance(returning_module());
        instance.start(&[]).unwrap();
        assert!(matches!(instance.state, UtxoLifecycle::Returned));
        assert!(matches!(instance.start(&[]), Err(HostError::BadState { .. })));
    }

    #[test]
    fn query_before_any_yield_is_rejected() {
        let (mut instance, _id) = fresh_instance(returning_module());
        assert!(matches!(
            instance.query("starstream_query_balance", &[1]),
            Err(HostError::BadState { .. })
        ));
    }

    #[test]
    fn consume_transitions_to_consumed_and_returns_tokens() {
        let (mut instance, _id) = fresh_instance(yielding_module());
        instance.start(&[]).unwrap();
        assert!(instance.is_alive());
        let (values, tokens) = instance.consume("starstream_consume_done", &[]).unwrap();
        assert_eq!(values, vec![1]);
        assert!(tokens.is_empty());
        assert!(!instance.is_alive());
    }

    #[test]
    fn unload_then_load_restores_lifecycle_state() {
        let (mut instance, id) = fresh_instance(returning_module());
        instance.start(&[]).unwrap();
        let program_id = instance.program_id();
        let record = instance.unload().unwrap();
        assert_eq!(record.state, UtxoLifecycle::Returned);

        let registry = Arc::new(ContractCodeRegistry::new(engine()));
        let code = registry.load(returning_module()).unwrap();
        let reloaded = UtxoInstance::load(
            id,
            record,
            &code,
            program_id,
            registry,
            HandleSpace::default(),
            Arc::new(Mutex::new(HashMap::new())),
        )
        .unwrap();
        assert!(!reloaded.is_alive());
    }
}
