//! The coordination instance's `starstream_utxo:{id}` imports (§4.4):
//! `new`/`resume`/`query`/`mutate`/`consume`/`status`/`handle` dispatch
//! against the transaction's loaded `UtxoInstance`s, plus the effect
//! handler table.
//!
//! An effect raised by a UTXO is modeled as an ordinary `starstream_yield`
//! whose type name carries the reserved `effect:` prefix. A handler
//! installed via `starstream_handle_*` is a fixed scalar response the
//! coordination registers ahead of time for (utxo, effect name) rather than
//! a live call through the coordination's own indirect function table —
//! a deliberate simplification of the prototype's function-pointer
//! indirection, recorded in the design notes.

use crate::handle_table::HandleTable;
use crate::utxo_instance::UtxoInstance;
use starstream_config::HandleSpace;
use starstream_core::{Handle, HostError, LogTag, ProgramId, TransactionLogEntry, TxLog};
use starstream_universe::{TokenRecord, Universe, Utxo, UtxoId};
use starstream_wasm::{ContractCodeRegistry, ExportKind, HostImportDispatcher, ImportModule, StepOutcome};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const EFFECT_PREFIX: &str = "effect:";

fn scalars_to_bytes(values: &[i64]) -> Vec<u8> {
    values.iter().flat_map(|value| value.to_le_bytes()).collect()
}

fn log_entry(state: &mut TransactionState, tag: LogTag, program_id: ProgramId, operation: &str, input: &[i64], output: &[i64]) {
    state.log.push(TransactionLogEntry {
        tag,
        program_id,
        operation: operation.to_string(),
        input: scalars_to_bytes(input),
        output: scalars_to_bytes(output),
    });
}

/// Everything a running transaction needs, shared between the scheduler's
/// own driving code and the dispatcher installed on the coordination
/// instance. Dropped at the end of `run_transaction`, which is also when
/// the effect-handler table and loaded activations go out of scope — they
/// must never outlive the coordination instance that created them.
pub struct TransactionState {
    pub registry: Arc<ContractCodeRegistry>,
    pub coordination_program_id: ProgramId,
    pub universe: Universe,
    pub handle_space: HandleSpace,
    pub handles: HandleTable,
    pub loaded: HashMap<UtxoId, UtxoInstance>,
    pub effect_handlers: HashMap<(UtxoId, String), i64>,
    pub intermediates_pending: u32,
    pub pending_tokens: Vec<TokenRecord>,
    /// Every token-mint program's persisted linear memory, seeded from the
    /// Universe at transaction start and written back only on commit — a
    /// mint/burn that runs mid-transaction and is then rolled back must not
    /// leave its supply counter advanced.
    pub mint_memory: Arc<Mutex<HashMap<ProgramId, Vec<u8>>>>,
    pub log: TxLog,
}

impl TransactionState {
    pub fn new(
        registry: Arc<ContractCodeRegistry>,
        coordination_program_id: ProgramId,
        universe: Universe,
        handle_space: HandleSpace,
    ) -> Self {
        let mint_memory = Arc::new(Mutex::new(universe.mint_memory_snapshot()));
        Self {
            registry,
            coordination_program_id,
            handles: HandleTable::new(handle_space),
            mint_memory,
            universe,
            handle_space,
            loaded: HashMap::new(),
            effect_handlers: HashMap::new(),
            intermediates_pending: 0,
            pending_tokens: Vec::new(),
            log: TxLog::new(),
        }
    }

    /// Loads `id` into `self.loaded` if it is not already there, either by
    /// reinstantiating an archived record or by taking the already-loaded
    /// activation (I4: never two at once).
    fn ensure_loaded(&mut self, id: UtxoId) -> Result<(), HostError> {
        if self.loaded.contains_key(&id) {
            return Ok(());
        }
        // A handle only ever resolves to an id this transaction has either
        // loaded or left archived in the Universe; if neither holds, the
        // handle table and Universe have diverged.
        let record = self.universe.remove(id).expect("handle resolved to an id missing from both loaded set and universe");
        let code = self.registry.resolve(&record.program_id)?;
        let instance = UtxoInstance::load(
            id,
            record,
            &code,
            self.coordination_program_id,
            self.registry.clone(),
            self.handle_space,
            self.mint_memory.clone(),
        )?;
        self.loaded.insert(id, instance);
        Ok(())
    }

    /// Drives a freshly started or resumed UTXO through any effect
    /// suspensions to its next externally-visible stopping point.
    fn drive(&mut self, id: UtxoId, mut outcome: StepOutcome) -> Result<StepOutcome, HostError> {
        loop {
            match outcome {
                StepOutcome::Returned(_) => return Ok(outcome),
                StepOutcome::Suspended { ref name, .. } if !name.starts_with(EFFECT_PREFIX) => return Ok(outcome),
                StepOutcome::Suspended { name, data: _ } => {
                    let effect_name = name.trim_start_matches(EFFECT_PREFIX).to_string();
                    let response = self
                        .effect_handlers
                        .get(&(id, effect_name.clone()))
                        .copied()
                        .ok_or(HostError::UnhandledEffect { effect: effect_name })?;
                    let resume_bytes = response.to_le_bytes().to_vec();
                    let utxo = self.loaded.get_mut(&id).expect("loaded for drive");
                    outcome = utxo.resume(resume_bytes)?;
                }
            }
        }
    }
}

/// Installed as the coordination instance's `HostImportDispatcher`.
pub struct CoordinationDispatcher {
    state: Arc<Mutex<TransactionState>>,
}

impl CoordinationDispatcher {
    pub fn new(state: Arc<Mutex<TransactionState>>) -> Self {
        Self { state }
    }

    fn handle_new(&self, program_id: ProgramId, field: &str, args: &[i64]) -> Result<Vec<i64>, HostError> {
        let entry_point = field.to_string();
        let mut state = self.state.lock().expect("lock poisoned");
        let code = state.registry.resolve(&program_id)?;
        // `Universe::insert` is the only source of fresh ids; immediately
        // remove the placeholder it creates so the id names a loaded
        // activation, not a phantom archived record, until commit persists it.
        let id = state.universe.insert(Utxo::new(program_id, entry_point.clone()));
        state.universe.remove(id);
        let mut instance = UtxoInstance::new(
            id,
            &code,
            entry_point,
            state.coordination_program_id,
            state.registry.clone(),
            state.handle_space,
            state.mint_memory.clone(),
        )?;
        let outcome = instance.start(args)?;
        state.loaded.insert(id, instance);
        // Dead on creation (B1) still gets a handle: a later query/consume
        // attempt against it observes `returned`, not a missing handle.
        let _ = state.drive(id, outcome)?;
        let minted = state.loaded.get_mut(&id).expect("just inserted").take_mint_count();
        state.intermediates_pending = state.intermediates_pending.saturating_sub(minted);
        let handle = state.handles.install(id);
        log_entry(&mut state, LogTag::New, program_id, field, args, &[handle.get() as i64]);
        Ok(vec![handle.get() as i64])
    }

    fn resolve_handle(&self, state: &TransactionState, raw: i64) -> Result<UtxoId, HostError> {
        let handle = Handle::new(raw as u32, &state.handle_space).ok_or(HostError::UnknownHandle { handle: raw as u32 })?;
        state.handles.resolve(handle)
    }

    fn require_handle_arg(&self, state: &TransactionState, args: &[i64]) -> Result<UtxoId, HostError> {
        let raw = args.first().ok_or_else(|| HostError::BadModule {
            program_id: state.coordination_program_id,
            reason: "missing handle argument".into(),
        })?;
        self.resolve_handle(state, *raw)
    }

    fn handle_resume(&self, _field: &str, args: &[i64]) -> Result<Vec<i64>, HostError> {
        let mut state = self.state.lock().expect("lock poisoned");
        let id = self.require_handle_arg(&state, args)?;
        state.ensure_loaded(id)?;
        let utxo = state.loaded.get_mut(&id).expect("just ensured loaded");
        let program_id = utxo.program_id();
        let resume_bytes: Vec<u8> = args[1..].iter().flat_map(|value| value.to_le_bytes()).collect();
        let outcome = utxo.resume(resume_bytes)?;
        let outcome = state.drive(id, outcome)?;
        let minted = state.loaded.get_mut(&id).expect("just ensured loaded").take_mint_count();
        state.intermediates_pending = state.intermediates_pending.saturating_sub(minted);
        let values = match outcome {
            StepOutcome::Returned(values) => values,
            StepOutcome::Suspended { .. } => vec![],
        };
        log_entry(&mut state, LogTag::Resume, program_id, "resume", args, &values);
        Ok(values)
    }

    fn handle_query_or_mutate(&self, field: &str, args: &[i64], mutate: bool) -> Result<Vec<i64>, HostError> {
        let mut state = self.state.lock().expect("lock poisoned");
        let id = self.require_handle_arg(&state, args)?;
        state.ensure_loaded(id)?;
        let utxo = state.loaded.get_mut(&id).expect("just ensured loaded");
        let program_id = utxo.program_id();
        let call_args = &args[1..];
        let values = if mutate {
            utxo.mutate(field, call_args)?
        } else {
            utxo.query(field, call_args)?
        };
        let minted = state.loaded.get_mut(&id).expect("just ensured loaded").take_mint_count();
        state.intermediates_pending = state.intermediates_pending.saturating_sub(minted);
        let tag = if mutate { LogTag::Mutate } else { LogTag::Query };
        log_entry(&mut state, tag, program_id, field, call_args, &values);
        Ok(values)
    }

    fn handle_consume(&self, field: &str, args: &[i64]) -> Result<Vec<i64>, HostError> {
        let mut state = self.state.lock().expect("lock poisoned");
        let id = self.require_handle_arg(&state, args)?;
        state.ensure_loaded(id)?;
        let utxo = state.loaded.get_mut(&id).expect("just ensured loaded");
        let program_id = utxo.program_id();
        let (values, tokens) = utxo.consume(field, &args[1..])?;
        let minted = state.loaded.get_mut(&id).expect("just ensured loaded").take_mint_count();
        state.intermediates_pending = state.intermediates_pending.saturating_sub(minted);
        state.intermediates_pending += tokens.len() as u32;
        state.pending_tokens.extend(tokens);
        log_entry(&mut state, LogTag::Consume, program_id, field, &args[1..], &values);
        Ok(values)
    }

    fn handle_status(&self, args: &[i64]) -> Result<Vec<i64>, HostError> {
        let state = self.state.lock().expect("lock poisoned");
        let id = self.require_handle_arg(&state, args)?;
        let alive = state
            .loaded
            .get(&id)
            .map(|utxo| utxo.is_alive())
            .or_else(|| state.universe.get(id).map(|utxo| utxo.is_alive()))
            .unwrap_or(false);
        Ok(vec![alive as i64])
    }

    fn handle_install_or_clear(&self, field: &str, args: &[i64]) -> Result<Vec<i64>, HostError> {
        let mut state = self.state.lock().expect("lock poisoned");
        let effect_name = ExportKind::suffix(field)
            .ok_or_else(|| HostError::BadModule {
                program_id: state.coordination_program_id,
                reason: format!("malformed handler export name `{field}`"),
            })?
            .to_string();
        let id = self.require_handle_arg(&state, args)?;
        match args.get(1) {
            Some(response) => {
                state.effect_handlers.insert((id, effect_name), *response);
            }
            None => {
                state.effect_handlers.remove(&(id, effect_name));
            }
        }
        Ok(vec![])
    }

    /// `starstream_event_*`: an observable event, logged but causing no
    /// lifecycle transition.
    fn handle_event(&self, field: &str, args: &[i64]) -> Result<Vec<i64>, HostError> {
        let mut state = self.state.lock().expect("lock poisoned");
        let id = self.require_handle_arg(&state, args)?;
        state.ensure_loaded(id)?;
        let program_id = state.loaded.get(&id).expect("just ensured loaded").program_id();
        log_entry(&mut state, LogTag::Event, program_id, field, &args[1..], &[]);
        Ok(vec![])
    }
}

impl HostImportDispatcher for CoordinationDispatcher {
    fn call(&self, module: &str, field: &str, args: &[i64]) -> Result<Vec<i64>, HostError> {
        let program_id = match ImportModule::parse(module) {
            Ok(ImportModule::Utxo(id)) => id,
            _ => return Err(HostError::UnknownImport { module: module.to_string() }),
        };
        match ExportKind::classify(field) {
            Some(ExportKind::New) => self.handle_new(program_id, field, args),
            Some(ExportKind::Resume) => self.handle_resume(field, args),
            Some(ExportKind::Query) => self.handle_query_or_mutate(field, args, false),
            Some(ExportKind::Mutate) => self.handle_query_or_mutate(field, args, true),
            Some(ExportKind::Consume) => self.handle_consume(field, args),
            Some(ExportKind::Status) => self.handle_status(args),
            Some(ExportKind::Handle) => self.handle_install_or_clear(field, args),
            Some(ExportKind::Event) => self.handle_event(field, args),
            _ => Err(HostError::UnknownImport {
                module: format!("{module}::{field}"),
            }),
        }
    }
}
