//! Token mint/burn (§4.5): a fresh token-mint instantiation per call whose
//! linear memory is restored from and archived back into a shared store
//! keyed by program id, plus the per-UTXO handle table token intermediates
//! are tracked under.

use rand::Rng;
use starstream_config::HandleSpace;
use starstream_core::{ContractRole, Handle, HostError, ProgramId};
use starstream_universe::TokenRecord;
use starstream_wasm::{ContractCode, ContractCodeRegistry, ContractInstance, ExportKind, HostImportDispatcher, ImportModule};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Tokens currently attached to one UTXO, named by handle within that
/// UTXO's own scope (distinct from the coordination's handle table).
#[derive(Debug, Default)]
pub struct TokenHandleTable {
    space: HandleSpace,
    tokens: HashMap<Handle, TokenRecord>,
}

impl TokenHandleTable {
    pub fn new(space: HandleSpace) -> Self {
        Self {
            space,
            tokens: HashMap::new(),
        }
    }

    /// Seeds the table from a durable UTXO's persisted token set, used when
    /// loading an archived UTXO back in. Handles are re-minted; they were
    /// never persisted (I6 applies to token handles the same as UTXO ones).
    pub fn seed(space: HandleSpace, records: Vec<TokenRecord>) -> Self {
        let mut table = Self::new(space);
        for record in records {
            table.attach(record);
        }
        table
    }

    pub fn attach(&mut self, record: TokenRecord) -> Handle {
        let mut rng = rand::thread_rng();
        loop {
            let candidate = rng.gen_range(self.space.min..=self.space.max);
            let Some(handle) = Handle::new(candidate, &self.space) else {
                continue;
            };
            if let std::collections::hash_map::Entry::Vacant(entry) = self.tokens.entry(handle) {
                entry.insert(record);
                return handle;
            }
        }
    }

    pub fn detach(&mut self, handle: Handle) -> Result<TokenRecord, HostError> {
        self.tokens.remove(&handle).ok_or(HostError::UnknownHandle { handle: handle.get() })
    }

    pub fn records(&self) -> Vec<TokenRecord> {
        self.tokens.values().cloned().collect()
    }

    pub fn take_all(&mut self) -> Vec<TokenRecord> {
        std::mem::take(&mut self.tokens).into_values().collect()
    }
}

/// Installed as the `HostImportDispatcher` for a UTXO-role instance's
/// `starstream_token:{id}` imports. Holds the UTXO's own token table so
/// mint/burn can attach and detach records as they run, plus a running
/// count of mints performed this call (§4.5 "intermediates... must be
/// re-minted into another UTXO before the coordination returns" — the
/// scheduler resolves one pending intermediate per mint it observes).
pub struct TokenDispatcher {
    registry: Arc<ContractCodeRegistry>,
    tokens: Arc<Mutex<TokenHandleTable>>,
    mints: Arc<Mutex<u32>>,
    handle_space: HandleSpace,
    /// A token-mint program's persisted linear memory, keyed by program id
    /// and shared with every other activation in the same transaction —
    /// this is what lets a `supply` counter accumulate across successive
    /// mints, whether in one coordination call or a later transaction.
    mint_memory: Arc<Mutex<HashMap<ProgramId, Vec<u8>>>>,
}

impl TokenDispatcher {
    pub fn new(
        registry: Arc<ContractCodeRegistry>,
        tokens: Arc<Mutex<TokenHandleTable>>,
        mints: Arc<Mutex<u32>>,
        handle_space: HandleSpace,
        mint_memory: Arc<Mutex<HashMap<ProgramId, Vec<u8>>>>,
    ) -> Self {
        Self {
            registry,
            tokens,
            mints,
            handle_space,
            mint_memory,
        }
    }

    /// Instantiates `program_id`'s token-mint code, restoring whatever
    /// memory it left behind after its last mint or burn.
    fn instantiate(&self, code: &ContractCode, program_id: ProgramId) -> Result<ContractInstance, HostError> {
        let mut instance = ContractInstance::instantiate(code, ContractRole::TokenMint, None, None)?;
        if let Some(bytes) = self.mint_memory.lock().expect("lock poisoned").get(&program_id) {
            instance.restore_memory(bytes)?;
        }
        Ok(instance)
    }

    /// Archives `instance`'s memory back into the shared store so the next
    /// mint or burn against this program id picks up where this one left
    /// off. A contract with no exported memory has nothing to persist.
    fn archive(&self, program_id: ProgramId, mut instance: ContractInstance) -> Result<(), HostError> {
        if !instance.has_memory() {
            return Ok(());
        }
        let memory = instance.dump_memory()?;
        self.mint_memory.lock().expect("lock poisoned").insert(program_id, memory);
        Ok(())
    }

    fn mint(&self, program_id: ProgramId, field: &str, args: &[i64]) -> Result<Vec<i64>, HostError> {
        let suffix = ExportKind::suffix(field)
            .ok_or_else(|| HostError::BadModule {
                program_id,
                reason: format!("malformed mint export name `{field}`"),
            })?
            .to_string();
        let code = self.registry.resolve(&program_id)?;
        let mut instance = self.instantiate(&code, program_id)?;
        let result = instance.call_direct(field, args)?;
        let id = *result.first().unwrap_or(&0) as u64;
        let amount = *result.get(1).unwrap_or(&0) as u64;
        self.archive(program_id, instance)?;
        let record = TokenRecord::new(program_id, suffix, id, amount);
        let handle = self.tokens.lock().expect("lock poisoned").attach(record);
        *self.mints.lock().expect("lock poisoned") += 1;
        Ok(vec![handle.get() as i64])
    }

    fn burn(&self, program_id: ProgramId, field: &str, args: &[i64]) -> Result<Vec<i64>, HostError> {
        let suffix = ExportKind::suffix(field).ok_or_else(|| HostError::BadModule {
            program_id,
            reason: format!("malformed burn export name `{field}`"),
        })?;
        let handle_value = *args.first().ok_or(HostError::BadModule {
            program_id,
            reason: "starstream_burn_* requires a token handle argument".into(),
        })?;
        let handle = Handle::new(handle_value as u32, &self.handle_space).ok_or(HostError::UnknownHandle {
            handle: handle_value as u32,
        })?;

        let record = {
            let mut table = self.tokens.lock().expect("lock poisoned");
            let record = table.detach(handle)?;
            if !record.matches_burn_fn(suffix) {
                // Put it back: a failed burn must not destroy the token.
                let mint_fn = record.mint_fn.clone();
                table.attach(record);
                return Err(HostError::BurnFnMismatch {
                    mint_fn,
                    burn_fn: suffix.to_string(),
                });
            }
            record
        };

        let code = self.registry.resolve(&program_id)?;
        let mut instance = self.instantiate(&code, program_id)?;
        let burn_args: Vec<i64> = std::iter::once(record.id as i64)
            .chain(std::iter::once(record.amount as i64))
            .chain(args.iter().skip(1).copied())
            .collect();
        let values = instance.call_direct(field, &burn_args)?;
        self.archive(program_id, instance)?;
        Ok(values)
    }
}

impl HostImportDispatcher for TokenDispatcher {
    fn call(&self, module: &str, field: &str, args: &[i64]) -> Result<Vec<i64>, HostError> {
        let program_id = match ImportModule::parse(module) {
            Ok(ImportModule::Token(id)) => id,
            _ => return Err(HostError::UnknownImport { module: module.to_string() }),
        };
        match ExportKind::classify(field) {
            Some(ExportKind::Mint) => self.mint(program_id, field, args),
            Some(ExportKind::Burn) => self.burn(program_id, field, args),
            _ => Err(HostError::UnknownImport {
                module: format!("{module}::{field}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_then_detach_round_trips_the_record() {
        let mut table = TokenHandleTable::new(HandleSpace::default());
        let record = TokenRecord::new(ProgramId::of(b"nft"), "nft", 4, 1);
        let handle = table.attach(record.clone());
        assert_eq!(table.detach(handle).unwrap(), record);
    }

    #[test]
    fn detach_fails_on_unknown_handle() {
        let mut table = TokenHandleTable::new(HandleSpace::default());
        let bogus = Handle::new(7, &HandleSpace::default()).unwrap();
        assert!(matches!(table.detach(bogus), Err(HostError::UnknownHandle { .. })));
    }
}
