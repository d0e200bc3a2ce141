//! A live instantiation of a contract module with its imports bound
//! according to role, and the suspend/resume driving logic.

use crate::error::{Result, WasmError};
use crate::import_routing::ImportModule;
use crate::registry::ContractCode;
use starstream_core::{ContractRole, HostError, ProgramId};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use wasmtime::{Caller, ExternType, FuncType, Instance, Linker, Store, Val, ValType};

/// What a suspended `starstream_yield` (or effect import) captured on its
/// way out, plus the channel the driver uses to hand resume bytes back in.
struct PendingSuspension {
    name: String,
    data: Vec<u8>,
    resume_len: u32,
    resume_tx: oneshot::Sender<Vec<u8>>,
}

type SuspensionSlot = Arc<Mutex<Option<PendingSuspension>>>;

/// Handles the `starstream_utxo:{id}` and `starstream_token:{id}` imports
/// that fall outside the intrinsic suspension machinery: the scheduler
/// (handle table, Universe lookups) and the token-linearity layer each
/// implement one of these and hand it to `ContractInstance::instantiate`.
///
/// Every argument and result is a 64-bit scalar; this instance's own linear
/// memory is the channel for anything larger (mirroring how `starstream_yield`
/// exchanges its payload through memory views rather than call arguments).
pub trait HostImportDispatcher: Send + Sync {
    fn call(&self, module: &str, field: &str, args: &[i64]) -> std::result::Result<Vec<i64>, HostError>;
}

/// Data threaded through every host call for one instance.
struct HostState {
    program_id: ProgramId,
    role: ContractRole,
    coordination_program_id: Option<ProgramId>,
    suspension: SuspensionSlot,
    dispatcher: Option<Arc<dyn HostImportDispatcher>>,
}

/// Outcome of driving a call (start, resume, or a synchronous
/// query/mutate/consume) to its next quiescent point.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// The call suspended at `starstream_yield`, with the guest-supplied
    /// type name and outbound data.
    Suspended { name: String, data: Vec<u8> },
    /// The call ran to completion; the entry point's scalar results.
    Returned(Vec<i64>),
}

type CallFuture = Pin<Box<dyn Future<Output = std::result::Result<(), wasmtime::Error>> + Send>>;

/// A live contract instance bound to one role. Instantiating a coordination
/// script and instantiating the same module in a UTXO role produce two
/// independent `ContractInstance`s, each with its own trap-stubbed imports
/// (I5 is enforced here, at call time, not at link time).
pub struct ContractInstance {
    // Boxed so its address is stable across moves of `ContractInstance`
    // itself (e.g. when held in a `HashMap`); `in_flight` below erases a
    // borrow of it to `'static` and that borrow must outlive any such move.
    store: Box<Store<HostState>>,
    instance: Instance,
    role: ContractRole,
    program_id: ProgramId,
    entry_point: String,
    suspension: SuspensionSlot,
    results: Arc<Mutex<Vec<i64>>>,
    in_flight: Option<CallFuture>,
}

impl ContractInstance {
    /// Instantiates `code` under `role`, wiring every import the module
    /// declares to either a real host function or a trap stub, depending on
    /// whether `role` permits that import's module namespace. `dispatcher`
    /// handles the coordination/token namespace imports, if the module
    /// declares any and `role` permits them.
    pub fn instantiate(
        code: &ContractCode,
        role: ContractRole,
        coordination_program_id: Option<ProgramId>,
        dispatcher: Option<Arc<dyn HostImportDispatcher>>,
    ) -> Result<Self> {
        let suspension: SuspensionSlot = Arc::new(Mutex::new(None));
        let host_state = HostState {
            program_id: code.program_id,
            role,
            coordination_program_id,
            suspension: suspension.clone(),
            dispatcher,
        };
        let mut store = Box::new(Store::new(code.module.engine(), host_state));
        let mut linker = Linker::new(code.module.engine());

        for import in code.module.imports() {
            let module_name = import.module();
            let field = import.name();
            let func_ty = match import.ty() {
                ExternType::Func(ty) => ty,
                _ => continue,
            };
            let permitted = ImportModule::parse(module_name)
                .map(|parsed| role.permits_import_module(parsed.prefix()))
                .unwrap_or(false);

            if permitted {
                bind_real_import(&mut linker, module_name, field, &func_ty, code.program_id)?;
            } else {
                bind_trap_stub(&mut linker, module_name, field, &func_ty, role, code.program_id)?;
            }
        }

        let instance = linker
            .instantiate(&mut *store, &code.module)
            .map_err(|err| WasmError::BadModule {
                program_id: code.program_id,
                message: err.to_string(),
            })?;

        Ok(Self {
            store,
            instance,
            role,
            program_id: code.program_id,
            entry_point: String::new(),
            suspension,
            results: Arc::new(Mutex::new(Vec::new())),
            in_flight: None,
        })
    }

    pub fn role(&self) -> ContractRole {
        self.role
    }

    pub fn program_id(&self) -> ProgramId {
        self.program_id
    }

    /// Invokes `entry_point` with `args`, driving it to its first suspension
    /// point or to completion.
    pub fn start(&mut self, entry_point: &str, args: &[i64]) -> Result<StepOutcome> {
        let func = self
            .instance
            .get_func(&mut self.store, entry_point)
            .ok_or_else(|| WasmError::UnknownImport {
                module: entry_point.to_string(),
            })?;
        self.entry_point = entry_point.to_string();
        self.call(func, args)
    }

    /// Invokes the function at `index` in this instance's exported
    /// `__indirect_function_table`, used to dispatch an effect handler the
    /// coordination installed. Must not suspend.
    pub fn call_table_function(&mut self, index: u32, args: &[i64]) -> Result<Vec<i64>> {
        let table = self
            .instance
            .get_table(&mut *self.store, "__indirect_function_table")
            .ok_or_else(|| WasmError::BadModule {
                program_id: self.program_id,
                message: "instance has no exported indirect function table".into(),
            })?;
        let func = table
            .get(&mut *self.store, index)
            .and_then(|val| val.funcref().copied().flatten())
            .ok_or_else(|| WasmError::UnknownImport {
                module: format!("__indirect_function_table[{index}]"),
            })?;
        self.entry_point = format!("__indirect_function_table[{index}]");
        match self.call(func, args)? {
            StepOutcome::Returned(values) => Ok(values),
            StepOutcome::Suspended { .. } => {
                self.in_flight = None;
                Err(WasmError::NotQuiescent {
                    export: self.entry_point.clone(),
                })
            }
        }
    }

    /// True if the module exports linear memory at all. A token-mint
    /// contract with no state to persist (no `supply` counter, nothing)
    /// legitimately has none.
    pub fn has_memory(&mut self) -> bool {
        self.instance.get_memory(&mut *self.store, "memory").is_some()
    }

    /// Copies this instance's entire linear memory out, for archiving a UTXO
    /// that is being unloaded.
    pub fn dump_memory(&mut self) -> Result<Vec<u8>> {
        let memory = self.memory()?;
        Ok(memory.data(&*self.store).to_vec())
    }

    /// Copies `bytes` into this instance's linear memory starting at offset
    /// 0, growing it first if needed, used when loading an archived UTXO.
    pub fn restore_memory(&mut self, bytes: &[u8]) -> Result<()> {
        let memory = self.memory()?;
        let current_len = memory.data_size(&*self.store);
        if bytes.len() > current_len {
            const PAGE_SIZE: usize = 65536;
            let extra_pages = (bytes.len() - current_len).div_ceil(PAGE_SIZE) as u64;
            memory
                .grow(&mut *self.store, extra_pages)
                .map_err(|err| WasmError::BadModule {
                    program_id: self.program_id,
                    message: err.to_string(),
                })?;
        }
        memory.data_mut(&mut *self.store)[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn memory(&mut self) -> Result<wasmtime::Memory> {
        self.instance
            .get_memory(&mut *self.store, "memory")
            .ok_or_else(|| WasmError::BadModule {
                program_id: self.program_id,
                message: "instance has no exported memory".into(),
            })
    }

    /// Drives `func` with `args` to its first suspension point or completion.
    fn call(&mut self, func: wasmtime::Func, args: &[i64]) -> Result<StepOutcome> {
        let ty = func.ty(&self.store);
        let params: Vec<Val> = args
            .iter()
            .zip(ty.params())
            .map(|(value, param_ty)| i64_to_val(*value, &param_ty))
            .collect();
        let mut results: Vec<Val> = ty.results().map(|result_ty| i64_to_val(0, &result_ty)).collect();

        // SAFETY: `self.store` is heap-allocated and its address is stable
        // for the lifetime of `self`; the erased `'static` borrow below is
        // retired before `self.store` is ever touched again (see `step`).
        let store_ptr: *mut Store<HostState> = &mut *self.store;
        let results_slot = self.results.clone();
        let future: CallFuture = Box::pin(async move {
            let store = unsafe { &mut *store_ptr };
            func.call_async(store, &params, &mut results).await?;
            let scalars = results.iter().map(val_to_i64).collect();
            *results_slot.lock().expect("lock poisoned") = scalars;
            Ok(())
        });

        self.in_flight = Some(future);
        self.step()
    }

    /// Sends `bytes` to a suspended call and drives it to its next
    /// suspension point or to completion.
    pub fn resume(&mut self, bytes: Vec<u8>) -> Result<StepOutcome> {
        let pending = {
            let mut slot = self.suspension.lock().expect("lock poisoned");
            slot.take()
        };
        let pending = pending.ok_or_else(|| WasmError::NotQuiescent {
            export: self.entry_point.clone(),
        })?;

        if bytes.len() as u32 != pending.resume_len {
            // Put the suspension back: the caller may legitimately retry
            // with a correctly sized buffer instead of the call being lost.
            let resume_len = pending.resume_len;
            *self.suspension.lock().expect("lock poisoned") = Some(pending);
            return Err(WasmError::SizeMismatch {
                expected: resume_len as usize,
                actual: bytes.len(),
            });
        }

        let _ = pending.resume_tx.send(bytes);
        self.step()
    }

    /// Polls the in-flight call exactly once with a no-op waker: `Ready`
    /// means the guest returned without suspending, `Pending` means control
    /// is parked inside `starstream_yield` awaiting resume.
    fn step(&mut self) -> Result<StepOutcome> {
        let mut future = self.in_flight.take().expect("step called with no in-flight call");
        let waker = futures::task::noop_waker_ref();
        let mut cx = Context::from_waker(waker);

        match future.as_mut().poll(&mut cx) {
            Poll::Ready(Ok(())) => {
                let results = std::mem::take(&mut *self.results.lock().expect("lock poisoned"));
                Ok(StepOutcome::Returned(results))
            }
            Poll::Ready(Err(err)) => match err.downcast_ref::<HostError>() {
                // A dispatcher raised a typed error; it crossed the guest
                // boundary as a trap, but the original kind survives instead
                // of collapsing to a generic `Trap`.
                Some(host_err) => Err(WasmError::Host(host_err.clone())),
                None => Err(WasmError::Trap {
                    program_id: self.program_id,
                    entry_point: self.entry_point.clone(),
                    message: err.to_string(),
                }),
            },
            Poll::Pending => {
                self.in_flight = Some(future);
                let pending = self
                    .suspension
                    .lock()
                    .expect("lock poisoned")
                    .as_ref()
                    .map(|p| (p.name.clone(), p.data.clone()));
                match pending {
                    Some((name, data)) => Ok(StepOutcome::Suspended { name, data }),
                    None => Err(WasmError::NotQuiescent {
                        export: self.entry_point.clone(),
                    }),
                }
            }
        }
    }

    /// Calls a query/mutate/consume export synchronously: it must not
    /// suspend. `Poll::Pending` here is itself the `NotQuiescent` failure.
    pub fn call_direct(&mut self, export: &str, args: &[i64]) -> Result<Vec<i64>> {
        match self.start(export, args)? {
            StepOutcome::Returned(values) => Ok(values),
            StepOutcome::Suspended { .. } => {
                self.in_flight = None;
                Err(WasmError::NotQuiescent {
                    export: export.to_string(),
                })
            }
        }
    }
}

fn val_to_i64(val: &Val) -> i64 {
    match val {
        Val::I32(v) => *v as i64,
        Val::I64(v) => *v,
        _ => 0,
    }
}

fn i64_to_val(value: i64, ty: &ValType) -> Val {
    match ty {
        ValType::I32 => Val::I32(value as i32),
        _ => Val::I64(value),
    }
}

fn bind_real_import(
    linker: &mut Linker<HostState>,
    module: &str,
    field: &str,
    ty: &FuncType,
    program_id: ProgramId,
) -> Result<()> {
    if module == "starstream_utxo_env" && field == "starstream_yield" {
        return bind_yield_import(linker, module, field, program_id);
    }

    if module == "env" {
        return bind_env_import(linker, field, ty, program_id);
    }

    // `starstream_utxo:{id}` and `starstream_token:{id}`: routed to the
    // caller-supplied dispatcher (the scheduler for the former, the
    // token-linearity layer for the latter).
    let module_owned = module.to_string();
    let field_owned = field.to_string();
    let result_tys: Vec<ValType> = ty.results().collect();
    linker
        .func_new(
            module,
            field,
            ty.clone(),
            move |caller: Caller<'_, HostState>, params: &[Val], results: &mut [Val]| {
                let dispatcher = caller.data().dispatcher.clone().ok_or_else(|| {
                    wasmtime::Error::msg(format!("no dispatcher installed for {module_owned}.{field_owned}"))
                })?;
                let args: Vec<i64> = params.iter().map(val_to_i64).collect();
                let values = dispatcher
                    .call(&module_owned, &field_owned, &args)
                    .map_err(wasmtime::Error::new)?;
                for (slot, (value, value_ty)) in results.iter_mut().zip(values.into_iter().zip(result_tys.iter())) {
                    *slot = i64_to_val(value, value_ty);
                }
                Ok(())
            },
        )
        .map_err(|err| WasmError::BadModule {
            program_id,
            message: err.to_string(),
        })?;
    Ok(())
}

fn bind_yield_import(linker: &mut Linker<HostState>, module: &str, field: &str, program_id: ProgramId) -> Result<()> {
    let yield_ty = FuncType::new(
        linker.engine(),
        [ValType::I32; 6],
        [],
    );
    linker
        .func_new_async(module, field, yield_ty, move |caller: Caller<'_, HostState>, params: &[Val], _results: &mut [Val]| {
            let name_ptr = params[0].unwrap_i32() as u32;
            let name_len = params[1].unwrap_i32() as u32;
            let data_ptr = params[2].unwrap_i32() as u32;
            let data_len = params[3].unwrap_i32() as u32;
            let resume_ptr = params[4].unwrap_i32() as u32;
            let resume_len = params[5].unwrap_i32() as u32;
            Box::new(async move {
                let mut caller = caller;
                let name = read_memory_string(&mut caller, name_ptr, name_len)?;
                let data = read_memory_bytes(&mut caller, data_ptr, data_len)?;
                let (tx, rx) = oneshot::channel();
                {
                    let mut slot = caller.data().suspension.lock().expect("lock poisoned");
                    *slot = Some(PendingSuspension {
                        name,
                        data,
                        resume_len,
                        resume_tx: tx,
                    });
                }
                let resume_bytes = rx
                    .await
                    .map_err(|_| wasmtime::Error::msg("resume channel dropped before resume"))?;
                write_memory_bytes(&mut caller, resume_ptr, &resume_bytes)?;
                Ok(())
            })
        })
        .map_err(|err| WasmError::BadModule {
            program_id,
            message: err.to_string(),
        })?;
    Ok(())
}

fn bind_env_import(linker: &mut Linker<HostState>, field: &str, ty: &FuncType, program_id: ProgramId) -> Result<()> {
    match field {
        "abort" => {
            linker
                .func_wrap("env", "abort", |_caller: Caller<'_, HostState>| -> wasmtime::Result<()> {
                    Err(wasmtime::Error::msg("guest called abort()"))
                })
        }
        "starstream_log" => linker.func_wrap("env", "starstream_log", |_caller: Caller<'_, HostState>, value: u32| {
            log::debug!("guest log: {value}");
        }),
        "starstream_coordination_code" => linker.func_wrap(
            "env",
            "starstream_coordination_code",
            |mut caller: Caller<'_, HostState>, return_ptr: u32| -> wasmtime::Result<()> {
                let bytes = caller
                    .data()
                    .coordination_program_id
                    .map(|id| *id.as_bytes())
                    .unwrap_or([0u8; 32]);
                write_memory_bytes(&mut caller, return_ptr, &bytes)
            },
        ),
        "starstream_this_code" => linker.func_wrap(
            "env",
            "starstream_this_code",
            |mut caller: Caller<'_, HostState>, return_ptr: u32| -> wasmtime::Result<()> {
                let bytes = *caller.data().program_id.as_bytes();
                write_memory_bytes(&mut caller, return_ptr, &bytes)
            },
        ),
        _ => {
            let field_owned = field.to_string();
            linker.func_new(
                "env",
                field,
                ty.clone(),
                move |_caller: Caller<'_, HostState>, _params: &[Val], _results: &mut [Val]| {
                    Err(wasmtime::Error::msg(format!("unimplemented env import `{field_owned}`")))
                },
            )
        }
    }
    .map_err(|err| WasmError::BadModule {
        program_id,
        message: err.to_string(),
    })?;
    Ok(())
}

fn bind_trap_stub(
    linker: &mut Linker<HostState>,
    module: &str,
    field: &str,
    ty: &FuncType,
    role: ContractRole,
    program_id: ProgramId,
) -> Result<()> {
    let module_owned = module.to_string();
    let field_owned = field.to_string();
    linker
        .func_new(
            module,
            field,
            ty.clone(),
            move |_caller: Caller<'_, HostState>, _params: &[Val], _results: &mut [Val]| {
                Err(wasmtime::Error::new(HostError::WrongContext {
                    import: format!("{module_owned}.{field_owned}"),
                    role: role.to_string(),
                }))
            },
        )
        .map_err(|err| WasmError::BadModule {
            program_id,
            message: err.to_string(),
        })?;
    Ok(())
}

fn read_memory_bytes(caller: &mut Caller<'_, HostState>, ptr: u32, len: u32) -> wasmtime::Result<Vec<u8>> {
    let memory = caller
        .get_export("memory")
        .and_then(|export| export.into_memory())
        .ok_or_else(|| wasmtime::Error::msg("instance has no exported memory"))?;
    let start = ptr as usize;
    let end = start + len as usize;
    let data = memory.data(&caller);
    data.get(start..end)
        .map(|slice| slice.to_vec())
        .ok_or_else(|| wasmtime::Error::msg("memory access out of bounds"))
}

fn read_memory_string(caller: &mut Caller<'_, HostState>, ptr: u32, len: u32) -> wasmtime::Result<String> {
    let bytes = read_memory_bytes(caller, ptr, len)?;
    String::from_utf8(bytes).map_err(|err| wasmtime::Error::msg(err.to_string()))
}

fn write_memory_bytes(caller: &mut Caller<'_, HostState>, ptr: u32, bytes: &[u8]) -> wasmtime::Result<()> {
    let memory = caller
        .get_export("memory")
        .and_then(|export| export.into_memory())
        .ok_or_else(|| wasmtime::Error::msg("instance has no exported memory"))?;
    let start = ptr as usize;
    memory
        .data_mut(caller)
        .get_mut(start..start + bytes.len())
        .ok_or_else(|| wasmtime::Error::msg("memory access out of bounds"))?
        .copy_from_slice(bytes);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ContractCodeRegistry;

    fn engine() -> wasmtime::Engine {
        let mut config = wasmtime::Config::new();
        config.async_support(true);
        wasmtime::Engine::new(&config).unwrap()
    }

    // Yields once with the 2-byte name "hi" and no payload, asking for a
    // 4-byte resume value, then returns 42.
    fn yielding_module() -> Vec<u8> {
        wat::parse_str(
            r#"
            (module
              (import "starstream_utxo_env" "starstream_yield"
                (func $yield (param i32 i32 i32 i32 i32 i32)))
              (memory (export "memory") 1)
              (data (i32.const 0) "hi")
              (func (export "starstream_new_main") (result i64)
                (call $yield (i32.const 0) (i32.const 2) (i32.const 0) (i32.const 0) (i32.const 10) (i32.const 4))
                (i64.const 42)))
            "#,
        )
        .unwrap()
    }

    fn instantiate(bytes: Vec<u8>, role: ContractRole) -> ContractInstance {
        let registry = ContractCodeRegistry::new(engine());
        let code = registry.load(bytes).unwrap();
        ContractInstance::instantiate(&code, role, None, None).unwrap()
    }

    #[test]
    fn suspends_at_yield_then_resumes_to_completion() {
        let mut instance = instantiate(yielding_module(), ContractRole::Utxo);

        match instance.start("starstream_new_main", &[]).unwrap() {
            StepOutcome::Suspended { name, data } => {
                assert_eq!(name, "hi");
                assert!(data.is_empty());
            }
            StepOutcome::Returned(_) => panic!("expected a suspension"),
        }

        match instance.resume(vec![1, 2, 3, 4]).unwrap() {
            StepOutcome::Returned(values) => assert_eq!(values, vec![42]),
            StepOutcome::Suspended { .. } => panic!("expected completion"),
        }
    }

    #[test]
    fn wrong_size_resume_is_rejected_and_suspension_survives() {
        let mut instance = instantiate(yielding_module(), ContractRole::Utxo);
        instance.start("starstream_new_main", &[]).unwrap();

        assert!(matches!(
            instance.resume(vec![1, 2]),
            Err(WasmError::SizeMismatch { expected: 4, actual: 2 })
        ));

        // The suspension is still there; a correctly sized resume succeeds.
        match instance.resume(vec![1, 2, 3, 4]).unwrap() {
            StepOutcome::Returned(values) => assert_eq!(values, vec![42]),
            StepOutcome::Suspended { .. } => panic!("expected completion"),
        }
    }

    #[test]
    fn forbidden_import_traps_instead_of_linking() {
        let bytes = wat::parse_str(
            r#"
            (module
              (import "starstream_utxo:0000000000000000000000000000000000000000000000000000000000000000" "starstream_mint_nft"
                (func $mint (result i64)))
              (func (export "starstream_new_main") (result i64) (call $mint)))
            "#,
        );
        // The hex digest above is 33 bytes, deliberately malformed, so this
        // import is routed to a trap stub rather than a dispatcher: loading
        // still succeeds, calling does not.
        let bytes = bytes.unwrap();
        let mut instance = instantiate(bytes, ContractRole::Coordination);
        let result = instance.start("starstream_new_main", &[]);
        assert!(result.is_err());
    }

    #[test]
    fn call_direct_rejects_a_call_that_suspends() {
        let mut instance = instantiate(yielding_module(), ContractRole::Utxo);
        let result = instance.call_direct("starstream_new_main", &[]);
        assert!(matches!(result, Err(WasmError::NotQuiescent { .. })));
    }
}
