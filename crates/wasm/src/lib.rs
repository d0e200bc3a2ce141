//! The ContractCode registry and role-scoped contract instantiation.
//!
//! This crate owns the boundary between the host and WebAssembly: loading
//! and caching compiled modules, enforcing the import-namespace discipline
//! that keeps a coordination instance from calling UTXO-only imports (and
//! vice versa), and driving the single suspension point
//! (`starstream_yield`) through `wasmtime`'s native async support instead
//! of a binary stack rewriter.

pub mod byte_provider;
pub mod error;
pub mod import_routing;
pub mod instance;
pub mod registry;

pub use byte_provider::{ByteProvider, DirectoryByteProvider, MemoryByteProvider};
pub use error::{Result, WasmError};
pub use import_routing::{ExportKind, ImportModule};
pub use instance::{ContractInstance, HostImportDispatcher, StepOutcome};
pub use registry::{ContractCode, ContractCodeRegistry};

/// Builds the `wasmtime::Engine` every `ContractCodeRegistry` and
/// `ContractInstance` in a host embedding should share, with async support
/// enabled (required for `starstream_yield`'s suspend/resume driving).
pub fn new_engine() -> wasmtime::Result<wasmtime::Engine> {
    let mut config = wasmtime::Config::new();
    config.async_support(true);
    wasmtime::Engine::new(&config)
}
