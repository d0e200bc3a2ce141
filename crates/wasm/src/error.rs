//! Errors raised while loading, instantiating or calling into contract code.

use starstream_core::{HostError, ProgramId};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum WasmError {
    #[error("module {program_id} failed validation: {message}")]
    BadModule { program_id: ProgramId, message: String },

    #[error("unknown code: {program_id}")]
    UnknownCode { program_id: ProgramId },

    #[error("import module `{module}` is not recognized")]
    UnknownImport { module: String },

    #[error("trap in {program_id} at {entry_point}: {message}")]
    Trap {
        program_id: ProgramId,
        entry_point: String,
        message: String,
    },

    #[error("{export} did not return to a quiescent state")]
    NotQuiescent { export: String },

    #[error("resume argument size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// A host import dispatcher (the scheduler's coordination dispatcher or
    /// the token-linearity dispatcher) raised a typed `HostError` while the
    /// guest was mid-call. Recovered from the trap that carried it across
    /// the WebAssembly boundary (see `ContractInstance::step`'s downcast),
    /// so the original error kind survives instead of collapsing to `Trap`.
    #[error(transparent)]
    Host(#[from] HostError),
}

impl From<WasmError> for HostError {
    fn from(err: WasmError) -> Self {
        match err {
            WasmError::BadModule { program_id, message } => HostError::BadModule {
                program_id,
                reason: message,
            },
            WasmError::UnknownCode { program_id } => HostError::UnknownCode { program_id },
            WasmError::UnknownImport { module } => HostError::UnknownImport { module },
            WasmError::Trap {
                program_id,
                entry_point,
                message,
            } => HostError::Trap {
                program_id,
                entry_point,
                message,
            },
            WasmError::NotQuiescent { export } => HostError::NotQuiescent { export },
            WasmError::SizeMismatch { expected, actual } => HostError::SizeMismatch { expected, actual },
            WasmError::Host(err) => err,
        }
    }
}

pub type Result<T> = std::result::Result<T, WasmError>;
