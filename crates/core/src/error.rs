//! The host's error taxonomy.
//!
//! Every failure the scheduler can raise falls into exactly one of these
//! kinds. All of them propagate to the transaction boundary and trigger a
//! full rollback; none is recoverable inside the host.

use crate::program_id::ProgramId;
use thiserror::Error;

/// A single host-level failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// Module bytes failed parsing or validation.
    #[error("bad module {program_id}: {reason}")]
    BadModule { program_id: ProgramId, reason: String },

    /// A program id did not resolve to any known or loadable code.
    #[error("unknown code: {program_id}")]
    UnknownCode { program_id: ProgramId },

    /// An import was invoked from a role that forbids it.
    #[error("{import} called from {role} context, which forbids it")]
    WrongContext { import: String, role: String },

    /// A coordination-side handle was not present in the handle table.
    #[error("unknown handle {handle}")]
    UnknownHandle { handle: u32 },

    /// `resume`/`query`/`mutate`/`consume` was invoked against a UTXO whose
    /// lifecycle state does not permit it.
    #[error("utxo in state {state} cannot {attempted}")]
    BadState { state: String, attempted: String },

    /// A resume argument's byte length did not match the declared size.
    #[error("resume argument size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// A query/mutate/consume call left the instance mid-suspend instead of
    /// returning to quiescence.
    #[error("{export} did not return to a quiescent state")]
    NotQuiescent { export: String },

    /// A burn was attempted with a function whose suffix does not match the
    /// mint that produced the token.
    #[error("burn function `{burn_fn}` does not match mint function `{mint_fn}`")]
    BurnFnMismatch { mint_fn: String, burn_fn: String },

    /// The coordination entry point returned with pending token intermediates.
    #[error("{count} unresolved token intermediate(s) at transaction return")]
    UnresolvedIntermediate { count: u32 },

    /// A UTXO raised an effect with no installed handler.
    #[error("unhandled effect `{effect}`")]
    UnhandledEffect { effect: String },

    /// WebAssembly execution trapped.
    #[error("trap in {program_id} at {entry_point}: {message}")]
    Trap {
        program_id: ProgramId,
        entry_point: String,
        message: String,
    },

    /// An import's module prefix is not one the router recognizes.
    #[error("unknown import module `{module}`")]
    UnknownImport { module: String },
}

pub type Result<T> = std::result::Result<T, HostError>;
