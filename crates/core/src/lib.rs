//! Shared types for the Starstream transaction host: content-addressed
//! program identifiers, contract roles, coordination-local handles, the
//! error taxonomy, and the transaction log.

pub mod error;
pub mod handle;
pub mod log;
pub mod program_id;
pub mod role;

pub use error::{HostError, Result};
pub use handle::Handle;
pub use log::{LogTag, TransactionLogEntry, TxLog};
pub use program_id::ProgramId;
pub use role::ContractRole;
