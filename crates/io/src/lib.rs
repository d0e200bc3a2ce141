//! Binary encoding helpers used by the persisted UTXO ledger state and by
//! transaction log entries.
//!
//! The format is deliberately simple: length-prefixed byte strings,
//! fixed-width integers, little-endian throughout.

pub mod error;
pub mod reader;
pub mod writer;

pub use error::{IoError, Result};
pub use reader::BinaryReader;
pub use writer::BinaryWriter;
