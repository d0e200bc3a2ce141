//! Starstream host configuration.
//!
//! This module provides the configuration surface for embedding the
//! transaction scheduler: the asyncify stack-save region, the handle
//! allocation range, and the digest algorithm marker. All four options
//! named by the host's external interface are represented here.

use serde::{Deserialize, Serialize};

/// Default stack-save region `[start, end]` used by the suspend/resume
/// save buffer. Contracts must not claim memory in this range.
pub const DEFAULT_STACK_START: u32 = 16;
pub const DEFAULT_STACK_END: u32 = 1024;

/// Default inclusive-exclusive handle range: `[1, 2^30]`.
pub const DEFAULT_HANDLE_MIN: u32 = 1;
pub const DEFAULT_HANDLE_MAX: u32 = 1 << 30;

/// The digest algorithm used to key the contract-code registry. Fixed at
/// SHA-256; kept as an enum for forward documentation rather than as a
/// real choice point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DigestAlgorithm {
    #[default]
    Sha256,
}

impl DigestAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
        }
    }
}

/// The two-word save-buffer region the asyncify-equivalent suspend
/// machinery reserves inside a UTXO's linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackRegion {
    pub start: u32,
    pub end: u32,
}

impl Default for StackRegion {
    fn default() -> Self {
        Self {
            start: DEFAULT_STACK_START,
            end: DEFAULT_STACK_END,
        }
    }
}

impl StackRegion {
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// The range handles are drawn from for a single coordination instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleSpace {
    pub min: u32,
    pub max: u32,
}

impl Default for HandleSpace {
    fn default() -> Self {
        Self {
            min: DEFAULT_HANDLE_MIN,
            max: DEFAULT_HANDLE_MAX,
        }
    }
}

/// Top-level configuration for a host embedding.
///
/// The byte-provider capability named in the external interface is not a
/// field here: it is an injected trait object (`starstream_wasm::ByteProvider`)
/// supplied at registry construction time, not a serializable setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct HostConfig {
    pub stack_region: StackRegion,
    pub handle_space: HandleSpace,
    pub digest_algorithm: DigestAlgorithm,
}

impl HostConfig {
    pub fn new() -> Self {
        Self::default()
    }
}
