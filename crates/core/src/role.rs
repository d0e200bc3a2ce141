//! Contract roles and the import-module prefixes each one is permitted to call.

use std::fmt;

/// The role an instantiated contract is playing.
///
/// A single module may export entry points for more than one role; the role
/// of a given instance is fixed at instantiation by which entry point is
/// invoked, never by the module itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractRole {
    Coordination,
    Utxo,
    TokenMint,
}

impl fmt::Display for ContractRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContractRole::Coordination => "coordination",
            ContractRole::Utxo => "utxo",
            ContractRole::TokenMint => "token-mint",
        };
        write!(f, "{name}")
    }
}

impl ContractRole {
    /// Whether an import under `module_prefix` is callable from this role.
    ///
    /// `env` is callable from every role; `starstream_utxo_env` is utxo-only;
    /// `starstream_utxo:*` is coordination-only; `starstream_token:*` is
    /// utxo-only.
    pub fn permits_import_module(&self, module_prefix: &str) -> bool {
        if module_prefix == "env" {
            return true;
        }
        match self {
            ContractRole::Utxo => {
                module_prefix == "starstream_utxo_env" || module_prefix.starts_with("starstream_token:")
            }
            ContractRole::Coordination => module_prefix.starts_with("starstream_utxo:"),
            ContractRole::TokenMint => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_is_universal() {
        assert!(ContractRole::Coordination.permits_import_module("env"));
        assert!(ContractRole::Utxo.permits_import_module("env"));
        assert!(ContractRole::TokenMint.permits_import_module("env"));
    }

    #[test]
    fn utxo_env_is_utxo_only() {
        assert!(ContractRole::Utxo.permits_import_module("starstream_utxo_env"));
        assert!(!ContractRole::Coordination.permits_import_module("starstream_utxo_env"));
    }

    #[test]
    fn utxo_namespace_is_coordination_only() {
        assert!(ContractRole::Coordination.permits_import_module("starstream_utxo:deadbeef"));
        assert!(!ContractRole::Utxo.permits_import_module("starstream_utxo:deadbeef"));
    }

    #[test]
    fn token_namespace_is_utxo_only() {
        assert!(ContractRole::Utxo.permits_import_module("starstream_token:deadbeef"));
        assert!(!ContractRole::Coordination.permits_import_module("starstream_token:deadbeef"));
    }

    #[test]
    fn token_mint_role_has_no_suspension_imports() {
        assert!(!ContractRole::TokenMint.permits_import_module("starstream_utxo_env"));
        assert!(!ContractRole::TokenMint.permits_import_module("starstream_utxo:deadbeef"));
    }
}
