//! Parses import module names into the role-scoped namespaces the host
//! recognizes, and classifies export names by the effect they have on a
//! UTXO.

use crate::error::WasmError;
use starstream_core::ProgramId;

/// Which host namespace an import module name belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportModule {
    /// Callable from every role.
    Env,
    /// `starstream_utxo_env` — UTXO-only suspension import.
    UtxoEnv,
    /// `starstream_utxo:{program-id}` — coordination-only UTXO operations.
    Utxo(ProgramId),
    /// `starstream_token:{program-id}` — UTXO-only token operations.
    Token(ProgramId),
}

impl ImportModule {
    pub fn prefix(&self) -> &'static str {
        match self {
            ImportModule::Env => "env",
            ImportModule::UtxoEnv => "starstream_utxo_env",
            ImportModule::Utxo(_) => "starstream_utxo",
            ImportModule::Token(_) => "starstream_token",
        }
    }

    pub fn parse(module: &str) -> Result<Self, WasmError> {
        if module == "env" {
            return Ok(ImportModule::Env);
        }
        if module == "starstream_utxo_env" {
            return Ok(ImportModule::UtxoEnv);
        }
        if let Some(hex_id) = module.strip_prefix("starstream_utxo:") {
            return parse_program_id(hex_id).map(ImportModule::Utxo);
        }
        if let Some(hex_id) = module.strip_prefix("starstream_token:") {
            return parse_program_id(hex_id).map(ImportModule::Token);
        }
        Err(WasmError::UnknownImport {
            module: module.to_string(),
        })
    }
}

fn parse_program_id(hex_id: &str) -> Result<ProgramId, WasmError> {
    let bytes = hex::decode(hex_id).map_err(|_| WasmError::UnknownImport {
        module: format!("starstream_utxo:{hex_id}"),
    })?;
    let array: [u8; 32] = bytes.try_into().map_err(|_| WasmError::UnknownImport {
        module: format!("starstream_utxo:{hex_id}"),
    })?;
    Ok(ProgramId::from_bytes(array))
}

/// What effect a `starstream_*` export has on the UTXO it's called against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    New,
    Resume,
    Query,
    Mutate,
    Consume,
    Status,
    Mint,
    Burn,
    Event,
    Handle,
}

impl ExportKind {
    /// Classifies `name` by its `starstream_*` prefix, returning `None` for
    /// exports the router has no special handling for (e.g. `memory`).
    pub fn classify(name: &str) -> Option<Self> {
        const PREFIXES: &[(&str, ExportKind)] = &[
            ("starstream_new_", ExportKind::New),
            ("starstream_resume_", ExportKind::Resume),
            ("starstream_query_", ExportKind::Query),
            ("starstream_mutate_", ExportKind::Mutate),
            ("starstream_consume_", ExportKind::Consume),
            ("starstream_status_", ExportKind::Status),
            ("starstream_mint_", ExportKind::Mint),
            ("starstream_burn_", ExportKind::Burn),
            ("starstream_event_", ExportKind::Event),
            ("starstream_handle_", ExportKind::Handle),
        ];
        PREFIXES
            .iter()
            .find(|(prefix, _)| name.starts_with(prefix))
            .map(|(_, kind)| *kind)
    }

    /// The part of the export name after its `starstream_*_` prefix, e.g.
    /// `"nft"` for `starstream_mint_nft`. Used to match mint/burn suffixes.
    pub fn suffix(name: &str) -> Option<&str> {
        const SEPARATORS: &[&str] = &[
            "starstream_new_",
            "starstream_resume_",
            "starstream_query_",
            "starstream_mutate_",
            "starstream_consume_",
            "starstream_status_",
            "starstream_mint_",
            "starstream_burn_",
            "starstream_event_",
            "starstream_handle_",
        ];
        SEPARATORS.iter().find_map(|prefix| name.strip_prefix(prefix))
    }
}
