//! Token records attached to UTXOs.

use starstream_core::ProgramId;

/// A token created by a token-mint contract and attached to exactly one
/// UTXO. Transferring a token is always detach-then-attach; it is never
/// shared between two UTXOs at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    /// The program that minted this token.
    pub minting_program_id: ProgramId,
    /// The suffix shared by the mint and burn export that produced and must
    /// eventually destroy this token (e.g. `"nft"` for
    /// `starstream_mint_nft`/`starstream_burn_nft`). Burning with any other
    /// suffix fails with `BurnFnMismatch`.
    pub mint_fn: String,
    pub id: u64,
    pub amount: u64,
}

impl TokenRecord {
    pub fn new(minting_program_id: ProgramId, mint_fn: impl Into<String>, id: u64, amount: u64) -> Self {
        Self {
            minting_program_id,
            mint_fn: mint_fn.into(),
            id,
            amount,
        }
    }

    /// Whether `burn_fn` is the matching burn suffix for this token's mint.
    pub fn matches_burn_fn(&self, burn_fn: &str) -> bool {
        self.mint_fn == burn_fn
    }
}
