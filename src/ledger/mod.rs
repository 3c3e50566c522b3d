//! Ledger Program Interface
//!
//! Abstract contract over the on-chain managed-funds program plus the chain
//! RPC reads the orchestrator needs. The concrete implementation lives in
//! [`rpc`]; tests substitute a mock.

pub mod rpc;

use async_trait::async_trait;
use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};
use solana_sdk::{
    address_lookup_table::AddressLookupTableAccount, hash::Hash, pubkey::Pubkey,
    transaction::VersionedTransaction,
};

use crate::types::FundLedgerSnapshot;

pub use rpc::RpcLedgerClient;

/// SPL Token program ID
pub const TOKEN_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA");

/// Associated Token Account program ID
pub const ATA_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

/// Swap router program the ledger program forwards to
pub const ROUTER_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4");

/// Ledger errors
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("account decode failed: {0}")]
    Decode(String),

    #[error("simulation failed: {err}; logs: {logs:?}")]
    Simulation { err: String, logs: Vec<String> },
}

/// Read access to the external ledger
///
/// Writes go through unsigned transactions the client signs; this trait only
/// covers the reads and confirmation checks the orchestrator performs itself.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Fund account plus its held token balances (shares mint included,
    /// callers filter)
    async fn get_fund_snapshot(&self, fund: &Pubkey) -> Result<FundLedgerSnapshot, LedgerError>;

    /// On-chain withdrawal fraction, if an initiate transaction landed
    async fn get_withdrawal_fraction(
        &self,
        investor: &Pubkey,
        fund: &Pubkey,
    ) -> Result<Option<u16>, LedgerError>;

    /// Investor's share balance in a fund
    async fn get_investor_shares(&self, investor: &Pubkey, fund: &Pubkey)
        -> Result<u64, LedgerError>;

    /// Fresh recency token and its expiry height
    async fn latest_blockhash(&self) -> Result<(Hash, u64), LedgerError>;

    /// Resolve address-compression tables into concrete account lists
    async fn resolve_lookup_tables(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<AddressLookupTableAccount>, LedgerError>;

    /// Whether a submitted transaction reached confirmed commitment
    async fn is_confirmed(&self, tx_ref: &str) -> Result<bool, LedgerError>;

    /// Dry-run a transaction; returns diagnostic detail on rejection
    async fn simulate(&self, tx: &VersionedTransaction) -> Result<(), LedgerError>;
}

// ============================================================================
// On-chain account shapes
// ============================================================================

/// Anchor account discriminator length
const DISCRIMINATOR_LEN: usize = 8;

/// Fund account data
#[derive(Debug, Clone, BorshSerialize, BorshDeserialize)]
pub struct FundAccount {
    pub manager: Pubkey,
    pub shares_mint: Pubkey,
    pub total_shares: u64,
    pub total_deposits: u64,
    pub current_value: u64,
    pub performance_fee_bps: u16,
}

/// WithdrawalState account data
#[derive(Debug, Clone, BorshSerialize, BorshDeserialize)]
pub struct WithdrawalStateAccount {
    pub investor: Pubkey,
    pub fund: Pubkey,
    pub fraction_bps: u16,
    pub shares_to_burn: u64,
}

/// InvestorPosition account data
#[derive(Debug, Clone, BorshSerialize, BorshDeserialize)]
pub struct InvestorPositionAccount {
    pub investor: Pubkey,
    pub fund: Pubkey,
    pub shares: u64,
}

/// Decode an anchor account, skipping its 8-byte discriminator
pub fn decode_account<T: BorshDeserialize>(data: &[u8], name: &str) -> Result<T, LedgerError> {
    if data.len() < DISCRIMINATOR_LEN {
        return Err(LedgerError::Decode(format!("{}: account too short", name)));
    }
    T::try_from_slice(&data[DISCRIMINATOR_LEN..])
        .map_err(|e| LedgerError::Decode(format!("{}: {}", name, e)))
}

/// Anchor-style 8-byte instruction discriminator
pub fn instruction_discriminator(name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("global:{}", name).as_bytes());
    let mut disc = [0u8; 8];
    disc.copy_from_slice(&digest[..8]);
    disc
}

// ============================================================================
// Deterministic sub-accounts
// ============================================================================

/// Derive the WithdrawalState PDA for (fund, investor)
pub fn derive_withdrawal_state(program_id: &Pubkey, fund: &Pubkey, investor: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[b"withdrawal", fund.as_ref(), investor.as_ref()], program_id).0
}

/// Derive the InvestorPosition PDA for (investor, fund)
pub fn derive_investor_position(program_id: &Pubkey, investor: &Pubkey, fund: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[b"position", investor.as_ref(), fund.as_ref()], program_id).0
}

/// Compute the associated token address for an owner and mint
pub fn get_ata(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[owner.as_ref(), TOKEN_PROGRAM_ID.as_ref(), mint.as_ref()],
        &ATA_PROGRAM_ID,
    )
    .0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_discriminator_is_stable() {
        let a = instruction_discriminator("initiate_withdrawal");
        let b = instruction_discriminator("initiate_withdrawal");
        let c = instruction_discriminator("finalize_withdrawal");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_pda_derivation_is_deterministic() {
        let program = Pubkey::new_unique();
        let fund = Pubkey::new_unique();
        let investor = Pubkey::new_unique();

        let a = derive_withdrawal_state(&program, &fund, &investor);
        let b = derive_withdrawal_state(&program, &fund, &investor);
        assert_eq!(a, b);

        // Seed order matters: position uses (investor, fund)
        let pos = derive_investor_position(&program, &investor, &fund);
        assert_ne!(a, pos);
    }

    #[test]
    fn test_decode_account_round_trip() {
        let account = WithdrawalStateAccount {
            investor: Pubkey::new_unique(),
            fund: Pubkey::new_unique(),
            fraction_bps: 2500,
            shares_to_burn: 1_000,
        };

        let mut data = vec![0u8; 8];
        data.extend(borsh::to_vec(&account).unwrap());

        let decoded: WithdrawalStateAccount = decode_account(&data, "WithdrawalState").unwrap();
        assert_eq!(decoded.fraction_bps, 2500);
        assert_eq!(decoded.shares_to_burn, 1_000);
        assert_eq!(decoded.investor, account.investor);
    }

    #[test]
    fn test_decode_account_too_short() {
        let result: Result<WithdrawalStateAccount, _> = decode_account(&[1, 2, 3], "short");
        assert!(matches!(result, Err(LedgerError::Decode(_))));
    }
}
