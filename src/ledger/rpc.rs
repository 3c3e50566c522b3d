//! Solana RPC Ledger Client
//!
//! Concrete [`LedgerClient`] over `solana-client`'s nonblocking RPC.
//! Token balances come back as JSON-parsed accounts, the same view the
//! original web clients consume.

use std::str::FromStr;

use async_trait::async_trait;
use solana_account_decoder::UiAccountData;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_request::TokenAccountsFilter;
use solana_sdk::{
    address_lookup_table::{state::AddressLookupTable, AddressLookupTableAccount},
    commitment_config::CommitmentConfig,
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};

use super::{
    decode_account, derive_investor_position, derive_withdrawal_state, FundAccount,
    InvestorPositionAccount, LedgerClient, LedgerError, WithdrawalStateAccount, TOKEN_PROGRAM_ID,
};
use crate::types::{FundLedgerSnapshot, HeldAsset};

/// RPC-backed ledger client
pub struct RpcLedgerClient {
    rpc: RpcClient,
    program_id: Pubkey,
}

impl RpcLedgerClient {
    /// Create a client against the given RPC endpoint
    pub fn new(rpc_url: &str, program_id: &str) -> Result<Self, LedgerError> {
        let rpc = RpcClient::new_with_commitment(rpc_url.to_string(), CommitmentConfig::confirmed());
        let program_id = parse_pubkey(program_id)?;

        Ok(Self { rpc, program_id })
    }

    /// Ledger program ID this client talks to
    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    async fn get_account_data(&self, address: &Pubkey, name: &str) -> Result<Vec<u8>, LedgerError> {
        let resp = self
            .rpc
            .get_account_with_commitment(address, CommitmentConfig::confirmed())
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))?;

        match resp.value {
            Some(account) => Ok(account.data),
            None => Err(LedgerError::AccountNotFound(format!("{}: {}", name, address))),
        }
    }
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn get_fund_snapshot(&self, fund: &Pubkey) -> Result<FundLedgerSnapshot, LedgerError> {
        let data = self.get_account_data(fund, "Fund").await?;
        let account: FundAccount = decode_account(&data, "Fund")?;

        let keyed = self
            .rpc
            .get_token_accounts_by_owner(fund, TokenAccountsFilter::ProgramId(TOKEN_PROGRAM_ID))
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))?;

        let mut held_assets = Vec::new();
        for entry in keyed {
            if let Some(asset) = parse_token_account(&entry.account.data)? {
                if asset.balance > 0 {
                    held_assets.push(asset);
                }
            }
        }

        Ok(FundLedgerSnapshot {
            fund: *fund,
            shares_mint: account.shares_mint,
            total_deposits: account.total_deposits,
            total_shares: account.total_shares,
            current_value: account.current_value,
            held_assets,
        })
    }

    async fn get_withdrawal_fraction(
        &self,
        investor: &Pubkey,
        fund: &Pubkey,
    ) -> Result<Option<u16>, LedgerError> {
        let address = derive_withdrawal_state(&self.program_id, fund, investor);

        let resp = self
            .rpc
            .get_account_with_commitment(&address, CommitmentConfig::confirmed())
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))?;

        match resp.value {
            Some(account) => {
                let state: WithdrawalStateAccount =
                    decode_account(&account.data, "WithdrawalState")?;
                Ok(Some(state.fraction_bps))
            }
            None => Ok(None),
        }
    }

    async fn get_investor_shares(
        &self,
        investor: &Pubkey,
        fund: &Pubkey,
    ) -> Result<u64, LedgerError> {
        let address = derive_investor_position(&self.program_id, investor, fund);
        let data = self.get_account_data(&address, "InvestorPosition").await?;
        let position: InvestorPositionAccount = decode_account(&data, "InvestorPosition")?;

        Ok(position.shares)
    }

    async fn latest_blockhash(&self) -> Result<(Hash, u64), LedgerError> {
        self.rpc
            .get_latest_blockhash_with_commitment(CommitmentConfig::confirmed())
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))
    }

    async fn resolve_lookup_tables(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<AddressLookupTableAccount>, LedgerError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        let accounts = self
            .rpc
            .get_multiple_accounts(addresses)
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))?;

        let mut resolved = Vec::new();
        for (address, account) in addresses.iter().zip(accounts) {
            let account = account.ok_or_else(|| {
                LedgerError::AccountNotFound(format!("lookup table: {}", address))
            })?;

            let table = AddressLookupTable::deserialize(&account.data)
                .map_err(|e| LedgerError::Decode(format!("lookup table {}: {}", address, e)))?;

            resolved.push(AddressLookupTableAccount {
                key: *address,
                addresses: table.addresses.to_vec(),
            });
        }

        Ok(resolved)
    }

    async fn is_confirmed(&self, tx_ref: &str) -> Result<bool, LedgerError> {
        let signature = Signature::from_str(tx_ref)
            .map_err(|_| LedgerError::InvalidAddress(format!("bad signature: {}", tx_ref)))?;

        self.rpc
            .confirm_transaction(&signature)
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))
    }

    async fn simulate(&self, tx: &VersionedTransaction) -> Result<(), LedgerError> {
        let resp = self
            .rpc
            .simulate_transaction(tx)
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))?;

        if let Some(err) = resp.value.err {
            return Err(LedgerError::Simulation {
                err: format!("{:?}", err),
                logs: resp.value.logs.unwrap_or_default(),
            });
        }

        Ok(())
    }
}

/// Parse pubkey from string
pub fn parse_pubkey(s: &str) -> Result<Pubkey, LedgerError> {
    Pubkey::from_str(s).map_err(|e| LedgerError::InvalidAddress(format!("{}: {}", s, e)))
}

/// Extract mint and raw balance from a JSON-parsed SPL token account
fn parse_token_account(data: &UiAccountData) -> Result<Option<HeldAsset>, LedgerError> {
    let parsed = match data {
        UiAccountData::Json(parsed) if parsed.program == "spl-token" => &parsed.parsed,
        _ => return Ok(None),
    };

    let info = &parsed["info"];
    let mint = match info["mint"].as_str() {
        Some(mint) => parse_pubkey(mint)?,
        None => return Ok(None),
    };
    let balance = info["tokenAmount"]["amount"]
        .as_str()
        .and_then(|a| a.parse::<u64>().ok())
        .unwrap_or(0);

    Ok(Some(HeldAsset {
        asset: mint,
        balance,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_account_decoder::parse_account_data::ParsedAccount;

    fn json_token_account(mint: &str, amount: &str) -> UiAccountData {
        UiAccountData::Json(ParsedAccount {
            program: "spl-token".to_string(),
            parsed: serde_json::json!({
                "info": {
                    "mint": mint,
                    "tokenAmount": { "amount": amount, "decimals": 6 }
                },
                "type": "account"
            }),
            space: 165,
        })
    }

    #[test]
    fn test_parse_token_account() {
        let mint = Pubkey::new_unique();
        let data = json_token_account(&mint.to_string(), "123456");

        let asset = parse_token_account(&data).unwrap().unwrap();
        assert_eq!(asset.asset, mint);
        assert_eq!(asset.balance, 123_456);
    }

    #[test]
    fn test_parse_token_account_skips_other_programs() {
        let data = UiAccountData::Json(ParsedAccount {
            program: "stake".to_string(),
            parsed: serde_json::json!({}),
            space: 200,
        });

        assert!(parse_token_account(&data).unwrap().is_none());
    }

    #[test]
    fn test_parse_pubkey_rejects_garbage() {
        assert!(parse_pubkey("not-a-pubkey").is_err());
        assert!(parse_pubkey("So11111111111111111111111111111111111111112").is_ok());
    }
}
