//! Finalization Coordinator
//!
//! Closes out a withdrawal once per-asset swaps have confirmed: issues the
//! unsigned finalize transaction, verifies the submitted signature, records
//! the investor's history entry and settles the state machine. Also owns the
//! standalone unwrap operation for a fund's leftover wrapped-native balance.

use std::str::FromStr;
use std::sync::Arc;

use solana_sdk::{compute_budget::ComputeBudgetInstruction, pubkey::Pubkey};
use tracing::{info, warn};

use super::assembler::{
    compile_v0_bundle, decode_bundle, finalize_withdrawal_instruction, unwrap_native_instruction,
};
use crate::common::{OrchestratorError, Result};
use crate::config::OrchestratorConfig;
use crate::ledger::LedgerClient;
use crate::storage::{WithdrawalHistoryStore, WithdrawalStateStore};
use crate::types::{TxBundle, WithdrawalRecord, WithdrawalStatus};

pub struct FinalizationCoordinator<L> {
    ledger: Arc<L>,
    states: Arc<dyn WithdrawalStateStore>,
    history: Arc<dyn WithdrawalHistoryStore>,
    program_id: Pubkey,
    settlement_mint: Pubkey,
    treasury: Pubkey,
    priority_microlamports: u64,
    finalize_compute_units: u32,
}

impl<L: LedgerClient> FinalizationCoordinator<L> {
    pub fn new(
        ledger: Arc<L>,
        states: Arc<dyn WithdrawalStateStore>,
        history: Arc<dyn WithdrawalHistoryStore>,
        program_id: Pubkey,
        settlement_mint: Pubkey,
        treasury: Pubkey,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            ledger,
            states,
            history,
            program_id,
            settlement_mint,
            treasury,
            priority_microlamports: config.priority_microlamports,
            finalize_compute_units: config.finalize_compute_units,
        }
    }

    /// Build the unsigned finalize transaction and move to `Finalizing`
    ///
    /// Re-reading the state guards against duplicate finalization. A state
    /// already in `Finalizing` may request a fresh bundle (the previous one
    /// expired); terminal states are rejected.
    pub async fn finalize(&self, withdrawal_id: &str) -> Result<TxBundle> {
        let mut state = self
            .states
            .get(withdrawal_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found(format!("withdrawal {}", withdrawal_id)))?;

        match state.status {
            WithdrawalStatus::Planned
            | WithdrawalStatus::Executing
            | WithdrawalStatus::Finalizing => {}
            WithdrawalStatus::Requested => {
                return Err(OrchestratorError::conflict(
                    "withdrawal has no liquidation plan yet",
                ));
            }
            WithdrawalStatus::Finalized | WithdrawalStatus::Failed => {
                return Err(OrchestratorError::conflict(format!(
                    "withdrawal is terminal ({})",
                    state.status
                )));
            }
        }

        let investor = parse_address(&state.investor)?;
        let fund = parse_address(&state.fund)?;
        let snapshot = self.ledger.get_fund_snapshot(&fund).await?;

        let instructions = vec![
            ComputeBudgetInstruction::set_compute_unit_price(self.priority_microlamports),
            ComputeBudgetInstruction::set_compute_unit_limit(self.finalize_compute_units),
            finalize_withdrawal_instruction(
                &self.program_id,
                &investor,
                &fund,
                &snapshot.shares_mint,
                &self.settlement_mint,
                &self.treasury,
            ),
        ];

        let bundle =
            compile_v0_bundle(self.ledger.as_ref(), &investor, &instructions, &[], None).await?;

        // Dry-run before handing the transfer out; a rejection carries the
        // ledger's diagnostic logs back to the caller.
        self.ledger.simulate(&decode_bundle(&bundle)?).await?;

        state.mark_finalizing();
        self.states.update(&state).await?;

        info!(withdrawal_id, fund = %fund, "finalize transaction issued");
        Ok(bundle)
    }

    /// Verify the finalize signature, record history and mark `Finalized`
    ///
    /// Idempotent: confirming an already-finalized withdrawal returns
    /// `false` without touching history. Returns `true` when the history
    /// entry was newly recorded.
    pub async fn confirm_finalize(
        &self,
        withdrawal_id: &str,
        tx_ref: &str,
        amount: u64,
        details: Option<serde_json::Value>,
    ) -> Result<bool> {
        let mut state = self
            .states
            .get(withdrawal_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found(format!("withdrawal {}", withdrawal_id)))?;

        if state.status == WithdrawalStatus::Finalized {
            return Ok(false);
        }
        if state.status != WithdrawalStatus::Finalizing {
            return Err(OrchestratorError::conflict(format!(
                "withdrawal is {}, expected finalizing",
                state.status
            )));
        }

        if !self.ledger.is_confirmed(tx_ref).await? {
            warn!(withdrawal_id, tx_ref, "finalize transaction not confirmed");
            return Err(OrchestratorError::ledger(format!(
                "transaction not confirmed: {}",
                tx_ref
            )));
        }

        let record = WithdrawalRecord::new(state.fund.clone(), amount, tx_ref.to_string(), details);
        let inserted = self.history.append_if_absent(&state.investor, &record).await?;

        state.mark_finalized();
        self.states.update(&state).await?;

        info!(withdrawal_id, tx_ref, amount, "withdrawal finalized");
        Ok(inserted)
    }

    /// Append a withdrawal record outside the finalize flow
    ///
    /// Idempotent on `tx_ref`; used when the client confirmed and settled
    /// the transaction itself.
    pub async fn record(&self, investor: &str, record: WithdrawalRecord) -> Result<bool> {
        parse_address(investor)?;
        parse_address(&record.fund)?;

        Ok(self.history.append_if_absent(investor, &record).await?)
    }

    /// Per-investor withdrawal history
    pub async fn history(&self, investor: &str) -> Result<Vec<WithdrawalRecord>> {
        Ok(self.history.get_history(investor).await?)
    }

    /// Build the idempotent unwrap transaction for a fund's leftover
    /// wrapped-native balance; decoupled from any particular withdrawal
    pub async fn unwrap(&self, authority: &str, fund: &str) -> Result<TxBundle> {
        let authority = parse_address(authority)?;
        let fund = parse_address(fund)?;

        let instructions = vec![
            ComputeBudgetInstruction::set_compute_unit_price(self.priority_microlamports),
            ComputeBudgetInstruction::set_compute_unit_limit(self.finalize_compute_units),
            unwrap_native_instruction(&self.program_id, &authority, &fund, &self.settlement_mint),
        ];

        compile_v0_bundle(self.ledger.as_ref(), &authority, &instructions, &[], None).await
    }
}

pub(crate) fn parse_address(s: &str) -> Result<Pubkey> {
    Pubkey::from_str(s).map_err(|_| OrchestratorError::validation(format!("invalid address: {}", s)))
}
