//! Withdrawal Service
//!
//! Front door of the liquidation pipeline: validates requests, enforces the
//! single-active-withdrawal invariant through the state store, and drives
//! the planner and assembler. Individual steps return unsigned transactions;
//! the client signs and submits.

use std::sync::Arc;

use solana_sdk::{compute_budget::ComputeBudgetInstruction, pubkey::Pubkey};
use tracing::{info, warn};

use super::assembler::{
    compile_v0_bundle, initiate_withdrawal_instruction, SwapInstructionSource,
    TransactionAssembler,
};
use super::finalizer::parse_address;
use super::planner::{LiquidationPlanner, QuoteSource};
use crate::common::{OrchestratorError, Result};
use crate::config::OrchestratorConfig;
use crate::ledger::LedgerClient;
use crate::storage::WithdrawalStateStore;
use crate::types::{LiquidationPlan, TxBundle, WithdrawalState, WithdrawalStatus};

pub struct WithdrawalService<L, Q, S> {
    ledger: Arc<L>,
    states: Arc<dyn WithdrawalStateStore>,
    planner: LiquidationPlanner<Q>,
    assembler: TransactionAssembler<L, S>,
    program_id: Pubkey,
    priority_microlamports: u64,
    base_compute_units: u32,
}

impl<L, Q, S> WithdrawalService<L, Q, S>
where
    L: LedgerClient,
    Q: QuoteSource,
    S: SwapInstructionSource,
{
    pub fn new(
        ledger: Arc<L>,
        states: Arc<dyn WithdrawalStateStore>,
        planner: LiquidationPlanner<Q>,
        assembler: TransactionAssembler<L, S>,
        program_id: Pubkey,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            ledger,
            states,
            planner,
            assembler,
            program_id,
            priority_microlamports: config.priority_microlamports,
            base_compute_units: config.finalize_compute_units,
        }
    }

    /// Accept a withdrawal request and issue the initiate transaction
    ///
    /// `percent` is the caller-facing fraction in (0, 100]; it converts to
    /// basis points before anything touches storage. A non-terminal state
    /// for the same (investor, fund) rejects with Conflict.
    pub async fn start(
        &self,
        investor: &str,
        fund: &str,
        percent: f64,
    ) -> Result<(WithdrawalState, TxBundle)> {
        let investor_key = parse_address(investor)?;
        let fund_key = parse_address(fund)?;
        let fraction_bps = percent_to_bps(percent)?;

        // Both reads happen before any side effect
        self.ledger.get_fund_snapshot(&fund_key).await?;
        let shares = self
            .ledger
            .get_investor_shares(&investor_key, &fund_key)
            .await?;
        if shares == 0 {
            return Err(OrchestratorError::validation(format!(
                "investor {} holds no shares in fund {}",
                investor, fund
            )));
        }

        let state = WithdrawalState::new(investor.to_string(), fund.to_string(), fraction_bps);
        self.states.insert_if_no_active(&state).await?;

        let bundle = match self.build_initiate(&investor_key, &fund_key, fraction_bps).await {
            Ok(bundle) => bundle,
            Err(e) => {
                // Free the slot so the investor can retry
                let mut failed = state.clone();
                failed.mark_failed(format!("initiate build failed: {}", e));
                if let Err(update_err) = self.states.update(&failed).await {
                    warn!(id = %state.id, error = %update_err, "failed to mark withdrawal failed");
                }
                return Err(e);
            }
        };

        info!(
            id = %state.id,
            investor,
            fund,
            fraction_bps,
            "withdrawal requested"
        );
        Ok((state, bundle))
    }

    async fn build_initiate(
        &self,
        investor: &Pubkey,
        fund: &Pubkey,
        fraction_bps: u16,
    ) -> Result<TxBundle> {
        let instructions = vec![
            ComputeBudgetInstruction::set_compute_unit_price(self.priority_microlamports),
            ComputeBudgetInstruction::set_compute_unit_limit(self.base_compute_units),
            initiate_withdrawal_instruction(&self.program_id, investor, fund, fraction_bps)?,
        ];

        compile_v0_bundle(self.ledger.as_ref(), investor, &instructions, &[], None).await
    }

    /// Compute the liquidation plan and issue per-asset swap bundles
    ///
    /// The on-chain withdrawal fraction is authoritative: planning requires
    /// the initiate transaction to have confirmed. Re-planning an
    /// `Executing` withdrawal is allowed (expired bundles are discarded and
    /// rebuilt); anything past that is a conflict.
    pub async fn plan(
        &self,
        withdrawal_id: &str,
        dust_override: Option<u64>,
    ) -> Result<(WithdrawalState, LiquidationPlan, Vec<TxBundle>)> {
        let mut state = self
            .states
            .get(withdrawal_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found(format!("withdrawal {}", withdrawal_id)))?;

        match state.status {
            WithdrawalStatus::Requested
            | WithdrawalStatus::Planned
            | WithdrawalStatus::Executing => {}
            other => {
                return Err(OrchestratorError::conflict(format!(
                    "withdrawal is {}, planning is closed",
                    other
                )));
            }
        }

        let investor = parse_address(&state.investor)?;
        let fund = parse_address(&state.fund)?;

        let fraction_bps = self
            .ledger
            .get_withdrawal_fraction(&investor, &fund)
            .await?
            .ok_or_else(|| {
                OrchestratorError::conflict("initiate transaction not confirmed on the ledger")
            })?;

        let snapshot = self.ledger.get_fund_snapshot(&fund).await?;
        let mut plan = self.planner.plan(&snapshot, fraction_bps, dust_override).await;

        state.mark_planned();
        self.states.update(&state).await?;

        // Per-asset build failures degrade the plan in place
        let bundles = self.assembler.assemble(&investor, &fund, &mut plan).await?;
        if !bundles.is_empty() {
            state.mark_executing();
            self.states.update(&state).await?;
        }

        Ok((state, plan, bundles))
    }

    /// Mark a non-terminal withdrawal failed with a reason
    ///
    /// Abandoned flows go through here; a fresh `start` is then required.
    pub async fn fail(&self, withdrawal_id: &str, reason: &str) -> Result<WithdrawalState> {
        let mut state = self
            .states
            .get(withdrawal_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found(format!("withdrawal {}", withdrawal_id)))?;

        if state.status.is_terminal() {
            return Err(OrchestratorError::conflict(format!(
                "withdrawal is already terminal ({})",
                state.status
            )));
        }

        state.mark_failed(reason.to_string());
        self.states.update(&state).await?;

        info!(withdrawal_id, reason, "withdrawal failed");
        Ok(state)
    }

    /// Current state of a withdrawal
    pub async fn get(&self, withdrawal_id: &str) -> Result<WithdrawalState> {
        self.states
            .get(withdrawal_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found(format!("withdrawal {}", withdrawal_id)))
    }
}

/// Convert a caller-facing percent in (0, 100] to basis points in [1, 10000]
fn percent_to_bps(percent: f64) -> Result<u16> {
    if !percent.is_finite() || percent <= 0.0 || percent > 100.0 {
        return Err(OrchestratorError::validation(format!(
            "percent must be in (0, 100], got {}",
            percent
        )));
    }

    let bps = (percent * 100.0).round() as u16;
    if bps == 0 {
        return Err(OrchestratorError::validation(format!(
            "percent {} rounds below one basis point",
            percent
        )));
    }

    Ok(bps.min(10_000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MockLedgerClient;
    use crate::router_client::{RouteQuote, RouterInstruction, SwapInstructions};
    use crate::storage::MemoryWithdrawalStateStore;
    use crate::types::{FundLedgerSnapshot, HeldAsset};
    use crate::withdrawal::assembler::MockSwapInstructionSource;
    use crate::withdrawal::planner::MockQuoteSource;
    use serde_json::json;
    use solana_sdk::hash::Hash;

    fn mock_ledger(held: Vec<HeldAsset>, shares: u64, fraction: Option<u16>) -> MockLedgerClient {
        let mut ledger = MockLedgerClient::new();
        ledger.expect_get_fund_snapshot().returning(move |fund| {
            Ok(FundLedgerSnapshot {
                fund: *fund,
                shares_mint: Pubkey::new_unique(),
                total_deposits: 0,
                total_shares: 1_000,
                current_value: 0,
                held_assets: held.clone(),
            })
        });
        ledger
            .expect_get_investor_shares()
            .returning(move |_, _| Ok(shares));
        ledger
            .expect_get_withdrawal_fraction()
            .returning(move |_, _| Ok(fraction));
        ledger
            .expect_resolve_lookup_tables()
            .returning(|_| Ok(Vec::new()));
        ledger
            .expect_latest_blockhash()
            .returning(|| Ok((Hash::new_unique(), 100)));
        ledger
    }

    fn quoting_source() -> MockQuoteSource {
        let mut quotes = MockQuoteSource::new();
        quotes.expect_quote().returning(|_, _, _, _| {
            Ok(RouteQuote {
                in_amount: 0,
                expected_out: 5_000_000_000,
                min_out: 4_000_000_000,
                raw: json!({"routePlan": [{}]}),
            })
        });
        quotes
    }

    fn instruction_source() -> MockSwapInstructionSource {
        let mut router = MockSwapInstructionSource::new();
        router.expect_swap_instructions().returning(|_, _, _, _, _| {
            Ok(SwapInstructions {
                setup: vec![],
                swap: RouterInstruction {
                    program_id: crate::ledger::ROUTER_PROGRAM_ID,
                    accounts: vec![],
                    data: vec![1],
                },
                lookup_tables: vec![],
            })
        });
        router
    }

    fn service(
        ledger: MockLedgerClient,
        quotes: MockQuoteSource,
        router: MockSwapInstructionSource,
        states: Arc<MemoryWithdrawalStateStore>,
    ) -> WithdrawalService<MockLedgerClient, MockQuoteSource, MockSwapInstructionSource> {
        let config = OrchestratorConfig::from_env().unwrap();
        let ledger = Arc::new(ledger);
        let settlement = Pubkey::new_unique();
        let program_id = Pubkey::new_unique();

        let planner = LiquidationPlanner::new(quotes, settlement, &config);
        let assembler = TransactionAssembler::new(
            ledger.clone(),
            Arc::new(router),
            program_id,
            settlement,
            &config,
        );

        WithdrawalService::new(ledger, states, planner, assembler, program_id, &config)
    }

    #[tokio::test]
    async fn test_start_issues_initiate_bundle() {
        let states = Arc::new(MemoryWithdrawalStateStore::new());
        let svc = service(
            mock_ledger(vec![], 500, None),
            MockQuoteSource::new(),
            MockSwapInstructionSource::new(),
            states.clone(),
        );

        let investor = Pubkey::new_unique().to_string();
        let fund = Pubkey::new_unique().to_string();

        let (state, bundle) = svc.start(&investor, &fund, 25.0).await.unwrap();

        assert_eq!(state.fraction_bps, 2500);
        assert_eq!(state.status, WithdrawalStatus::Requested);
        assert!(!bundle.tx_base64.is_empty());
        assert!(states.get_active(&investor, &fund).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_second_start_conflicts() {
        let states = Arc::new(MemoryWithdrawalStateStore::new());
        let svc = service(
            mock_ledger(vec![], 500, None),
            MockQuoteSource::new(),
            MockSwapInstructionSource::new(),
            states,
        );

        let investor = Pubkey::new_unique().to_string();
        let fund = Pubkey::new_unique().to_string();

        svc.start(&investor, &fund, 25.0).await.unwrap();
        let err = svc.start(&investor, &fund, 50.0).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_start_validates_percent_and_position() {
        let states = Arc::new(MemoryWithdrawalStateStore::new());
        let svc = service(
            mock_ledger(vec![], 0, None),
            MockQuoteSource::new(),
            MockSwapInstructionSource::new(),
            states,
        );

        let investor = Pubkey::new_unique().to_string();
        let fund = Pubkey::new_unique().to_string();

        for bad in [0.0, -5.0, 100.5, f64::NAN] {
            let err = svc.start(&investor, &fund, bad).await.unwrap_err();
            assert!(matches!(err, OrchestratorError::Validation(_)));
        }

        // Zero shares
        let err = svc.start(&investor, &fund, 25.0).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));

        // Malformed address
        let err = svc.start("not-an-address", &fund, 25.0).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }

    #[tokio::test]
    async fn test_plan_issues_bundles_and_advances_state() {
        let states = Arc::new(MemoryWithdrawalStateStore::new());
        let held = vec![
            HeldAsset {
                asset: Pubkey::new_unique(),
                balance: 1_000_000,
            },
            HeldAsset {
                asset: Pubkey::new_unique(),
                balance: 500_000,
            },
        ];
        let svc = service(
            mock_ledger(held, 500, Some(2500)),
            quoting_source(),
            instruction_source(),
            states.clone(),
        );

        let investor = Pubkey::new_unique().to_string();
        let fund = Pubkey::new_unique().to_string();
        let (state, _) = svc.start(&investor, &fund, 25.0).await.unwrap();

        let (updated, plan, bundles) = svc.plan(&state.id, None).await.unwrap();

        assert_eq!(plan.items.len(), 2);
        assert_eq!(bundles.len(), 2);
        assert_eq!(updated.status, WithdrawalStatus::Executing);
        assert_eq!(
            states.get(&state.id).await.unwrap().unwrap().status,
            WithdrawalStatus::Executing
        );
    }

    #[tokio::test]
    async fn test_plan_requires_confirmed_initiate() {
        let states = Arc::new(MemoryWithdrawalStateStore::new());
        let svc = service(
            mock_ledger(vec![], 500, None), // fraction not on chain
            MockQuoteSource::new(),
            MockSwapInstructionSource::new(),
            states,
        );

        let investor = Pubkey::new_unique().to_string();
        let fund = Pubkey::new_unique().to_string();
        let (state, _) = svc.start(&investor, &fund, 25.0).await.unwrap();

        let err = svc.plan(&state.id, None).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_empty_plan_stays_planned() {
        let states = Arc::new(MemoryWithdrawalStateStore::new());
        // Fund holds nothing liquidatable
        let svc = service(
            mock_ledger(vec![], 500, Some(2500)),
            MockQuoteSource::new(),
            MockSwapInstructionSource::new(),
            states,
        );

        let investor = Pubkey::new_unique().to_string();
        let fund = Pubkey::new_unique().to_string();
        let (state, _) = svc.start(&investor, &fund, 25.0).await.unwrap();

        let (updated, plan, bundles) = svc.plan(&state.id, None).await.unwrap();

        assert!(plan.items.is_empty());
        assert!(bundles.is_empty());
        // No swaps to execute; finalize can proceed straight from Planned
        assert_eq!(updated.status, WithdrawalStatus::Planned);
    }

    #[tokio::test]
    async fn test_fail_frees_slot_for_new_start() {
        let states = Arc::new(MemoryWithdrawalStateStore::new());
        let svc = service(
            mock_ledger(vec![], 500, None),
            MockQuoteSource::new(),
            MockSwapInstructionSource::new(),
            states,
        );

        let investor = Pubkey::new_unique().to_string();
        let fund = Pubkey::new_unique().to_string();
        let (state, _) = svc.start(&investor, &fund, 25.0).await.unwrap();

        let failed = svc.fail(&state.id, "client abandoned").await.unwrap();
        assert_eq!(failed.status, WithdrawalStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("client abandoned"));

        // Terminal states cannot be failed again
        assert!(matches!(
            svc.fail(&state.id, "again").await,
            Err(OrchestratorError::Conflict(_))
        ));

        // And a fresh start succeeds
        svc.start(&investor, &fund, 50.0).await.unwrap();
    }
}
