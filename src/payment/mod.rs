//! Proportional Payout Ledger
//!
//! Operator-triggered distribution of realized proceeds to a fund's
//! investors. Pure integer fee-split math, pro-rata allocation floored per
//! recipient, bounded transfer batches, and idempotent payment records keyed
//! by transaction reference.

use std::collections::HashMap;
use std::sync::Arc;

use borsh::BorshSerialize;
use serde::Serialize;
use solana_sdk::{
    compute_budget::ComputeBudgetInstruction,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};
use tracing::info;

use crate::common::{OrchestratorError, Result};
use crate::config::OrchestratorConfig;
use crate::ledger::{get_ata, instruction_discriminator, LedgerClient, TOKEN_PROGRAM_ID};
use crate::storage::PaymentStore;
use crate::types::{PaymentRecord, PayoutSplit, Recipient, TxBundle, BPS_DENOMINATOR};
use crate::withdrawal::assembler::compile_v0_bundle;
use crate::withdrawal::finalizer::parse_address;

/// Platform fee: 100 bps (1%) of the distributed value
const PLATFORM_FEE_BPS: u64 = 100;

/// Treasury's cut of the performance fee: 2000 bps (20%)
const TREASURY_PERF_BPS: u64 = 2000;

/// A computed payout: the fee split, recipient batches and one unsigned
/// transfer transaction per batch
#[derive(Debug, Serialize)]
pub struct PayoutPlan {
    pub split: PayoutSplit,
    pub batches: Vec<Vec<Recipient>>,
    pub bundles: Vec<TxBundle>,
}

/// Borsh payload of `distribute_payout`
#[derive(BorshSerialize)]
struct DistributePayoutArgs {
    amounts: Vec<u64>,
}

pub struct PaymentLedger<L> {
    ledger: Arc<L>,
    payments: Arc<dyn PaymentStore>,
    program_id: Pubkey,
    settlement_mint: Pubkey,
    treasury: Pubkey,
    batch_cap: usize,
    priority_microlamports: u64,
    compute_units: u32,
}

impl<L: LedgerClient> PaymentLedger<L> {
    pub fn new(
        ledger: Arc<L>,
        payments: Arc<dyn PaymentStore>,
        program_id: Pubkey,
        settlement_mint: Pubkey,
        treasury: Pubkey,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            ledger,
            payments,
            program_id,
            settlement_mint,
            treasury,
            batch_cap: config.batch_cap.max(1),
            priority_microlamports: config.priority_microlamports,
            compute_units: config.finalize_compute_units,
        }
    }

    /// Compute the payout for `add_value` and issue batched transfer bundles
    ///
    /// `investors` is the share table: (wallet, shares) pairs, deduplicated
    /// here by merging shares per wallet. The manager signs and pays fees.
    pub async fn pay(
        &self,
        fund: &str,
        manager: &str,
        add_value: u64,
        perf_fee_bps: u16,
        investors: &[(String, u64)],
    ) -> Result<PayoutPlan> {
        let fund_key = parse_address(fund)?;
        let manager_key = parse_address(manager)?;

        if add_value == 0 {
            return Err(OrchestratorError::validation("add_value must be positive"));
        }
        if perf_fee_bps as u64 > BPS_DENOMINATOR {
            return Err(OrchestratorError::validation(format!(
                "perf_fee_bps {} exceeds {}",
                perf_fee_bps, BPS_DENOMINATOR
            )));
        }

        let split = compute_split(add_value, perf_fee_bps);
        let recipients = build_recipients(&split, manager, &self.treasury.to_string(), investors);
        let batches: Vec<Vec<Recipient>> = recipients
            .chunks(self.batch_cap)
            .map(|c| c.to_vec())
            .collect();

        let mut bundles = Vec::with_capacity(batches.len());
        for batch in &batches {
            bundles.push(
                self.build_transfer_bundle(&fund_key, &manager_key, batch)
                    .await?,
            );
        }

        info!(
            fund,
            add_value,
            recipients = recipients.len(),
            batches = batches.len(),
            "payout computed"
        );

        Ok(PayoutPlan {
            split,
            batches,
            bundles,
        })
    }

    async fn build_transfer_bundle(
        &self,
        fund: &Pubkey,
        manager: &Pubkey,
        batch: &[Recipient],
    ) -> Result<TxBundle> {
        let mut accounts = vec![
            AccountMeta::new(*fund, false),
            AccountMeta::new(get_ata(fund, &self.settlement_mint), false),
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
            AccountMeta::new(*manager, true),
        ];
        let mut amounts = Vec::with_capacity(batch.len());
        for recipient in batch {
            let wallet = parse_address(&recipient.wallet)?;
            accounts.push(AccountMeta::new(get_ata(&wallet, &self.settlement_mint), false));
            amounts.push(recipient.amount);
        }

        let mut data = instruction_discriminator("distribute_payout").to_vec();
        data.extend(borsh::to_vec(&DistributePayoutArgs { amounts })?);

        let instructions = vec![
            ComputeBudgetInstruction::set_compute_unit_price(self.priority_microlamports),
            ComputeBudgetInstruction::set_compute_unit_limit(self.compute_units),
            Instruction {
                program_id: self.program_id,
                accounts,
                data,
            },
        ];

        compile_v0_bundle(self.ledger.as_ref(), manager, &instructions, &[], None).await
    }

    /// Record a confirmed payout batch, idempotent on `tx_ref`
    ///
    /// Returns `true` when newly recorded; a duplicate reference is the same
    /// success with `false`, never a duplicate credit.
    pub async fn record(
        &self,
        fund: &str,
        tx_ref: &str,
        total_value: u64,
        recipients: Vec<Recipient>,
    ) -> Result<bool> {
        parse_address(fund)?;

        let distributed: u64 = recipients.iter().map(|r| r.amount).sum();
        let tolerance = recipients.len() as u64;
        if total_value.abs_diff(distributed) > tolerance {
            return Err(OrchestratorError::validation(format!(
                "recipient amounts sum to {}, expected {} within {} base units",
                distributed, total_value, tolerance
            )));
        }

        let record = PaymentRecord::new(tx_ref.to_string(), total_value, recipients);
        let inserted = self.payments.append_if_absent(fund, &record).await?;

        if inserted {
            info!(fund, tx_ref, total_value, "payout recorded");
        }
        Ok(inserted)
    }

    /// Per-fund payment history
    pub async fn history(&self, fund: &str) -> Result<Vec<PaymentRecord>> {
        Ok(self.payments.get_history(fund).await?)
    }
}

/// Floor of `value * bps / 10000`, widened to avoid overflow
fn mul_bps(value: u64, bps: u64) -> u64 {
    (value as u128 * bps as u128 / BPS_DENOMINATOR as u128) as u64
}

/// Integer fee split for a payout
pub fn compute_split(add_value: u64, perf_fee_bps: u16) -> PayoutSplit {
    let platform_fee = mul_bps(add_value, PLATFORM_FEE_BPS);
    let after_platform = add_value - platform_fee;
    let performance_fee = mul_bps(after_platform, perf_fee_bps as u64);
    let treasury_perf_share = mul_bps(performance_fee, TREASURY_PERF_BPS);

    PayoutSplit {
        platform_fee,
        performance_fee,
        treasury_perf_share,
        manager_perf_share: performance_fee - treasury_perf_share,
        investors_pool: after_platform - performance_fee,
    }
}

/// Build the recipient list: investors pro rata, then manager, then treasury
///
/// Investor wallets are deduplicated by merging shares; allocation floors
/// per recipient, so at most one base unit per recipient goes undistributed.
/// Zero-amount entries are dropped.
pub fn build_recipients(
    split: &PayoutSplit,
    manager: &str,
    treasury: &str,
    investors: &[(String, u64)],
) -> Vec<Recipient> {
    let mut order: Vec<String> = Vec::new();
    let mut shares_by_wallet: HashMap<String, u64> = HashMap::new();
    for (wallet, shares) in investors {
        if *shares == 0 {
            continue;
        }
        let entry = shares_by_wallet.entry(wallet.clone()).or_insert(0);
        if *entry == 0 {
            order.push(wallet.clone());
        }
        *entry += shares;
    }

    let total_shares: u64 = shares_by_wallet.values().sum();
    let mut recipients = Vec::new();

    if total_shares > 0 {
        for wallet in order {
            let shares = shares_by_wallet[&wallet];
            let amount =
                (split.investors_pool as u128 * shares as u128 / total_shares as u128) as u64;
            if amount > 0 {
                recipients.push(Recipient { wallet, amount });
            }
        }
    }

    if split.manager_perf_share > 0 {
        recipients.push(Recipient {
            wallet: manager.to_string(),
            amount: split.manager_perf_share,
        });
    }

    let treasury_total = split.treasury_total();
    if treasury_total > 0 {
        recipients.push(Recipient {
            wallet: treasury.to_string(),
            amount: treasury_total,
        });
    }

    recipients
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MockLedgerClient;
    use crate::storage::MemoryPaymentStore;
    use solana_sdk::hash::Hash;

    const UNIT: u64 = 1_000_000_000;

    fn mock_ledger() -> MockLedgerClient {
        let mut ledger = MockLedgerClient::new();
        ledger
            .expect_resolve_lookup_tables()
            .returning(|_| Ok(Vec::new()));
        ledger
            .expect_latest_blockhash()
            .returning(|| Ok((Hash::new_unique(), 100)));
        ledger
    }

    fn payment_ledger(store: Arc<MemoryPaymentStore>) -> PaymentLedger<MockLedgerClient> {
        PaymentLedger::new(
            Arc::new(mock_ledger()),
            store,
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            &OrchestratorConfig::from_env().unwrap(),
        )
    }

    #[test]
    fn test_mul_bps_floors_and_never_overflows() {
        assert_eq!(mul_bps(10 * UNIT, 100), UNIT / 10);
        assert_eq!(mul_bps(0, 2000), 0);
        assert_eq!(mul_bps(UNIT, 0), 0);
        // 1 bps of 9999 floors to zero
        assert_eq!(mul_bps(9_999, 1), 0);
        // Widened math: full-range value at 100% comes back unchanged
        assert_eq!(mul_bps(u64::MAX, 10_000), u64::MAX);
    }

    #[test]
    fn test_split_ten_units_twenty_percent_perf() {
        let split = compute_split(10 * UNIT, 2000);

        assert_eq!(split.platform_fee, UNIT / 10); // 0.10
        assert_eq!(split.performance_fee, 198 * UNIT / 100); // 1.98
        assert_eq!(split.treasury_perf_share, 396 * UNIT / 1000); // 0.396
        assert_eq!(split.manager_perf_share, 1_584 * UNIT / 1000); // 1.584
        assert_eq!(split.investors_pool, 792 * UNIT / 100); // 7.92
        assert_eq!(split.treasury_total(), 496 * UNIT / 1000);

        // Nothing lost to the split itself
        assert_eq!(
            split.platform_fee + split.performance_fee + split.investors_pool,
            10 * UNIT
        );
    }

    #[test]
    fn test_ten_percent_holder_share() {
        let split = compute_split(10 * UNIT, 2000);
        let investors = vec![
            ("holder".to_string(), 100u64),
            ("rest".to_string(), 900u64),
        ];

        let recipients = build_recipients(&split, "mgr", "treasury", &investors);

        assert_eq!(recipients[0].wallet, "holder");
        assert_eq!(recipients[0].amount, 792 * UNIT / 1000); // 0.792
        assert_eq!(recipients[1].amount, 7_128 * UNIT / 1000);
        assert_eq!(recipients[2].wallet, "mgr");
        assert_eq!(recipients[3].wallet, "treasury");
    }

    #[test]
    fn test_duplicate_wallets_merge_shares() {
        let split = compute_split(10 * UNIT, 0);
        let investors = vec![
            ("a".to_string(), 50u64),
            ("b".to_string(), 50u64),
            ("a".to_string(), 50u64),
        ];

        let recipients = build_recipients(&split, "mgr", "treasury", &investors);

        // a appears once with merged shares (2/3 of the pool)
        let a: Vec<_> = recipients.iter().filter(|r| r.wallet == "a").collect();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].amount, split.investors_pool * 2 / 3);
    }

    #[test]
    fn test_rounding_tolerance() {
        // A pool that does not divide evenly across 7 holders
        let split = compute_split(1_000_000_007, 2000);
        let investors: Vec<(String, u64)> =
            (0..7).map(|i| (format!("w{}", i), 3u64)).collect();

        let recipients = build_recipients(&split, "mgr", "treasury", &investors);
        let distributed: u64 = recipients.iter().map(|r| r.amount).sum();
        let total = split.investors_pool + split.manager_perf_share + split.treasury_total();

        assert!(distributed <= total);
        assert!(total - distributed <= recipients.len() as u64);
    }

    #[tokio::test]
    async fn test_forty_five_recipients_batch_as_20_20_5() {
        let store = Arc::new(MemoryPaymentStore::new());
        let ledger = payment_ledger(store);

        // 45 investors, zero perf fee and a pool big enough that everyone
        // gets a non-zero amount; manager/treasury entries stay non-zero too
        let investors: Vec<(String, u64)> = (0..45)
            .map(|i| (Pubkey::new_unique().to_string(), 10 + i as u64))
            .collect();

        let plan = ledger
            .pay(
                &Pubkey::new_unique().to_string(),
                &Pubkey::new_unique().to_string(),
                1_000 * UNIT,
                2000,
                &investors,
            )
            .await
            .unwrap();

        // 45 investors + manager + treasury = 47
        let sizes: Vec<usize> = plan.batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![20, 20, 7]);
        assert_eq!(plan.bundles.len(), 3);
        for bundle in &plan.bundles {
            assert!(!bundle.tx_base64.is_empty());
        }
    }

    #[test]
    fn test_chunking_exact_45() {
        let recipients: Vec<Recipient> = (0..45)
            .map(|i| Recipient {
                wallet: format!("w{}", i),
                amount: 1,
            })
            .collect();

        let sizes: Vec<usize> = recipients.chunks(20).map(|c| c.len()).collect();
        assert_eq!(sizes, vec![20, 20, 5]);
    }

    #[tokio::test]
    async fn test_record_is_idempotent() {
        let store = Arc::new(MemoryPaymentStore::new());
        let ledger = payment_ledger(store.clone());
        let fund = Pubkey::new_unique().to_string();

        let recipients = vec![Recipient {
            wallet: "a".to_string(),
            amount: 100,
        }];

        assert!(ledger
            .record(&fund, "sig_1", 100, recipients.clone())
            .await
            .unwrap());
        assert!(!ledger
            .record(&fund, "sig_1", 100, recipients)
            .await
            .unwrap());

        assert_eq!(store.get_history(&fund).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_rejects_mismatched_totals() {
        let store = Arc::new(MemoryPaymentStore::new());
        let ledger = payment_ledger(store);

        let recipients = vec![Recipient {
            wallet: "a".to_string(),
            amount: 50,
        }];

        let err = ledger
            .record(&Pubkey::new_unique().to_string(), "sig_2", 100, recipients)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }

    #[tokio::test]
    async fn test_pay_validates_inputs() {
        let store = Arc::new(MemoryPaymentStore::new());
        let ledger = payment_ledger(store);
        let fund = Pubkey::new_unique().to_string();
        let mgr = Pubkey::new_unique().to_string();

        assert!(matches!(
            ledger.pay(&fund, &mgr, 0, 2000, &[]).await,
            Err(OrchestratorError::Validation(_))
        ));
        assert!(matches!(
            ledger.pay(&fund, &mgr, 100, 10_001, &[]).await,
            Err(OrchestratorError::Validation(_))
        ));
    }
}
