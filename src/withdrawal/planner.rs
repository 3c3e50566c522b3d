//! Liquidation Planner
//!
//! Computes a per-asset liquidation plan for a withdrawal fraction: which
//! held assets to swap, how much of each, and a validated quote per
//! executable item. Per-asset failures degrade the plan (the asset is
//! reported with an exclusion reason) rather than failing the pipeline; an
//! empty executable plan is a successful outcome.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::router_client::{RouteError, RouteQuote, RouteQuoteClient};
use crate::types::{
    allowed_amount, ExclusionReason, FundLedgerSnapshot, LiquidationPlan, LiquidationPlanItem,
    Quote,
};

/// Quote lookup seam, mockable in tests
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn quote(
        &self,
        asset_in: &Pubkey,
        asset_out: &Pubkey,
        amount: u64,
        slippage_bps: u16,
    ) -> Result<RouteQuote, RouteError>;
}

#[async_trait]
impl QuoteSource for RouteQuoteClient {
    async fn quote(
        &self,
        asset_in: &Pubkey,
        asset_out: &Pubkey,
        amount: u64,
        slippage_bps: u16,
    ) -> Result<RouteQuote, RouteError> {
        RouteQuoteClient::quote(self, asset_in, asset_out, amount, slippage_bps, false).await
    }
}

/// Plans which assets to liquidate and fetches quotes for them
pub struct LiquidationPlanner<Q> {
    quotes: Q,
    settlement_mint: Pubkey,
    dust_threshold: u64,
    slippage_bps: u16,
    quote_timeout: Duration,
    plan_timeout: Duration,
    quote_concurrency: usize,
}

impl<Q: QuoteSource> LiquidationPlanner<Q> {
    pub fn new(quotes: Q, settlement_mint: Pubkey, config: &OrchestratorConfig) -> Self {
        Self {
            quotes,
            settlement_mint,
            dust_threshold: config.dust_threshold,
            slippage_bps: config.slippage_bps,
            quote_timeout: Duration::from_secs(config.quote_timeout_secs),
            plan_timeout: Duration::from_secs(config.plan_timeout_secs),
            quote_concurrency: config.quote_concurrency.max(1),
        }
    }

    /// Build the liquidation plan for a fraction of the fund's holdings
    ///
    /// The settlement asset itself and the share-accounting asset are never
    /// liquidated. Assets whose allowed amount floors to zero are omitted.
    /// Quotes fan out concurrently; each carries its own timeout and the
    /// whole pass has a ceiling after which unanswered assets count as
    /// `no_route`. Output preserves the held-asset ordering.
    pub async fn plan(
        &self,
        snapshot: &FundLedgerSnapshot,
        fraction_bps: u16,
        dust_override: Option<u64>,
    ) -> LiquidationPlan {
        let dust_threshold = dust_override.unwrap_or(self.dust_threshold);

        let mut items: Vec<LiquidationPlanItem> = Vec::new();
        let mut pending: Vec<(usize, Pubkey, u64)> = Vec::new();

        for held in &snapshot.held_assets {
            if held.asset == self.settlement_mint || held.asset == snapshot.shares_mint {
                continue;
            }

            let allowed = allowed_amount(held.balance, fraction_bps);
            if allowed == 0 {
                continue;
            }

            let idx = items.len();
            items.push(LiquidationPlanItem {
                asset: held.asset.to_string(),
                available_amount: held.balance,
                allowed_amount: allowed,
                quote: None,
                // Until a quote lands; also what a ceiling timeout leaves behind
                excluded_reason: ExclusionReason::NoRoute,
            });
            pending.push((idx, held.asset, allowed));
        }

        let deadline = tokio::time::Instant::now() + self.plan_timeout;
        let settlement = self.settlement_mint;
        let slippage = self.slippage_bps;
        let quote_timeout = self.quote_timeout;
        let quotes = &self.quotes;

        let mut outcomes = stream::iter(pending.into_iter().map(|(idx, asset, amount)| {
            async move {
                let result = tokio::time::timeout(
                    quote_timeout,
                    quotes.quote(&asset, &settlement, amount, slippage),
                )
                .await;

                let quote = match result {
                    Ok(Ok(quote)) => Some(quote),
                    Ok(Err(e)) => {
                        debug!(asset = %asset, error = %e, "quote failed, excluding asset");
                        None
                    }
                    Err(_) => {
                        warn!(asset = %asset, "quote timed out, excluding asset");
                        None
                    }
                };

                (idx, asset, quote)
            }
        }))
        .buffer_unordered(self.quote_concurrency);

        while let Ok(Some((idx, asset, outcome))) =
            tokio::time::timeout_at(deadline, outcomes.next()).await
        {
            match outcome {
                Some(quote) if quote.expected_out < dust_threshold => {
                    debug!(
                        asset = %asset,
                        expected_out = quote.expected_out,
                        dust_threshold,
                        "quoted value under dust threshold"
                    );
                    items[idx].excluded_reason = ExclusionReason::Dust;
                }
                Some(quote) => {
                    items[idx].quote = Some(Quote {
                        expected_out: quote.expected_out,
                        min_out: quote.min_out,
                        route_ref: quote.raw,
                    });
                    items[idx].excluded_reason = ExclusionReason::None;
                }
                None => {
                    items[idx].excluded_reason = ExclusionReason::NoRoute;
                }
            }
        }
        drop(outcomes);

        let executable = items.iter().filter(|i| i.is_executable()).count();
        info!(
            fund = %snapshot.fund,
            fraction_bps,
            considered = items.len(),
            executable,
            "liquidation plan computed"
        );

        LiquidationPlan { items }
    }
}
