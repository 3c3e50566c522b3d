//! Transaction Assembler
//!
//! Builds the unsigned transactions the client signs: one independent
//! per-asset swap transaction per executable plan item, plus the shared
//! compile path (lookup-table resolution, v0 message, fresh blockhash,
//! base64 transport) reused by the finalizer.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use borsh::BorshSerialize;
use futures_util::future::join_all;
use serde_json::Value;
use solana_sdk::{
    compute_budget::ComputeBudgetInstruction,
    instruction::{AccountMeta, Instruction},
    message::{v0, VersionedMessage},
    pubkey::Pubkey,
    signature::Signature,
    system_program,
    transaction::VersionedTransaction,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::common::{OrchestratorError, Result};
use crate::config::OrchestratorConfig;
use crate::ledger::{
    derive_investor_position, derive_withdrawal_state, get_ata, instruction_discriminator,
    LedgerClient, ROUTER_PROGRAM_ID, TOKEN_PROGRAM_ID,
};
use crate::router_client::{
    RouteError, RouteQuote, RouteQuoteClient, RouterInstruction, SwapInstructions,
};
use crate::types::{ExclusionReason, LiquidationPlan, LiquidationPlanItem, Quote, TxBundle};

/// Floor for swap compute budgets; routed swaps routinely exceed defaults
const MIN_SWAP_COMPUTE_UNITS: u32 = 400_000;

/// Router seam for swap-instruction builds, mockable in tests
///
/// Carries the direct-route re-quote used when an instruction build is
/// rejected for a stale or unroutable quote.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SwapInstructionSource: Send + Sync {
    async fn swap_instructions(
        &self,
        route_ref: &Value,
        payer: &Pubkey,
        owner: &Pubkey,
        source_account: &Pubkey,
        destination_account: &Pubkey,
    ) -> std::result::Result<SwapInstructions, RouteError>;

    async fn quote_direct(
        &self,
        asset_in: &Pubkey,
        asset_out: &Pubkey,
        amount: u64,
        slippage_bps: u16,
    ) -> std::result::Result<RouteQuote, RouteError>;
}

#[async_trait::async_trait]
impl SwapInstructionSource for RouteQuoteClient {
    async fn swap_instructions(
        &self,
        route_ref: &Value,
        payer: &Pubkey,
        owner: &Pubkey,
        source_account: &Pubkey,
        destination_account: &Pubkey,
    ) -> std::result::Result<SwapInstructions, RouteError> {
        RouteQuoteClient::swap_instructions(
            self,
            route_ref,
            payer,
            owner,
            source_account,
            destination_account,
        )
        .await
    }

    async fn quote_direct(
        &self,
        asset_in: &Pubkey,
        asset_out: &Pubkey,
        amount: u64,
        slippage_bps: u16,
    ) -> std::result::Result<RouteQuote, RouteError> {
        RouteQuoteClient::quote(self, asset_in, asset_out, amount, slippage_bps, true).await
    }
}

/// Borsh payload of the `withdraw_swap_instruction` forwarding call
#[derive(BorshSerialize)]
struct WithdrawSwapArgs {
    router_data: Vec<u8>,
    in_amount: u64,
    out_min_amount: u64,
}

/// Borsh payload of `initiate_withdrawal`
#[derive(BorshSerialize)]
struct InitiateWithdrawalArgs {
    fraction_bps: u16,
}

/// Assembles unsigned per-asset swap transactions from an executable plan
pub struct TransactionAssembler<L, S> {
    ledger: Arc<L>,
    router: Arc<S>,
    program_id: Pubkey,
    settlement_mint: Pubkey,
    priority_microlamports: u64,
    swap_compute_units: u32,
    slippage_bps: u16,
}

impl<L, S> TransactionAssembler<L, S>
where
    L: LedgerClient,
    S: SwapInstructionSource,
{
    pub fn new(
        ledger: Arc<L>,
        router: Arc<S>,
        program_id: Pubkey,
        settlement_mint: Pubkey,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            ledger,
            router,
            program_id,
            settlement_mint,
            priority_microlamports: config.priority_microlamports,
            swap_compute_units: config.swap_compute_units.max(MIN_SWAP_COMPUTE_UNITS),
            slippage_bps: config.slippage_bps,
        }
    }

    /// Assemble one unsigned transaction per executable plan item
    ///
    /// Bundles are independent: a rejected swap-instruction build gets one
    /// direct-route retry, and if that fails too the asset is excluded from
    /// the plan while the rest proceed. Only ledger-level failures abort the
    /// whole assembly. Assembly runs concurrently per asset.
    pub async fn assemble(
        &self,
        investor: &Pubkey,
        fund: &Pubkey,
        plan: &mut LiquidationPlan,
    ) -> Result<Vec<TxBundle>> {
        let outcomes = join_all(
            plan.items
                .iter()
                .enumerate()
                .filter(|(_, item)| item.is_executable())
                .map(|(idx, item)| async move {
                    (idx, self.assemble_swap(investor, fund, item).await)
                }),
        )
        .await;

        let mut bundles = Vec::new();
        for (idx, outcome) in outcomes {
            match outcome {
                Ok((bundle, replaced)) => {
                    // A direct-route rebuild supersedes the planned quote
                    if let Some(quote) = replaced {
                        plan.items[idx].quote = Some(quote);
                    }
                    bundles.push(bundle);
                }
                Err(OrchestratorError::Upstream(reason)) => {
                    warn!(
                        asset = %plan.items[idx].asset,
                        reason = %reason,
                        "swap build failed, excluding asset"
                    );
                    plan.items[idx].quote = None;
                    plan.items[idx].excluded_reason = ExclusionReason::NoRoute;
                }
                Err(other) => return Err(other),
            }
        }

        info!(
            fund = %fund,
            investor = %investor,
            bundles = bundles.len(),
            "swap bundles assembled"
        );

        Ok(bundles)
    }

    async fn assemble_swap(
        &self,
        investor: &Pubkey,
        fund: &Pubkey,
        item: &LiquidationPlanItem,
    ) -> Result<(TxBundle, Option<Quote>)> {
        let quote = item
            .quote
            .as_ref()
            .ok_or_else(|| OrchestratorError::internal("executable item without quote"))?;

        let asset: Pubkey = item
            .asset
            .parse()
            .map_err(|_| OrchestratorError::internal(format!("bad asset in plan: {}", item.asset)))?;

        // The fund's vault sub-account owns both token accounts; the
        // investor only pays fees and authorizes.
        let source = get_ata(fund, &asset);
        let destination = get_ata(fund, &self.settlement_mint);

        let (swap, replaced) = match self
            .router
            .swap_instructions(&quote.route_ref, investor, fund, &source, &destination)
            .await
        {
            Ok(swap) => (swap, None),
            Err(first) => {
                debug!(asset = %asset, error = %first, "swap build rejected, retrying direct route");
                self.rebuild_direct(investor, fund, item, &asset, &source, &destination)
                    .await
                    .map_err(|e| {
                        OrchestratorError::upstream(format!(
                            "swap instructions: {}; direct retry: {}",
                            first, e
                        ))
                    })?
            }
        };

        let min_out = replaced.as_ref().map_or(quote.min_out, |q| q.min_out);

        let mut instructions = vec![
            ComputeBudgetInstruction::set_compute_unit_price(self.priority_microlamports),
            ComputeBudgetInstruction::set_compute_unit_limit(self.swap_compute_units),
        ];
        instructions.extend(swap.setup.iter().map(to_instruction));
        instructions.push(self.forwarding_instruction(investor, fund, item, min_out, &swap)?);

        debug!(
            asset = %asset,
            in_amount = item.allowed_amount,
            out_min = min_out,
            lookup_tables = swap.lookup_tables.len(),
            "assembling swap transaction"
        );

        let bundle = compile_v0_bundle(
            self.ledger.as_ref(),
            investor,
            &instructions,
            &swap.lookup_tables,
            Some(item.asset.clone()),
        )
        .await?;

        Ok((bundle, replaced))
    }

    /// Re-quote with direct routes only and rebuild the instructions
    async fn rebuild_direct(
        &self,
        investor: &Pubkey,
        fund: &Pubkey,
        item: &LiquidationPlanItem,
        asset: &Pubkey,
        source: &Pubkey,
        destination: &Pubkey,
    ) -> std::result::Result<(SwapInstructions, Option<Quote>), RouteError> {
        let direct = self
            .router
            .quote_direct(
                asset,
                &self.settlement_mint,
                item.allowed_amount,
                self.slippage_bps,
            )
            .await?;

        let swap = self
            .router
            .swap_instructions(&direct.raw, investor, fund, source, destination)
            .await?;

        Ok((
            swap,
            Some(Quote {
                expected_out: direct.expected_out,
                min_out: direct.min_out,
                route_ref: direct.raw,
            }),
        ))
    }

    /// The ledger-program call that wraps the raw router instruction
    ///
    /// Fixed account head, then the router's full account list passed
    /// through so the program can CPI into the router verbatim.
    fn forwarding_instruction(
        &self,
        investor: &Pubkey,
        fund: &Pubkey,
        item: &LiquidationPlanItem,
        out_min_amount: u64,
        swap: &SwapInstructions,
    ) -> Result<Instruction> {
        let withdrawal_state = derive_withdrawal_state(&self.program_id, fund, investor);

        let mut accounts = vec![
            AccountMeta::new(*fund, false),
            AccountMeta::new(withdrawal_state, false),
            AccountMeta::new_readonly(ROUTER_PROGRAM_ID, false),
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new(*investor, true),
        ];
        accounts.extend(swap.swap.accounts.iter().map(|a| AccountMeta {
            pubkey: a.pubkey,
            is_signer: false,
            is_writable: a.is_writable,
        }));

        let args = WithdrawSwapArgs {
            router_data: swap.swap.data.clone(),
            in_amount: item.allowed_amount,
            out_min_amount,
        };

        let mut data = instruction_discriminator("withdraw_swap_instruction").to_vec();
        data.extend(borsh::to_vec(&args)?);

        Ok(Instruction {
            program_id: self.program_id,
            accounts,
            data,
        })
    }
}

/// Build the `initiate_withdrawal` instruction
pub fn initiate_withdrawal_instruction(
    program_id: &Pubkey,
    investor: &Pubkey,
    fund: &Pubkey,
    fraction_bps: u16,
) -> Result<Instruction> {
    let withdrawal_state = derive_withdrawal_state(program_id, fund, investor);
    let position = derive_investor_position(program_id, investor, fund);

    let mut data = instruction_discriminator("initiate_withdrawal").to_vec();
    data.extend(borsh::to_vec(&InitiateWithdrawalArgs { fraction_bps })?);

    Ok(Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(*fund, false),
            AccountMeta::new(withdrawal_state, false),
            AccountMeta::new_readonly(position, false),
            AccountMeta::new(*investor, true),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
        data,
    })
}

/// Build the `finalize_withdrawal` instruction
///
/// Burns the proportional shares, pays the settlement asset to the investor
/// and routes the platform fee cut to the treasury sub-account.
pub fn finalize_withdrawal_instruction(
    program_id: &Pubkey,
    investor: &Pubkey,
    fund: &Pubkey,
    shares_mint: &Pubkey,
    settlement_mint: &Pubkey,
    treasury: &Pubkey,
) -> Instruction {
    let withdrawal_state = derive_withdrawal_state(program_id, fund, investor);
    let position = derive_investor_position(program_id, investor, fund);

    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(*fund, false),
            AccountMeta::new(withdrawal_state, false),
            AccountMeta::new(position, false),
            AccountMeta::new(*shares_mint, false),
            AccountMeta::new(get_ata(fund, settlement_mint), false),
            AccountMeta::new(get_ata(investor, settlement_mint), false),
            AccountMeta::new(get_ata(treasury, settlement_mint), false),
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
            AccountMeta::new(*investor, true),
        ],
        data: instruction_discriminator("finalize_withdrawal").to_vec(),
    }
}

/// Build the idempotent `unwrap_native_remainder` instruction
///
/// Converts the fund's leftover wrapped-native balance back to native; a
/// zero balance makes it a no-op on chain.
pub fn unwrap_native_instruction(
    program_id: &Pubkey,
    authority: &Pubkey,
    fund: &Pubkey,
    settlement_mint: &Pubkey,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(*fund, false),
            AccountMeta::new(get_ata(fund, settlement_mint), false),
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
            AccountMeta::new(*authority, true),
        ],
        data: instruction_discriminator("unwrap_native_remainder").to_vec(),
    }
}

/// Compile instructions into an unsigned base64 v0 transaction bundle
///
/// Resolves lookup tables, attaches a fresh blockhash with its expiry
/// height, and leaves signature slots zeroed for the client.
pub async fn compile_v0_bundle<L: LedgerClient + ?Sized>(
    ledger: &L,
    payer: &Pubkey,
    instructions: &[Instruction],
    lookup_addresses: &[Pubkey],
    asset: Option<String>,
) -> Result<TxBundle> {
    let tables = ledger.resolve_lookup_tables(lookup_addresses).await?;
    let (blockhash, last_valid_block_height) = ledger.latest_blockhash().await?;

    let message = v0::Message::try_compile(payer, instructions, &tables, blockhash)
        .map_err(|e| OrchestratorError::internal(format!("message compile: {}", e)))?;

    let num_signatures = message.header.num_required_signatures as usize;
    let tx = VersionedTransaction {
        signatures: vec![Signature::default(); num_signatures],
        message: VersionedMessage::V0(message),
    };

    let bytes = bincode::serialize(&tx)
        .map_err(|e| OrchestratorError::internal(format!("transaction serialize: {}", e)))?;

    Ok(TxBundle {
        asset,
        tx_base64: BASE64.encode(bytes),
        blockhash: blockhash.to_string(),
        last_valid_block_height,
        address_lookup_tables: lookup_addresses.iter().map(|a| a.to_string()).collect(),
    })
}

/// Decode a bundle back into the transaction it carries
///
/// Used to dry-run a built bundle against the ledger before handing it out.
pub fn decode_bundle(bundle: &TxBundle) -> Result<VersionedTransaction> {
    let bytes = BASE64
        .decode(&bundle.tx_base64)
        .map_err(|e| OrchestratorError::internal(format!("bundle decode: {}", e)))?;

    bincode::deserialize(&bytes)
        .map_err(|e| OrchestratorError::internal(format!("bundle deserialize: {}", e)))
}

fn to_instruction(ri: &RouterInstruction) -> Instruction {
    Instruction {
        program_id: ri.program_id,
        accounts: ri
            .accounts
            .iter()
            .map(|a| AccountMeta {
                pubkey: a.pubkey,
                is_signer: a.is_signer,
                is_writable: a.is_writable,
            })
            .collect(),
        data: ri.data.clone(),
    }
}
