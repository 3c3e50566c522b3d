//! Swap-Routing Service Client
//!
//! Wraps the external quote/swap-instruction service. Responses are
//! deserialized into explicit validated types; a payload failing schema
//! validation is a typed error, never a silently-accepted partial object.
//!
//! Quote behavior: one attempt with the requested routing, then exactly one
//! fallback attempt with direct routes only. If both fail the caller gets
//! `RouteError::NoRoute`, which the planner treats as a per-asset exclusion
//! rather than a pipeline failure.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

/// Default slippage: generous, withdrawal liquidation favors completion
/// over optimal price.
pub const DEFAULT_SLIPPAGE_BPS: u16 = 2000;

/// Router client errors
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("no route for asset")]
    NoRoute,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("routing service rejected request: {0}")]
    Rejected(String),
}

/// A validated quote from the routing service
#[derive(Debug, Clone)]
pub struct RouteQuote {
    /// Input amount the quote covers
    pub in_amount: u64,
    /// Expected output in destination base units
    pub expected_out: u64,
    /// Minimum acceptable output after slippage
    pub min_out: u64,
    /// Full raw response, passed back when requesting swap instructions
    pub raw: Value,
}

/// One instruction returned by the routing service, decoded
#[derive(Debug, Clone)]
pub struct RouterInstruction {
    pub program_id: Pubkey,
    pub accounts: Vec<RouterAccount>,
    pub data: Vec<u8>,
}

/// Account reference inside a router instruction
#[derive(Debug, Clone)]
pub struct RouterAccount {
    pub pubkey: Pubkey,
    pub is_signer: bool,
    pub is_writable: bool,
}

/// Validated swap-instruction payload
#[derive(Debug, Clone)]
pub struct SwapInstructions {
    /// Instructions to run before the swap (account setup)
    pub setup: Vec<RouterInstruction>,
    /// The raw router swap instruction, forwarded to the ledger program
    pub swap: RouterInstruction,
    /// Address-compression tables referenced by the swap accounts
    pub lookup_tables: Vec<Pubkey>,
}

/// HTTP client for the swap-routing service
#[derive(Debug, Clone)]
pub struct RouteQuoteClient {
    client: Client,
    base_url: String,
}

impl RouteQuoteClient {
    /// Create a new client with a per-call timeout
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Quote `amount` of `asset_in` into `asset_out`
    ///
    /// Retries once with direct routes on any failure; a second failure is
    /// reported as `NoRoute` and escalated no further than the caller.
    pub async fn quote(
        &self,
        asset_in: &Pubkey,
        asset_out: &Pubkey,
        amount: u64,
        slippage_bps: u16,
        direct_only: bool,
    ) -> Result<RouteQuote, RouteError> {
        match self
            .quote_once(asset_in, asset_out, amount, slippage_bps, direct_only)
            .await
        {
            Ok(quote) => Ok(quote),
            Err(RouteError::Http(e)) => Err(RouteError::Http(e)),
            Err(_) if !direct_only => self
                .quote_once(asset_in, asset_out, amount, slippage_bps, true)
                .await
                .map_err(|_| RouteError::NoRoute),
            Err(_) => Err(RouteError::NoRoute),
        }
    }

    async fn quote_once(
        &self,
        asset_in: &Pubkey,
        asset_out: &Pubkey,
        amount: u64,
        slippage_bps: u16,
        direct_only: bool,
    ) -> Result<RouteQuote, RouteError> {
        let url = format!("{}/swap/v1/quote", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("inputMint", asset_in.to_string()),
                ("outputMint", asset_out.to_string()),
                ("amount", amount.to_string()),
                ("slippageBps", slippage_bps.to_string()),
                ("onlyDirectRoutes", direct_only.to_string()),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(RouteError::NoRoute);
        }

        let value: Value = resp.json().await?;
        parse_quote(value)
    }

    /// Request swap instructions for a previously obtained quote
    ///
    /// The fund's vault sub-account is the asset owner; the investor pays
    /// fees and authorizes. ATA creation and native wrapping are handled by
    /// the ledger program, not the router.
    pub async fn swap_instructions(
        &self,
        route_ref: &Value,
        payer: &Pubkey,
        owner: &Pubkey,
        source_account: &Pubkey,
        destination_account: &Pubkey,
    ) -> Result<SwapInstructions, RouteError> {
        let url = format!("{}/swap/v1/swap-instructions", self.base_url);
        let body = json!({
            "quoteResponse": route_ref,
            "userPublicKey": owner.to_string(),
            "payer": payer.to_string(),
            "userSourceTokenAccount": source_account.to_string(),
            "userDestinationTokenAccount": destination_account.to_string(),
            "wrapAndUnwrapSol": false,
            "useTokenLedger": false,
            "useSharedAccounts": false,
            "skipUserAccountsRpcCalls": true,
            "skipAtaCreation": true,
        });

        let resp = self.client.post(&url).json(&body).send().await?;

        if !resp.status().is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(RouteError::Rejected(detail));
        }

        let value: Value = resp.json().await?;
        parse_swap_instructions(value)
    }
}

/// Wire shape of a quote response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponseWire {
    in_amount: String,
    out_amount: String,
    other_amount_threshold: String,
    #[serde(default)]
    route_plan: Vec<Value>,
}

/// Wire shape of an instruction payload
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstructionWire {
    program_id: String,
    accounts: Vec<AccountWire>,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountWire {
    pubkey: String,
    #[serde(default)]
    is_signer: bool,
    #[serde(default)]
    is_writable: bool,
}

/// Wire shape of a swap-instructions response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapInstructionsWire {
    #[serde(default)]
    setup_instructions: Vec<InstructionWire>,
    swap_instruction: InstructionWire,
    #[serde(default)]
    address_lookup_table_addresses: Vec<String>,
}

/// Validate a raw quote response into a `RouteQuote`
///
/// A quote with an empty route plan counts as no route.
pub fn parse_quote(value: Value) -> Result<RouteQuote, RouteError> {
    let wire: QuoteResponseWire = serde_json::from_value(value.clone())
        .map_err(|e| RouteError::InvalidResponse(format!("quote schema: {}", e)))?;

    if wire.route_plan.is_empty() {
        return Err(RouteError::NoRoute);
    }

    let in_amount = parse_amount(&wire.in_amount, "inAmount")?;
    let expected_out = parse_amount(&wire.out_amount, "outAmount")?;
    let min_out = parse_amount(&wire.other_amount_threshold, "otherAmountThreshold")?;

    Ok(RouteQuote {
        in_amount,
        expected_out,
        min_out,
        raw: value,
    })
}

/// Validate a raw swap-instructions response
pub fn parse_swap_instructions(value: Value) -> Result<SwapInstructions, RouteError> {
    let wire: SwapInstructionsWire = serde_json::from_value(value)
        .map_err(|e| RouteError::InvalidResponse(format!("swap-instructions schema: {}", e)))?;

    let setup = wire
        .setup_instructions
        .into_iter()
        .map(decode_instruction)
        .collect::<Result<Vec<_>, _>>()?;
    let swap = decode_instruction(wire.swap_instruction)?;

    let lookup_tables = wire
        .address_lookup_table_addresses
        .iter()
        .map(|a| {
            Pubkey::from_str(a)
                .map_err(|_| RouteError::InvalidResponse(format!("bad lookup table: {}", a)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SwapInstructions {
        setup,
        swap,
        lookup_tables,
    })
}

fn decode_instruction(wire: InstructionWire) -> Result<RouterInstruction, RouteError> {
    let program_id = Pubkey::from_str(&wire.program_id)
        .map_err(|_| RouteError::InvalidResponse(format!("bad program id: {}", wire.program_id)))?;

    let accounts = wire
        .accounts
        .iter()
        .map(|a| {
            Pubkey::from_str(&a.pubkey)
                .map(|pubkey| RouterAccount {
                    pubkey,
                    is_signer: a.is_signer,
                    is_writable: a.is_writable,
                })
                .map_err(|_| RouteError::InvalidResponse(format!("bad account: {}", a.pubkey)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let data = BASE64
        .decode(&wire.data)
        .map_err(|e| RouteError::InvalidResponse(format!("bad instruction data: {}", e)))?;

    Ok(RouterInstruction {
        program_id,
        accounts,
        data,
    })
}

fn parse_amount(s: &str, field: &str) -> Result<u64, RouteError> {
    s.parse()
        .map_err(|_| RouteError::InvalidResponse(format!("{} is not a u64: {}", field, s)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quote_valid() {
        let value = json!({
            "inAmount": "250000",
            "outAmount": "1900000000",
            "otherAmountThreshold": "1520000000",
            "routePlan": [{"swapInfo": {}}],
        });

        let quote = parse_quote(value).unwrap();
        assert_eq!(quote.in_amount, 250_000);
        assert_eq!(quote.expected_out, 1_900_000_000);
        assert_eq!(quote.min_out, 1_520_000_000);
    }

    #[test]
    fn test_parse_quote_empty_route_plan_is_no_route() {
        let value = json!({
            "inAmount": "250000",
            "outAmount": "0",
            "otherAmountThreshold": "0",
            "routePlan": [],
        });

        assert!(matches!(parse_quote(value), Err(RouteError::NoRoute)));
    }

    #[test]
    fn test_parse_quote_rejects_partial_object() {
        // Missing otherAmountThreshold must be a schema error, not a default
        let value = json!({
            "inAmount": "250000",
            "outAmount": "1900000000",
            "routePlan": [{}],
        });

        assert!(matches!(
            parse_quote(value),
            Err(RouteError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_parse_swap_instructions() {
        let value = json!({
            "setupInstructions": [{
                "programId": "11111111111111111111111111111111",
                "accounts": [
                    {"pubkey": "So11111111111111111111111111111111111111112", "isSigner": false, "isWritable": true}
                ],
                "data": BASE64.encode([1u8, 2, 3]),
            }],
            "swapInstruction": {
                "programId": "JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4",
                "accounts": [],
                "data": BASE64.encode([9u8, 9]),
            },
            "addressLookupTableAddresses": ["So11111111111111111111111111111111111111112"],
        });

        let parsed = parse_swap_instructions(value).unwrap();
        assert_eq!(parsed.setup.len(), 1);
        assert_eq!(parsed.setup[0].data, vec![1, 2, 3]);
        assert!(parsed.setup[0].accounts[0].is_writable);
        assert!(!parsed.setup[0].accounts[0].is_signer);
        assert_eq!(parsed.swap.data, vec![9, 9]);
        assert_eq!(parsed.lookup_tables.len(), 1);
    }

    #[test]
    fn test_parse_swap_instructions_bad_base64() {
        let value = json!({
            "swapInstruction": {
                "programId": "JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4",
                "accounts": [],
                "data": "not base64!!!",
            },
        });

        assert!(matches!(
            parse_swap_instructions(value),
            Err(RouteError::InvalidResponse(_))
        ));
    }
}
