//! Quote-side data: routes, steps, tokens and the transaction payloads the
//! quote service attaches to a step

use super::execution::Execution;
use crate::chain::ChainId;

use serde::{Deserialize, Serialize};

const EVM_ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";
const EVM_NATIVE_PLACEHOLDER: &str = "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee";
const SOLANA_SYSTEM_PROGRAM: &str = "11111111111111111111111111111111";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub address: String,
    pub chain_id: ChainId,
    pub symbol: String,
    pub decimals: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Token {
    /// Gas token of its chain (no allowance needed)
    pub fn is_native(&self) -> bool {
        let address = self.address.to_ascii_lowercase();
        address == EVM_ZERO_ADDRESS
            || address == EVM_NATIVE_PLACEHOLDER
            || self.address == SOLANA_SYSTEM_PROGRAM
            || address.ends_with("::sui::sui")
            || address == "bitcoin"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Swap,
    Cross,
    Lifi,
    Protocol,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepAction {
    pub from_chain_id: ChainId,
    pub to_chain_id: ChainId,
    pub from_token: Token,
    pub to_token: Token,
    /// Base units, decimal string
    pub from_amount: String,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub slippage: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Estimate {
    /// Spender the source token must be approved to
    pub approval_address: Option<String>,
    pub from_amount: String,
    pub to_amount: String,
    pub to_amount_min: String,
    #[serde(default)]
    pub execution_duration: f64,
}

/// Unsigned transaction as returned by the quote service. The meaning of
/// `data` depends on the chain family: EVM calldata (hex), a base64
/// serialized Solana/Sui transaction, or a hex PSBT.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<ChainId>,
}

/// EIP-712 payload the quote service asks the wallet to sign (relayer intents)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedDataToSign {
    pub primary_type: String,
    pub domain: serde_json::Value,
    pub types: serde_json::Value,
    pub message: serde_json::Value,
}

impl TypedDataToSign {
    pub fn is_permit(&self) -> bool {
        is_permit_type(&self.primary_type)
    }
}

fn is_permit_type(primary_type: &str) -> bool {
    matches!(
        primary_type,
        "Permit" | "PermitTransferFrom" | "PermitWitnessTransferFrom"
    )
}

/// A signature produced for a typed-data payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTypedData {
    pub primary_type: String,
    pub chain_id: ChainId,
    pub domain: serde_json::Value,
    pub message: serde_json::Value,
    pub signature: String,
    /// Unix seconds after which the signature is no longer usable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<i64>,
}

impl SignedTypedData {
    pub fn is_permit(&self) -> bool {
        is_permit_type(&self.primary_type)
    }

    pub fn is_expired(&self, now_unix: i64) -> bool {
        self.deadline.map(|d| d <= now_unix).unwrap_or(false)
    }
}

/// A call that will be merged into an atomic batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedCall {
    pub to: String,
    pub data: String,
    pub value: String,
}

/// The quoted unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub tool: String,
    pub action: StepAction,
    pub estimate: Estimate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_request: Option<TransactionRequest>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub typed_data: Vec<TypedDataToSign>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<Execution>,
}

impl Step {
    pub fn is_cross_chain(&self) -> bool {
        self.action.from_chain_id != self.action.to_chain_id
    }

    /// Replace the quote-side fields with a refreshed quote, keeping the execution
    pub fn apply_quote(&mut self, refreshed: Step) {
        let execution = self.execution.take();
        *self = Step {
            execution,
            ..refreshed
        };
    }
}

/// An ordered list of steps executed for one user intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub id: String,
    pub from_chain_id: ChainId,
    pub to_chain_id: ChainId,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub steps: Vec<Step>,
}

impl Route {
    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    pub fn step_mut(&mut self, step_id: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == step_id)
    }

    pub fn is_finished(&self) -> bool {
        self.steps.iter().all(|s| {
            s.execution
                .as_ref()
                .map(|e| e.status.is_done())
                .unwrap_or(false)
        })
    }
}
