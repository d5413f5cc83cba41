//! Allowance / permit decision
//!
//! One parametrised decision shared by the standard, batched and relayed EVM
//! strategies. Branch order:
//!
//! 1. a valid signed permit already exists for the source chain
//! 2. the current allowance already covers the amount
//! 3. atomic batching: the approval becomes a call inside the batch
//! 4. EIP-2612 native permit signature
//! 5. Permit2 signature
//! 6. on-chain `approve`, optionally preceded by a reset to zero

use crate::step::{PreparedCall, SignedTypedData};

use ethers::types::U256;
use serde::{Deserialize, Serialize};

/// Tokens that revert when raising a non-zero allowance (lowercase addresses)
const RESET_REQUIRED_TOKENS: &[(u64, &str)] = &[
    (1, "0xdac17f958d2ee523a2206206994597c13d831ec7"),
    (1, "0x0d8775f648430679a709e98d2b0cb6250d2887ef"),
];

/// Everything the decision depends on, gathered by the allowance task
#[derive(Debug, Clone, PartialEq)]
pub struct AllowanceInputs {
    pub required: U256,
    pub current: U256,
    pub native_token: bool,
    pub has_valid_permit: bool,
    pub atomic_batch: bool,
    pub message_signing_disabled: bool,
    pub chain_supports_permit2: bool,
    /// The token implements EIP-2612 `permit` / `nonces`
    pub token_supports_native_permit: bool,
    pub reset_required: bool,
}

impl AllowanceInputs {
    /// Signature-based allowances are usable at all
    pub fn signing_usable(&self) -> bool {
        !self.native_token && !self.message_signing_disabled && !self.atomic_batch
    }

    pub fn permit2_usable(&self) -> bool {
        self.signing_usable() && self.chain_supports_permit2
    }

    pub fn native_permit_usable(&self) -> bool {
        self.signing_usable() && self.token_supports_native_permit
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowanceDecision {
    /// Native gas token, nothing to approve
    NotRequired,
    ExistingPermit,
    Sufficient,
    BatchCall,
    NativePermit,
    Permit2Signature,
    Approve { reset_first: bool },
}

impl AllowanceDecision {
    pub fn needs_signature(self) -> bool {
        matches!(
            self,
            AllowanceDecision::NativePermit | AllowanceDecision::Permit2Signature
        )
    }

    pub fn needs_transaction(self) -> bool {
        matches!(self, AllowanceDecision::Approve { .. })
    }
}

pub fn decide(inputs: &AllowanceInputs) -> AllowanceDecision {
    if inputs.native_token {
        return AllowanceDecision::NotRequired;
    }
    if inputs.has_valid_permit {
        return AllowanceDecision::ExistingPermit;
    }
    if inputs.current >= inputs.required {
        return AllowanceDecision::Sufficient;
    }
    if inputs.atomic_batch {
        return AllowanceDecision::BatchCall;
    }
    if inputs.native_permit_usable() {
        return AllowanceDecision::NativePermit;
    }
    if inputs.permit2_usable() {
        return AllowanceDecision::Permit2Signature;
    }
    AllowanceDecision::Approve {
        reset_first: inputs.reset_required && !inputs.current.is_zero(),
    }
}

/// Whether a token needs its allowance zeroed before it can be raised
pub fn requires_reset(chain_id: u64, token_address: &str) -> bool {
    let token = token_address.to_ascii_lowercase();
    RESET_REQUIRED_TOKENS
        .iter()
        .any(|(chain, address)| *chain == chain_id && *address == token)
}

/// Outcome every allowance branch converges on, carried in the task state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AllowanceResult {
    /// Allowance is in place (or not needed)
    Done,
    /// Approval to be merged into the atomic batch
    Batched { call: PreparedCall },
    /// Off-chain permit to be attached to the main transaction
    Signed { permit: SignedTypedData },
}

impl AllowanceResult {
    pub fn batch_call(&self) -> Option<&PreparedCall> {
        match self {
            AllowanceResult::Batched { call } => Some(call),
            _ => None,
        }
    }

    pub fn permit(&self) -> Option<&SignedTypedData> {
        match self {
            AllowanceResult::Signed { permit } => Some(permit),
            _ => None,
        }
    }
}
