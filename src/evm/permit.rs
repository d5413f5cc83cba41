//! EIP-712 payloads for gasless allowances: EIP-2612 `Permit` and Permit2
//! `PermitTransferFrom`

use super::request::{parse_address, parse_quantity};
use crate::chain::ChainId;
use crate::error::SdkError;
use crate::step::{SignedTypedData, TypedDataToSign};

use ethers::types::{Address, U256};
use serde_json::{json, Value};
use uuid::Uuid;

/// Lifetime of a freshly signed permit
pub const PERMIT_VALIDITY_SECS: i64 = 30 * 60;

/// EIP-2612 permit for `token`, signed by `owner` for `spender`
#[derive(Debug, Clone)]
pub struct NativePermit {
    pub chain_id: ChainId,
    pub token: Address,
    pub token_name: String,
    pub owner: Address,
    pub spender: Address,
    pub value: U256,
    pub nonce: U256,
    pub deadline: i64,
}

impl NativePermit {
    pub fn typed_data(&self) -> TypedDataToSign {
        TypedDataToSign {
            primary_type: "Permit".to_string(),
            domain: json!({
                "name": self.token_name,
                "version": "1",
                "chainId": self.chain_id,
                "verifyingContract": format!("{:?}", self.token),
            }),
            types: json!({
                "Permit": [
                    {"name": "owner", "type": "address"},
                    {"name": "spender", "type": "address"},
                    {"name": "value", "type": "uint256"},
                    {"name": "nonce", "type": "uint256"},
                    {"name": "deadline", "type": "uint256"}
                ]
            }),
            message: json!({
                "owner": format!("{:?}", self.owner),
                "spender": format!("{:?}", self.spender),
                "value": self.value.to_string(),
                "nonce": self.nonce.to_string(),
                "deadline": self.deadline.to_string(),
            }),
        }
    }
}

/// Permit2 signature transfer of `amount` of `token` to `spender` (the Permit2 proxy)
#[derive(Debug, Clone)]
pub struct Permit2Transfer {
    pub chain_id: ChainId,
    pub permit2: Address,
    pub token: Address,
    pub amount: U256,
    pub spender: Address,
    pub nonce: U256,
    pub deadline: i64,
}

impl Permit2Transfer {
    pub fn typed_data(&self) -> TypedDataToSign {
        TypedDataToSign {
            primary_type: "PermitTransferFrom".to_string(),
            domain: json!({
                "name": "Permit2",
                "chainId": self.chain_id,
                "verifyingContract": format!("{:?}", self.permit2),
            }),
            types: json!({
                "PermitTransferFrom": [
                    {"name": "permitted", "type": "TokenPermissions"},
                    {"name": "spender", "type": "address"},
                    {"name": "nonce", "type": "uint256"},
                    {"name": "deadline", "type": "uint256"}
                ],
                "TokenPermissions": [
                    {"name": "token", "type": "address"},
                    {"name": "amount", "type": "uint256"}
                ]
            }),
            message: json!({
                "permitted": {
                    "token": format!("{:?}", self.token),
                    "amount": self.amount.to_string(),
                },
                "spender": format!("{:?}", self.spender),
                "nonce": self.nonce.to_string(),
                "deadline": self.deadline.to_string(),
            }),
        }
    }
}

/// Permit2 uses unordered nonces; any unused value works
pub fn random_permit2_nonce() -> U256 {
    U256::from(Uuid::new_v4().as_u128())
}

pub fn into_signed(
    data: TypedDataToSign,
    chain_id: ChainId,
    signature: String,
    deadline: Option<i64>,
) -> SignedTypedData {
    SignedTypedData {
        primary_type: data.primary_type,
        chain_id,
        domain: data.domain,
        message: data.message,
        signature,
        deadline,
    }
}

fn field<'a>(value: &'a Value, path: &[&str]) -> Result<&'a str, SdkError> {
    path.iter()
        .try_fold(value, |v, key| v.get(*key))
        .and_then(Value::as_str)
        .ok_or_else(|| SdkError::validation(format!("Signed permit is missing {}", path.join("."))))
}

fn quantity(value: &Value, path: &[&str]) -> Result<U256, SdkError> {
    match path.iter().try_fold(value, |v, key| v.get(*key)) {
        Some(Value::Number(n)) => parse_quantity(&n.to_string()),
        _ => parse_quantity(field(value, path)?),
    }
}

/// Fields of a signed permit needed to build the wrapping call
#[derive(Debug, Clone, PartialEq)]
pub struct PermitCallData {
    pub token: Address,
    pub amount: U256,
    pub nonce: U256,
    pub deadline: U256,
    pub signature: Vec<u8>,
}

pub fn permit_call_data(signed: &SignedTypedData) -> Result<PermitCallData, SdkError> {
    let signature = hex::decode(signed.signature.trim_start_matches("0x"))
        .map_err(|e| SdkError::validation(format!("Invalid permit signature: {}", e)))?;
    let message = &signed.message;

    match signed.primary_type.as_str() {
        "Permit" => Ok(PermitCallData {
            token: parse_address(field(&signed.domain, &["verifyingContract"])?)?,
            amount: quantity(message, &["value"])?,
            nonce: quantity(message, &["nonce"])?,
            deadline: quantity(message, &["deadline"])?,
            signature,
        }),
        "PermitTransferFrom" => Ok(PermitCallData {
            token: parse_address(field(message, &["permitted", "token"])?)?,
            amount: quantity(message, &["permitted", "amount"])?,
            nonce: quantity(message, &["nonce"])?,
            deadline: quantity(message, &["deadline"])?,
            signature,
        }),
        other => Err(SdkError::validation(format!(
            "Unsupported permit type {}",
            other
        ))),
    }
}
