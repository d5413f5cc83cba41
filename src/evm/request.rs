//! Conversion of quote-service transaction requests into signable transactions

use crate::chain::ChainId;
use crate::error::{ErrorCode, SdkError};
use crate::step::{PreparedCall, TransactionRequest};

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Eip1559TransactionRequest, TransactionRequest as LegacyRequest, U256};

fn unprepared(message: impl Into<String>) -> SdkError {
    SdkError::new(ErrorCode::TransactionUnprepared, message)
}

/// Quantities arrive either as 0x-prefixed hex or as decimal strings
pub fn parse_quantity(value: &str) -> Result<U256, SdkError> {
    let value = value.trim();
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) if hex.is_empty() => Ok(U256::zero()),
        Some(hex) => U256::from_str_radix(hex, 16).map_err(|e| e.to_string()),
        None => U256::from_dec_str(value).map_err(|e| e.to_string()),
    };
    parsed.map_err(|e| SdkError::validation(format!("Invalid quantity {:?}: {}", value, e)))
}

pub fn parse_address(value: &str) -> Result<Address, SdkError> {
    value
        .parse::<Address>()
        .map_err(|e| SdkError::validation(format!("Invalid address {:?}: {}", value, e)))
}

pub fn parse_bytes(value: &str) -> Result<Bytes, SdkError> {
    let hex_str = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(hex_str)
        .map(Bytes::from)
        .map_err(|e| SdkError::validation(format!("Invalid calldata: {}", e)))
}

/// Build a typed transaction from the quote's request.
///
/// Quoted EIP-1559 fees produce a type-2 transaction, a quoted `gasPrice` a
/// legacy one; with neither, type 2 is used and fees are filled at send time.
pub fn build_transaction(
    request: &TransactionRequest,
    from: Address,
    chain_id: ChainId,
) -> Result<TypedTransaction, SdkError> {
    let to = request
        .to
        .as_deref()
        .ok_or_else(|| unprepared("Transaction request has no recipient."))?;
    let to = parse_address(to)?;
    let data = request
        .data
        .as_deref()
        .map(parse_bytes)
        .transpose()?
        .unwrap_or_default();
    let value = request
        .value
        .as_deref()
        .map(parse_quantity)
        .transpose()?
        .unwrap_or_default();
    let gas = request.gas_limit.as_deref().map(parse_quantity).transpose()?;

    let tx = match (&request.max_fee_per_gas, &request.gas_price) {
        (None, Some(gas_price)) => {
            let mut legacy = LegacyRequest::new()
                .from(from)
                .to(to)
                .data(data)
                .value(value)
                .chain_id(chain_id)
                .gas_price(parse_quantity(gas_price)?);
            if let Some(gas) = gas {
                legacy = legacy.gas(gas);
            }
            TypedTransaction::Legacy(legacy)
        }
        (max_fee, _) => {
            let mut eip1559 = Eip1559TransactionRequest::new()
                .from(from)
                .to(to)
                .data(data)
                .value(value)
                .chain_id(chain_id);
            if let Some(max_fee) = max_fee {
                eip1559 = eip1559.max_fee_per_gas(parse_quantity(max_fee)?);
            }
            if let Some(priority) = &request.max_priority_fee_per_gas {
                eip1559 = eip1559.max_priority_fee_per_gas(parse_quantity(priority)?);
            }
            if let Some(gas) = gas {
                eip1559 = eip1559.gas(gas);
            }
            TypedTransaction::Eip1559(eip1559)
        }
    };

    Ok(tx)
}

/// The request as a call for an atomic batch
pub fn to_prepared_call(request: &TransactionRequest) -> Result<PreparedCall, SdkError> {
    let to = request
        .to
        .clone()
        .ok_or_else(|| unprepared("Transaction request has no recipient."))?;
    let value = request
        .value
        .as_deref()
        .map(parse_quantity)
        .transpose()?
        .unwrap_or_default();

    Ok(PreparedCall {
        to,
        data: request.data.clone().unwrap_or_else(|| "0x".to_string()),
        value: format!("{:#x}", value),
    })
}
