//! ERC-20, EIP-2612 and Permit2-proxy calldata
//!
//! Encoding goes through `alloy-sol-types`; the rest of the EVM module speaks
//! ethers types, so conversions live here too.

use crate::error::{ErrorCode, SdkError};

use alloy_primitives::{Address as AlloyAddress, Bytes as AlloyBytes, FixedBytes, U256 as AlloyU256};
use alloy_sol_types::{sol, SolCall};
use ethers::types::{Address, Bytes, U256};

sol! {
    function allowance(address owner, address spender) external view returns (uint256);
    function approve(address spender, uint256 amount) external returns (bool);
    function nonces(address owner) external view returns (uint256);
    function name() external view returns (string);

    struct TokenPermissions {
        address token;
        uint256 amount;
    }

    struct PermitTransferFrom {
        TokenPermissions permitted;
        uint256 nonce;
        uint256 deadline;
    }

    function callDiamondWithPermit2(
        bytes diamondCalldata,
        PermitTransferFrom permit,
        bytes signature
    ) external payable returns (bytes);

    function callDiamondWithEIP2612Signature(
        address tokenAddress,
        uint256 amount,
        uint256 deadline,
        uint8 v,
        bytes32 r,
        bytes32 s,
        bytes diamondCalldata
    ) external payable returns (bytes);
}

pub fn to_alloy_address(address: Address) -> AlloyAddress {
    AlloyAddress::from(address.0)
}

pub fn to_alloy_u256(value: U256) -> AlloyU256 {
    AlloyU256::from_limbs(value.0)
}

pub fn from_alloy_u256(value: AlloyU256) -> U256 {
    U256(value.into_limbs())
}

fn malformed(what: &str, err: alloy_sol_types::Error) -> SdkError {
    SdkError::new(
        ErrorCode::InternalError,
        format!("Malformed {} return data", what),
    )
    .with_cause(err.to_string())
}

pub fn encode_allowance(owner: Address, spender: Address) -> Bytes {
    let call = allowanceCall {
        owner: to_alloy_address(owner),
        spender: to_alloy_address(spender),
    };
    Bytes::from(call.abi_encode())
}

pub fn decode_allowance(data: &[u8]) -> Result<U256, SdkError> {
    allowanceCall::abi_decode_returns(data, true)
        .map(|r| from_alloy_u256(r._0))
        .map_err(|e| malformed("allowance", e))
}

pub fn encode_approve(spender: Address, amount: U256) -> Bytes {
    let call = approveCall {
        spender: to_alloy_address(spender),
        amount: to_alloy_u256(amount),
    };
    Bytes::from(call.abi_encode())
}

pub fn encode_nonces(owner: Address) -> Bytes {
    let call = noncesCall {
        owner: to_alloy_address(owner),
    };
    Bytes::from(call.abi_encode())
}

pub fn decode_nonces(data: &[u8]) -> Result<U256, SdkError> {
    noncesCall::abi_decode_returns(data, true)
        .map(|r| from_alloy_u256(r._0))
        .map_err(|e| malformed("nonces", e))
}

pub fn encode_name() -> Bytes {
    Bytes::from(nameCall {}.abi_encode())
}

pub fn decode_name(data: &[u8]) -> Result<String, SdkError> {
    nameCall::abi_decode_returns(data, true)
        .map(|r| r._0)
        .map_err(|e| malformed("name", e))
}

/// Wrap diamond calldata with a Permit2 `PermitTransferFrom` signature
pub fn encode_call_with_permit2(
    diamond_calldata: &[u8],
    token: Address,
    amount: U256,
    nonce: U256,
    deadline: U256,
    signature: &[u8],
) -> Bytes {
    let call = callDiamondWithPermit2Call {
        diamondCalldata: AlloyBytes::copy_from_slice(diamond_calldata),
        permit: PermitTransferFrom {
            permitted: TokenPermissions {
                token: to_alloy_address(token),
                amount: to_alloy_u256(amount),
            },
            nonce: to_alloy_u256(nonce),
            deadline: to_alloy_u256(deadline),
        },
        signature: AlloyBytes::copy_from_slice(signature),
    };
    Bytes::from(call.abi_encode())
}

/// Wrap diamond calldata with an EIP-2612 permit signature split into v/r/s
pub fn encode_call_with_eip2612(
    token: Address,
    amount: U256,
    deadline: U256,
    signature: &[u8],
    diamond_calldata: &[u8],
) -> Result<Bytes, SdkError> {
    if signature.len() != 65 {
        return Err(SdkError::validation(format!(
            "Permit signature must be 65 bytes, got {}",
            signature.len()
        )));
    }
    let r = FixedBytes::<32>::from_slice(&signature[..32]);
    let s = FixedBytes::<32>::from_slice(&signature[32..64]);
    let v = match signature[64] {
        v @ 0 | v @ 1 => v + 27,
        v => v,
    };

    let call = callDiamondWithEIP2612SignatureCall {
        tokenAddress: to_alloy_address(token),
        amount: to_alloy_u256(amount),
        deadline: to_alloy_u256(deadline),
        v,
        r,
        s,
        diamondCalldata: AlloyBytes::copy_from_slice(diamond_calldata),
    };
    Ok(Bytes::from(call.abi_encode()))
}

pub fn selector_of(data: &[u8]) -> Option<[u8; 4]> {
    data.get(..4).and_then(|s| s.try_into().ok())
}

pub const ALLOWANCE_SELECTOR: [u8; 4] = allowanceCall::SELECTOR;
pub const APPROVE_SELECTOR: [u8; 4] = approveCall::SELECTOR;
pub const NONCES_SELECTOR: [u8; 4] = noncesCall::SELECTOR;
pub const NAME_SELECTOR: [u8; 4] = nameCall::SELECTOR;
