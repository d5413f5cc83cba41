//! EVM error classifier

use crate::error::{ChainError, ErrorCode, SdkError};

use lazy_static::lazy_static;
use regex::Regex;

/// EIP-1193 user rejected the request
const USER_REJECTED: i64 = 4001;
/// EIP-3085 unrecognized chain id
const UNRECOGNIZED_CHAIN: i64 = 4902;
/// EIP-5792 atomic batch upgrade rejected
pub const ATOMIC_UPGRADE_REJECTED: i64 = 5750;
const RPC_LIMIT_EXCEEDED: i64 = -32005;
const HTTP_TOO_MANY_REQUESTS: i64 = 429;

lazy_static! {
    static ref REJECTED: Regex = Regex::new(
        r"(?i)user (rejected|denied|cancel+ed)|rejected the request|request rejected|UserRejectedRequest"
    )
    .unwrap();
    static ref CHAIN_SWITCH: Regex =
        Regex::new(r"(?i)unrecognized chain|chain ?id mismatch|does not match the target chain").unwrap();
    static ref UNDERPRICED: Regex = Regex::new(
        r"(?i)(replacement )?transaction underpriced|fee too low|max fee per gas less than block base fee"
    )
    .unwrap();
    static ref NONCE_CONFLICT: Regex =
        Regex::new(r"(?i)nonce too low|nonce has already been used|already known").unwrap();
    static ref INSUFFICIENT_FUNDS: Regex =
        Regex::new(r"(?i)insufficient funds|exceeds balance").unwrap();
    static ref GAS_LIMIT: Regex =
        Regex::new(r"(?i)gas required exceeds allowance|intrinsic gas too low|out of gas").unwrap();
    static ref ALLOWANCE: Regex =
        Regex::new(r"(?i)insufficient allowance|exceeds allowance|transfer_from_failed").unwrap();
    static ref SLIPPAGE: Regex = Regex::new(
        r"(?i)slippage|return amount is not enough|insufficient_output_amount|too little received"
    )
    .unwrap();
    static ref REVERTED: Regex = Regex::new(r"(?i)execution reverted|revert").unwrap();
    static ref TIMEOUT: Regex = Regex::new(r"(?i)timed? ?out").unwrap();
    static ref UNAVAILABLE: Regex = Regex::new(
        r"(?i)rate limit|too many requests|connection (refused|reset)|error sending request|service unavailable|bad gateway"
    )
    .unwrap();
}

/// Map a raw wallet / RPC error to its canonical kind. Unmatched errors
/// become `UnknownError` carrying the original message.
pub fn classify_evm_error(err: &ChainError) -> SdkError {
    let text = err.haystack();

    let (code, message) = match err.code {
        Some(USER_REJECTED) => (ErrorCode::SignatureRejected, "User rejected the request."),
        Some(ATOMIC_UPGRADE_REJECTED) => (
            ErrorCode::SignatureRejected,
            "User rejected the account upgrade.",
        ),
        Some(UNRECOGNIZED_CHAIN) => (ErrorCode::ChainSwitchError, "Wallet does not know the chain."),
        Some(RPC_LIMIT_EXCEEDED) | Some(HTTP_TOO_MANY_REQUESTS) => (
            ErrorCode::ProviderUnavailable,
            "RPC provider is rate limiting requests.",
        ),
        _ if REJECTED.is_match(&text) => (ErrorCode::SignatureRejected, "User rejected the request."),
        _ if CHAIN_SWITCH.is_match(&text) => (
            ErrorCode::ChainSwitchError,
            "Wallet is connected to the wrong chain.",
        ),
        _ if UNDERPRICED.is_match(&text) => (
            ErrorCode::TransactionUnderpriced,
            "Transaction is underpriced.",
        ),
        _ if NONCE_CONFLICT.is_match(&text) => (
            ErrorCode::TransactionConflict,
            "Transaction nonce was already used by another transaction.",
        ),
        _ if INSUFFICIENT_FUNDS.is_match(&text) => (
            ErrorCode::InsufficientFunds,
            "Insufficient funds to pay for the transaction.",
        ),
        _ if GAS_LIMIT.is_match(&text) => (ErrorCode::GasLimitError, "Gas limit is too low."),
        _ if ALLOWANCE.is_match(&text) => (
            ErrorCode::AllowanceRequired,
            "Token allowance is not sufficient.",
        ),
        _ if SLIPPAGE.is_match(&text) => (
            ErrorCode::SlippageError,
            "The price moved more than the allowed slippage.",
        ),
        _ if REVERTED.is_match(&text) => (
            ErrorCode::TransactionSimulationFailed,
            "Transaction simulation reverted.",
        ),
        _ if TIMEOUT.is_match(&text) => (ErrorCode::Timeout, "Request timed out."),
        _ if UNAVAILABLE.is_match(&text) => (
            ErrorCode::ProviderUnavailable,
            "RPC provider is unavailable.",
        ),
        _ => return SdkError::new(ErrorCode::UnknownError, err.message.clone()),
    };

    SdkError::new(code, message)
}
