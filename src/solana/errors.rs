//! Solana error classifier

use crate::error::{ChainError, ErrorCode, SdkError};

use lazy_static::lazy_static;
use regex::Regex;

/// Wallet-standard user rejection
const USER_REJECTED: i64 = 4001;

lazy_static! {
    static ref REJECTED: Regex = Regex::new(
        r"(?i)user rejected|rejected the request|WalletSignTransactionError|transaction cancell?ed"
    )
    .unwrap();
    static ref EXPIRED: Regex = Regex::new(
        r"(?i)blockhash not found|block height exceeded|TransactionExpired|has expired"
    )
    .unwrap();
    static ref ALREADY_PROCESSED: Regex =
        Regex::new(r"(?i)already been processed|AlreadyProcessed").unwrap();
    // 0x1771: aggregator program slippage tolerance exceeded
    static ref SLIPPAGE: Regex = Regex::new(r"(?i)slippage|custom program error: 0x1771").unwrap();
    static ref INSUFFICIENT_FUNDS: Regex = Regex::new(
        r"(?i)insufficient (funds|lamports)|attempt to debit an account but found no record"
    )
    .unwrap();
    static ref SIMULATION: Regex = Regex::new(
        r"(?i)simulation failed|preflight|custom program error|InstructionError"
    )
    .unwrap();
    static ref TIMEOUT: Regex = Regex::new(r"(?i)timed? ?out").unwrap();
    static ref UNAVAILABLE: Regex = Regex::new(
        r"(?i)rate limit|too many requests|429|connection (refused|reset)|service unavailable"
    )
    .unwrap();
}

/// Map a raw Solana wallet / RPC error to its canonical kind
pub fn classify_solana_error(err: &ChainError) -> SdkError {
    let text = err.haystack();

    let (code, message) = match err.code {
        Some(USER_REJECTED) => (ErrorCode::SignatureRejected, "User rejected the request."),
        _ if REJECTED.is_match(&text) => (ErrorCode::SignatureRejected, "User rejected the request."),
        _ if EXPIRED.is_match(&text) => (
            ErrorCode::TransactionExpired,
            "Transaction blockhash expired before confirmation.",
        ),
        _ if ALREADY_PROCESSED.is_match(&text) => (
            ErrorCode::TransactionConflict,
            "Transaction was already processed.",
        ),
        _ if SLIPPAGE.is_match(&text) => (
            ErrorCode::SlippageError,
            "The slippage is larger than the defined threshold.",
        ),
        _ if INSUFFICIENT_FUNDS.is_match(&text) => (
            ErrorCode::InsufficientFunds,
            "Insufficient funds to pay for the transaction.",
        ),
        _ if SIMULATION.is_match(&text) => (
            ErrorCode::TransactionSimulationFailed,
            "Transaction simulation failed.",
        ),
        _ if TIMEOUT.is_match(&text) => (ErrorCode::Timeout, "Solana RPC request timed out."),
        _ if UNAVAILABLE.is_match(&text) => (
            ErrorCode::ProviderUnavailable,
            "Solana RPC is unavailable.",
        ),
        _ => return SdkError::new(ErrorCode::UnknownError, err.message.clone()),
    };

    SdkError::new(code, message).with_cause(text)
}
