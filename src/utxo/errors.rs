//! Bitcoin error classifier

use crate::error::{ChainError, ErrorCode, SdkError};

use lazy_static::lazy_static;
use regex::Regex;

const USER_REJECTED: i64 = 4001;

lazy_static! {
    static ref REJECTED: Regex =
        Regex::new(r"(?i)user (rejected|denied|canceled|cancelled)|rejected the request").unwrap();
    // inputs already spent by another mempool or mined transaction
    static ref CONFLICT: Regex = Regex::new(
        r"(?i)txn-mempool-conflict|bad-txns-inputs-missingorspent|missing ?inputs|rejecting replacement|insufficient fee, rejecting|txn-already-known|already in block chain"
    )
    .unwrap();
    static ref UNDERPRICED: Regex =
        Regex::new(r"(?i)min relay fee not met|mempool min fee not met|insufficient fee").unwrap();
    static ref INSUFFICIENT_FUNDS: Regex =
        Regex::new(r"(?i)insufficient (funds|balance)|not enough (funds|utxos)").unwrap();
    static ref INVALID_PSBT: Regex =
        Regex::new(r"(?i)invalid psbt|psbt.*(parse|decode)|unable to finalize").unwrap();
    static ref TIMEOUT: Regex = Regex::new(r"(?i)timed? ?out").unwrap();
    static ref UNAVAILABLE: Regex = Regex::new(
        r"(?i)rate limit|too many requests|connection (refused|reset)|service unavailable"
    )
    .unwrap();
}

/// Map a raw Bitcoin wallet / indexer error to its canonical kind
pub fn classify_utxo_error(err: &ChainError) -> SdkError {
    let text = err.haystack();

    let (code, message) = match err.code {
        Some(USER_REJECTED) => (ErrorCode::SignatureRejected, "User rejected the request."),
        _ if REJECTED.is_match(&text) => (ErrorCode::SignatureRejected, "User rejected the request."),
        _ if CONFLICT.is_match(&text) => (
            ErrorCode::TransactionConflict,
            "Transaction inputs were spent by another transaction.",
        ),
        _ if UNDERPRICED.is_match(&text) => (
            ErrorCode::TransactionUnderpriced,
            "Transaction fee is below the relay minimum.",
        ),
        _ if INSUFFICIENT_FUNDS.is_match(&text) => (
            ErrorCode::InsufficientFunds,
            "Insufficient funds to pay for the transaction.",
        ),
        _ if INVALID_PSBT.is_match(&text) => (
            ErrorCode::TransactionUnprepared,
            "Unable to prepare transaction.",
        ),
        _ if TIMEOUT.is_match(&text) => (ErrorCode::Timeout, "Bitcoin indexer request timed out."),
        _ if UNAVAILABLE.is_match(&text) => (
            ErrorCode::ProviderUnavailable,
            "Bitcoin indexer is unavailable.",
        ),
        _ => return SdkError::new(ErrorCode::UnknownError, err.message.clone()),
    };

    SdkError::new(code, message).with_cause(text)
}
