//! Sui error classifier

use crate::error::{ChainError, ErrorCode, SdkError};

use lazy_static::lazy_static;
use regex::Regex;

const USER_REJECTED: i64 = 4001;

lazy_static! {
    static ref REJECTED: Regex =
        Regex::new(r"(?i)user rejected|rejected (the|by) (request|user)|UserRejected").unwrap();
    // owned objects locked by a concurrent transaction
    static ref CONFLICT: Regex = Regex::new(
        r"(?i)equivocat|ObjectsDoubleUsed|locked by (a )?different transaction|conflicting transaction|object version .*(unavailable|not available)|ObjectVersionUnavailableForConsumption"
    )
    .unwrap();
    static ref INSUFFICIENT_FUNDS: Regex = Regex::new(
        r"(?i)InsufficientGas|GasBalanceTooLow|insufficient (gas|coin balance|sui balance)"
    )
    .unwrap();
    static ref SIMULATION: Regex =
        Regex::new(r"(?i)dry ?run failed|MoveAbort|simulation failed").unwrap();
    static ref TIMEOUT: Regex = Regex::new(r"(?i)timed? ?out").unwrap();
    static ref UNAVAILABLE: Regex = Regex::new(
        r"(?i)rate limit|too many requests|connection (refused|reset)|service unavailable"
    )
    .unwrap();
}

/// Map a raw Sui wallet / full-node error to its canonical kind
pub fn classify_sui_error(err: &ChainError) -> SdkError {
    let text = err.haystack();

    let (code, message) = match err.code {
        Some(USER_REJECTED) => (ErrorCode::SignatureRejected, "User rejected the request."),
        _ if REJECTED.is_match(&text) => (ErrorCode::SignatureRejected, "User rejected the request."),
        _ if CONFLICT.is_match(&text) => (
            ErrorCode::TransactionConflict,
            "Transaction objects are locked by another transaction.",
        ),
        _ if INSUFFICIENT_FUNDS.is_match(&text) => (
            ErrorCode::InsufficientFunds,
            "Insufficient balance to pay for gas.",
        ),
        _ if SIMULATION.is_match(&text) => (
            ErrorCode::TransactionSimulationFailed,
            "Transaction dry run failed.",
        ),
        _ if TIMEOUT.is_match(&text) => (ErrorCode::Timeout, "Sui full node request timed out."),
        _ if UNAVAILABLE.is_match(&text) => {
            (ErrorCode::ProviderUnavailable, "Sui full node is unavailable.")
        }
        _ => return SdkError::new(ErrorCode::UnknownError, err.message.clone()),
    };

    SdkError::new(code, message).with_cause(text)
}
