//! Error types for step execution
//!
//! Three layers:
//! - [`ChainError`]: raw, unclassified errors coming out of wallet/RPC clients
//! - [`SdkError`]: the canonical envelope every failure is classified into
//! - [`ExecutionError`]: what tasks and the pipeline propagate, including the
//!   retry signal that asks the caller to re-run the whole step

use crate::step::ActionType;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Closed set of canonical error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    InternalError,
    ValidationError,
    TransactionUnderpriced,
    TransactionFailed,
    Timeout,
    ProviderUnavailable,
    NotFound,
    ChainSwitchError,
    TransactionUnprepared,
    GasLimitError,
    TransactionCanceled,
    SlippageError,
    SignatureRejected,
    BalanceError,
    AllowanceRequired,
    InsufficientFunds,
    ExchangeRateUpdateCanceled,
    WalletChangedDuringExecution,
    TransactionExpired,
    TransactionSimulationFailed,
    TransactionConflict,
    UnknownError,
}

impl ErrorCode {
    /// Stable numeric code
    pub fn as_u16(self) -> u16 {
        match self {
            ErrorCode::InternalError => 1000,
            ErrorCode::ValidationError => 1001,
            ErrorCode::TransactionUnderpriced => 1002,
            ErrorCode::TransactionFailed => 1003,
            ErrorCode::Timeout => 1004,
            ErrorCode::ProviderUnavailable => 1005,
            ErrorCode::NotFound => 1006,
            ErrorCode::ChainSwitchError => 1007,
            ErrorCode::TransactionUnprepared => 1008,
            ErrorCode::GasLimitError => 1009,
            ErrorCode::TransactionCanceled => 1010,
            ErrorCode::SlippageError => 1011,
            ErrorCode::SignatureRejected => 1012,
            ErrorCode::BalanceError => 1013,
            ErrorCode::AllowanceRequired => 1014,
            ErrorCode::InsufficientFunds => 1015,
            ErrorCode::ExchangeRateUpdateCanceled => 1016,
            ErrorCode::WalletChangedDuringExecution => 1017,
            ErrorCode::TransactionExpired => 1018,
            ErrorCode::TransactionSimulationFailed => 1019,
            ErrorCode::TransactionConflict => 1020,
            ErrorCode::UnknownError => 1099,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::InternalError => "InternalError",
            ErrorCode::ValidationError => "ValidationError",
            ErrorCode::TransactionUnderpriced => "TransactionUnderpriced",
            ErrorCode::TransactionFailed => "TransactionFailed",
            ErrorCode::Timeout => "Timeout",
            ErrorCode::ProviderUnavailable => "ProviderUnavailable",
            ErrorCode::NotFound => "NotFound",
            ErrorCode::ChainSwitchError => "ChainSwitchError",
            ErrorCode::TransactionUnprepared => "TransactionUnprepared",
            ErrorCode::GasLimitError => "GasLimitError",
            ErrorCode::TransactionCanceled => "TransactionCanceled",
            ErrorCode::SlippageError => "SlippageError",
            ErrorCode::SignatureRejected => "SignatureRejected",
            ErrorCode::BalanceError => "BalanceError",
            ErrorCode::AllowanceRequired => "AllowanceRequired",
            ErrorCode::InsufficientFunds => "InsufficientFunds",
            ErrorCode::ExchangeRateUpdateCanceled => "ExchangeRateUpdateCanceled",
            ErrorCode::WalletChangedDuringExecution => "WalletChangedDuringExecution",
            ErrorCode::TransactionExpired => "TransactionExpired",
            ErrorCode::TransactionSimulationFailed => "TransactionSimulationFailed",
            ErrorCode::TransactionConflict => "TransactionConflict",
            ErrorCode::UnknownError => "UnknownError",
        }
    }

    /// The user can simply try again
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::SignatureRejected
                | ErrorCode::ChainSwitchError
                | ErrorCode::Timeout
                | ErrorCode::ProviderUnavailable
                | ErrorCode::TransactionUnderpriced
        )
    }

    /// The chain discarded the submission; the step must be re-quoted
    pub fn requires_requote(self) -> bool {
        matches!(
            self,
            ErrorCode::TransactionConflict
                | ErrorCode::TransactionCanceled
                | ErrorCode::TransactionExpired
                | ErrorCode::ExchangeRateUpdateCanceled
        )
    }

    /// Fatal for the current attempt
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorCode::WalletChangedDuringExecution)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Canonical error envelope carrying the originating step/action
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{code} ({}): {message}", .code.as_u16())]
pub struct SdkError {
    pub code: ErrorCode,
    pub message: String,
    pub step_id: Option<String>,
    pub action_type: Option<ActionType>,
    pub cause: Option<String>,
}

impl SdkError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            step_id: None,
            action_type: None,
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn with_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn with_action(mut self, action_type: ActionType) -> Self {
        self.action_type = Some(action_type);
        self
    }

    /// Attach step/action only where not already set
    pub fn backfill(mut self, step_id: Option<&str>, action_type: Option<ActionType>) -> Self {
        if self.step_id.is_none() {
            self.step_id = step_id.map(str::to_string);
        }
        if self.action_type.is_none() {
            self.action_type = action_type;
        }
        self
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }
}

/// Raw error reported by a wallet or RPC client
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct ChainError {
    /// JSON-RPC / EIP-1193 code when the library exposes one
    pub code: Option<i64>,
    pub message: String,
    /// Library error name (e.g. `UserRejectedRequestError`)
    pub name: Option<String>,
    pub data: Option<String>,
}

impl ChainError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            name: None,
            data: None,
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// All text a classifier may match against
    pub fn haystack(&self) -> String {
        let mut text = self.message.clone();
        if let Some(name) = &self.name {
            text.push(' ');
            text.push_str(name);
        }
        if let Some(data) = &self.data {
            text.push(' ');
            text.push_str(data);
        }
        text
    }
}

impl From<ethers::providers::ProviderError> for ChainError {
    fn from(err: ethers::providers::ProviderError) -> Self {
        use ethers::providers::RpcError;

        let mut chain_err = ChainError::new(err.to_string()).with_name("ProviderError");
        if let Some(response) = err.as_error_response() {
            chain_err.code = Some(response.code);
            chain_err.message = response.message.clone();
            chain_err.data = response.data.as_ref().map(|d| d.to_string());
        }
        chain_err
    }
}

impl From<ethers::signers::WalletError> for ChainError {
    fn from(err: ethers::signers::WalletError) -> Self {
        ChainError::new(err.to_string()).with_name("WalletError")
    }
}

impl From<reqwest::Error> for ChainError {
    fn from(err: reqwest::Error) -> Self {
        let mut chain_err = ChainError::new(err.to_string()).with_name("HttpError");
        if let Some(status) = err.status() {
            chain_err.code = Some(i64::from(status.as_u16()));
        }
        chain_err
    }
}

/// Errors raised by the status ledger
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Step {step_id} not found in route registry")]
    StepNotFound { step_id: String },

    #[error("Action {action_type} not found for step {step_id}")]
    ActionNotFound {
        step_id: String,
        action_type: ActionType,
    },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },
}

/// Errors raised by execution stores
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Parameters adjusted for a whole-step retry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryParams {
    pub disable_atomic_batch: bool,
    pub disable_message_signing: bool,
    pub disable_relayer: bool,
}

/// Request to re-run the entire step with adjusted parameters. Not a failure.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySignal {
    pub reason: String,
    pub params: RetryParams,
}

impl fmt::Display for RetrySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)
    }
}

/// Error propagated by tasks, pipelines and executors
#[derive(Error, Debug, Clone)]
pub enum ExecutionError {
    #[error(transparent)]
    Sdk(#[from] SdkError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Step retry requested: {0}")]
    Retry(RetrySignal),
}

impl ExecutionError {
    pub fn retry(reason: impl Into<String>, params: RetryParams) -> Self {
        ExecutionError::Retry(RetrySignal {
            reason: reason.into(),
            params,
        })
    }

    pub fn is_retry_signal(&self) -> bool {
        matches!(self, ExecutionError::Retry(_))
    }

    /// Canonical code if already classified
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ExecutionError::Sdk(e) => Some(e.code),
            ExecutionError::Ledger(_) => Some(ErrorCode::InternalError),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ExecutionError {
    fn from(err: serde_json::Error) -> Self {
        ExecutionError::Sdk(SdkError::internal(format!("Serialization error: {}", err)))
    }
}

/// Result type for execution operations
pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Turn any execution error into its canonical form.
///
/// Already-canonical errors pass through unchanged apart from back-filling the
/// step/action where unset. Raw chain errors go through the family classifier.
/// Retry signals are not errors and are returned untouched.
pub fn classify_error<C>(
    err: ExecutionError,
    step_id: Option<&str>,
    action_type: Option<ActionType>,
    classify_chain: C,
) -> ExecutionError
where
    C: FnOnce(&ChainError) -> SdkError,
{
    match err {
        ExecutionError::Retry(signal) => ExecutionError::Retry(signal),
        ExecutionError::Sdk(e) => ExecutionError::Sdk(e.backfill(step_id, action_type)),
        ExecutionError::Chain(e) => {
            let classified = classify_chain(&e);
            let classified = if classified.cause.is_none() {
                classified.with_cause(e.haystack())
            } else {
                classified
            };
            ExecutionError::Sdk(classified.backfill(step_id, action_type))
        }
        ExecutionError::Ledger(e) => {
            ExecutionError::Sdk(SdkError::internal(e.to_string()).backfill(step_id, action_type))
        }
    }
}
