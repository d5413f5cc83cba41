//! Sui wallet and full-node seams

use crate::error::{ChainError, ErrorCode, SdkError};
use crate::guard::WalletIdentity;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuiExecutionStatus {
    Success,
    Failure,
}

/// Effects of an executed transaction block
#[derive(Debug, Clone, PartialEq)]
pub struct SuiTransactionEffects {
    pub digest: String,
    pub status: SuiExecutionStatus,
    pub error: Option<String>,
    /// Checkpoint the transaction was included in; `None` until certified
    pub checkpoint: Option<u64>,
}

#[async_trait]
pub trait SuiWallet: WalletIdentity {
    /// Sign and execute a base64 transaction block, returning its digest
    async fn sign_and_execute(&self, transaction: &str) -> Result<String, ChainError>;
}

#[async_trait]
pub trait SuiClient: Send + Sync {
    /// `None` while the full node has not indexed the digest
    async fn transaction_effects(
        &self,
        digest: &str,
    ) -> Result<Option<SuiTransactionEffects>, ChainError>;
}

/// Check the step carries a decodable transaction block
pub fn validate_transaction_block(data: &str) -> Result<(), SdkError> {
    match STANDARD.decode(data.trim()) {
        Ok(bytes) if !bytes.is_empty() => Ok(()),
        Ok(_) => Err(SdkError::new(
            ErrorCode::TransactionUnprepared,
            "Unable to prepare transaction.",
        )
        .with_cause("empty transaction block")),
        Err(e) => Err(SdkError::new(
            ErrorCode::TransactionUnprepared,
            "Unable to prepare transaction.",
        )
        .with_cause(format!("invalid base64: {}", e))),
    }
}
