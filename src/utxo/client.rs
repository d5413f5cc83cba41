//! Bitcoin wallet and indexer seams

use crate::error::{ChainError, ErrorCode, SdkError};
use crate::guard::WalletIdentity;

use async_trait::async_trait;

/// `psbt` followed by the 0xff separator
const PSBT_MAGIC: [u8; 5] = [0x70, 0x73, 0x62, 0x74, 0xff];

/// Where the indexer sees a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtxoTxStatus {
    NotFound,
    Mempool,
    Confirmed { block_height: u64 },
    /// Evicted by a replace-by-fee transaction spending the same inputs
    Replaced { by: String },
}

#[async_trait]
pub trait UtxoWallet: WalletIdentity {
    /// Sign and finalize a hex PSBT, returning the raw transaction hex
    async fn sign_psbt(&self, psbt: &str) -> Result<String, ChainError>;
}

#[async_trait]
pub trait UtxoClient: Send + Sync {
    async fn block_height(&self) -> Result<u64, ChainError>;

    /// Broadcast a raw transaction, returning its txid
    async fn broadcast(&self, raw_tx: &str) -> Result<String, ChainError>;

    async fn transaction_status(&self, txid: &str) -> Result<UtxoTxStatus, ChainError>;
}

fn unprepared(detail: String) -> SdkError {
    SdkError::new(ErrorCode::TransactionUnprepared, "Unable to prepare transaction.")
        .with_cause(detail)
}

/// Check the quote carries a hex encoded PSBT
pub fn validate_psbt(psbt: &str) -> Result<(), SdkError> {
    let bytes = hex::decode(psbt.trim().trim_start_matches("0x"))
        .map_err(|e| unprepared(format!("PSBT is not hex: {}", e)))?;
    if !bytes.starts_with(&PSBT_MAGIC) {
        return Err(unprepared("missing PSBT magic bytes".to_string()));
    }
    Ok(())
}

/// Check the wallet returned a raw transaction rather than an unfinalized PSBT
pub fn validate_raw_transaction(raw_tx: &str) -> Result<(), SdkError> {
    let bytes =
        hex::decode(raw_tx.trim()).map_err(|e| unprepared(format!("transaction is not hex: {}", e)))?;
    if bytes.starts_with(&PSBT_MAGIC) {
        return Err(unprepared("wallet returned an unfinalized PSBT".to_string()));
    }
    // version + input count + output count + locktime
    if bytes.len() < 10 {
        return Err(unprepared("transaction is truncated".to_string()));
    }
    Ok(())
}
