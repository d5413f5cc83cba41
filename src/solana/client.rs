//! Solana wallet, RPC and Jito block-engine seams

use crate::error::{ChainError, ErrorCode, SdkError};
use crate::guard::WalletIdentity;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Size of one ed25519 signature in a serialized transaction
const SIGNATURE_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    Confirmed,
    Finalized,
}

/// `getSignatureStatuses` entry of one signature
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureStatus {
    pub slot: u64,
    pub confirmation: Option<Commitment>,
    /// Set when the transaction landed but an instruction failed
    pub err: Option<String>,
}

impl SignatureStatus {
    pub fn is_confirmed(&self) -> bool {
        matches!(
            self.confirmation,
            Some(Commitment::Confirmed) | Some(Commitment::Finalized)
        )
    }
}

#[async_trait]
pub trait SolanaWallet: WalletIdentity {
    /// Sign a base64 serialized transaction and return it re-serialized
    async fn sign_transaction(&self, transaction: &str) -> Result<String, ChainError>;
}

#[async_trait]
pub trait SolanaRpc: Send + Sync {
    async fn block_height(&self) -> Result<u64, ChainError>;

    /// Submit a signed base64 transaction, returning its signature
    async fn send_transaction(&self, signed: &str) -> Result<String, ChainError>;

    async fn signature_status(&self, signature: &str)
        -> Result<Option<SignatureStatus>, ChainError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleState {
    Pending,
    Landed,
    Failed,
    Invalid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BundleStatus {
    pub state: BundleState,
    /// Signatures of the bundled transactions, in bundle order
    pub signatures: Vec<String>,
    pub error: Option<String>,
}

#[async_trait]
pub trait JitoClient: Send + Sync {
    /// Submit signed base64 transactions as one bundle, returning the bundle id
    async fn send_bundle(&self, signed: &[String]) -> Result<String, ChainError>;

    async fn bundle_status(&self, bundle_id: &str) -> Result<BundleStatus, ChainError>;
}

/// Read a compact-u16 length prefix, returning the value and its width
fn compact_u16(bytes: &[u8]) -> Option<(usize, usize)> {
    let mut value = 0usize;
    for (i, byte) in bytes.iter().take(3).enumerate() {
        value |= ((byte & 0x7f) as usize) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

/// Decode a base64 serialized transaction and check its signature section
pub fn decode_transaction(data: &str) -> Result<Vec<u8>, SdkError> {
    let unprepared = |detail: &str| {
        SdkError::new(ErrorCode::TransactionUnprepared, "Unable to prepare transaction.")
            .with_cause(detail.to_string())
    };

    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| unprepared(&format!("invalid base64: {}", e)))?;
    let (signatures, width) =
        compact_u16(&bytes).ok_or_else(|| unprepared("truncated signature count"))?;
    if signatures == 0 {
        return Err(unprepared("transaction requires no signatures"));
    }
    if bytes.len() <= width + signatures * SIGNATURE_LEN {
        return Err(unprepared("transaction has no message"));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_u16() {
        assert_eq!(compact_u16(&[0x01]), Some((1, 1)));
        assert_eq!(compact_u16(&[0x80, 0x01]), Some((128, 2)));
        assert_eq!(compact_u16(&[0xff, 0xff, 0x03]), Some((0xffff, 3)));
        assert_eq!(compact_u16(&[0x80]), None);
    }

    #[test]
    fn test_decode_transaction() {
        let mut raw = vec![1u8];
        raw.extend([0u8; 64]);
        raw.extend([0x80, 0x01, 0x00]);
        assert_eq!(decode_transaction(&STANDARD.encode(&raw)).unwrap(), raw);

        let err = decode_transaction("not base64!").unwrap_err();
        assert_eq!(err.code, ErrorCode::TransactionUnprepared);

        let unsigned = STANDARD.encode([0u8, 1, 2, 3]);
        assert!(decode_transaction(&unsigned).is_err());

        let no_message = STANDARD.encode([1u8; 65]);
        assert!(decode_transaction(&no_message).is_err());
    }
}
