//! Chain-switch and wallet-identity guard
//!
//! Runs before any mutating wallet call:
//! - the wallet must be on the step's chain (switching via the user when allowed)
//! - the wallet must still be the address the quote was requested for

use crate::chain::{ChainId, ChainType};
use crate::error::{ChainError, ErrorCode, ExecutionResult, SdkError};

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// What the guard needs to know about a connected wallet
#[async_trait]
pub trait WalletIdentity: Send + Sync {
    async fn active_chain_id(&self) -> Result<ChainId, ChainError>;

    async fn active_address(&self) -> Result<String, ChainError>;
}

/// Make sure `wallet` is on `required_chain`.
///
/// Returns the wallet unchanged when already there, `None` when a switch is
/// needed but user interaction is disallowed (the caller pauses), or the
/// switched wallet returned by `switch`.
pub async fn switch_chain_if_needed<W, F, Fut>(
    wallet: Arc<W>,
    required_chain: ChainId,
    allow_interaction: bool,
    switch: F,
) -> ExecutionResult<Option<Arc<W>>>
where
    W: WalletIdentity + ?Sized,
    F: FnOnce(ChainId) -> Fut,
    Fut: Future<Output = Option<Arc<W>>>,
{
    let current = wallet.active_chain_id().await?;
    if current == required_chain {
        return Ok(Some(wallet));
    }

    if !allow_interaction {
        info!(
            "Wallet on chain {} but step needs {}; waiting for user",
            current, required_chain
        );
        return Ok(None);
    }

    info!("Requesting chain switch {} -> {}", current, required_chain);
    let switched = switch(required_chain).await.ok_or_else(|| {
        SdkError::new(ErrorCode::ChainSwitchError, "Chain switch was declined.")
    })?;

    let now = switched.active_chain_id().await?;
    if now != required_chain {
        warn!("Wallet still on chain {} after switching to {}", now, required_chain);
        return Err(SdkError::new(
            ErrorCode::ChainSwitchError,
            format!("Chain switch required: wallet is on {} instead of {}.", now, required_chain),
        )
        .into());
    }

    Ok(Some(switched))
}

/// Fail with `WalletChangedDuringExecution` unless the wallet is still `expected`
pub async fn ensure_same_wallet<W>(
    wallet: &W,
    expected: Option<&str>,
    chain_type: ChainType,
) -> ExecutionResult<()>
where
    W: WalletIdentity + ?Sized,
{
    let Some(expected) = expected else {
        return Ok(());
    };

    let actual = wallet.active_address().await?;
    if !same_address(&actual, expected, chain_type) {
        warn!("Wallet changed during execution: {} != {}", actual, expected);
        return Err(SdkError::new(
            ErrorCode::WalletChangedDuringExecution,
            "The wallet address that requested the quote does not match the wallet address attempting to sign the transaction.",
        )
        .into());
    }

    Ok(())
}

pub fn same_address(a: &str, b: &str, chain_type: ChainType) -> bool {
    if chain_type.case_insensitive_addresses() {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug)]
    struct FixedWallet {
        chain_id: ChainId,
        address: String,
    }

    #[async_trait]
    impl WalletIdentity for FixedWallet {
        async fn active_chain_id(&self) -> Result<ChainId, ChainError> {
            Ok(self.chain_id)
        }

        async fn active_address(&self) -> Result<String, ChainError> {
            Ok(self.address.clone())
        }
    }

    fn wallet_on(chain_id: ChainId) -> Arc<FixedWallet> {
        Arc::new(FixedWallet {
            chain_id,
            address: "0xAbC0000000000000000000000000000000000001".to_string(),
        })
    }

    #[tokio::test]
    async fn test_no_interaction_returns_no_handle_without_switching() {
        let called = AtomicBool::new(false);
        let result = switch_chain_if_needed(wallet_on(10), 137, false, |_| {
            called.store(true, Ordering::SeqCst);
            async { Some(wallet_on(137)) }
        })
        .await
        .unwrap();

        assert!(result.is_none());
        assert!(!called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_same_chain_is_a_no_op() {
        let result = switch_chain_if_needed(wallet_on(137), 137, true, |_| async { None })
            .await
            .unwrap();
        assert_eq!(result.map(|w| w.chain_id), Some(137));
    }

    #[tokio::test]
    async fn test_switch_that_does_not_land_on_target_fails() {
        let err = switch_chain_if_needed(wallet_on(10), 137, true, |_| async {
            Some(wallet_on(10))
        })
        .await
        .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ChainSwitchError));

        let switched = switch_chain_if_needed(wallet_on(10), 137, true, |target| async move {
            Some(wallet_on(target))
        })
        .await
        .unwrap();
        assert_eq!(switched.map(|w| w.chain_id), Some(137));
    }

    #[tokio::test]
    async fn test_wallet_identity_check() {
        let wallet = wallet_on(1);
        ensure_same_wallet(
            wallet.as_ref(),
            Some("0xabc0000000000000000000000000000000000001"),
            ChainType::Evm,
        )
        .await
        .unwrap();

        let err = ensure_same_wallet(
            wallet.as_ref(),
            Some("0xdef0000000000000000000000000000000000002"),
            ChainType::Evm,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::WalletChangedDuringExecution));

        assert!(!same_address("AbC", "abc", ChainType::Svm));
    }
}
