//! User-interaction layer supplied by the consumer, and per-call execution options

use crate::chain::ChainId;
use crate::error::RetryParams;
use crate::evm::EvmWallet;
use crate::step::TransactionRequest;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Options controlling one `execute_step` invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutionOptions {
    /// When false, anything needing the user (signature, chain switch) pauses the step
    pub allow_user_interaction: bool,
    pub disable_message_signing: bool,
    /// Approve `U256::MAX` instead of the exact amount
    pub infinite_approval: bool,
    /// Prefer gasless relayed execution when the chain supports it
    pub use_relayer: bool,
    pub disable_atomic_batch: bool,
    pub use_jito_bundle: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            allow_user_interaction: true,
            disable_message_signing: false,
            infinite_approval: false,
            use_relayer: false,
            disable_atomic_batch: false,
            use_jito_bundle: false,
        }
    }
}

impl ExecutionOptions {
    pub fn non_interactive() -> Self {
        Self {
            allow_user_interaction: false,
            ..Self::default()
        }
    }

    /// Fold the parameters of a step-retry request into the options
    pub fn apply_retry(&mut self, params: &RetryParams) {
        self.disable_atomic_batch |= params.disable_atomic_batch;
        self.disable_message_signing |= params.disable_message_signing;
        if params.disable_relayer {
            self.use_relayer = false;
        }
    }
}

/// Callbacks into the UI layer. Every method has a conservative default so a
/// headless consumer only overrides what it supports.
#[async_trait]
pub trait UserInteraction: Send + Sync {
    /// Ask the user to move the wallet to `chain_id`; `None` means declined
    async fn switch_chain(&self, _chain_id: ChainId) -> Option<Arc<dyn EvmWallet>> {
        None
    }

    /// Ask the user to accept a worse quote after a refresh
    async fn accept_exchange_rate_update(&self, _old_to_amount: &str, _new_to_amount: &str) -> bool {
        false
    }

    /// Last chance to rewrite gas parameters before an EVM submission
    async fn update_transaction_request(&self, request: TransactionRequest) -> TransactionRequest {
        request
    }
}

/// Consumer without any UI: declines everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInteraction;

impl UserInteraction for NoInteraction {}
