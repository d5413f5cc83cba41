//! Solana fakes: one object playing wallet, RPC node and block engine

use super::adapter::SolanaChain;
use super::client::{BundleState, BundleStatus, Commitment, JitoClient, SignatureStatus, SolanaRpc, SolanaWallet};
use super::watch::SolanaWatchers;
use crate::chain::{ChainId, SOLANA_CHAIN_ID};
use crate::error::ChainError;
use crate::guard::WalletIdentity;
use crate::interaction::ExecutionOptions;
use crate::pipeline::{ExecutionServices, ExecutionStrategy, StepContext, TaskContext, TaskState};
use crate::step::{Step, TransactionRequest};
use crate::testing::sample_step;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub(crate) const SOL_WALLET: &str = "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU";

/// One required signature, an empty signature slot and a short message
pub(crate) fn solana_transaction() -> String {
    let mut raw = vec![1u8];
    raw.extend([0u8; 64]);
    raw.extend([0x80, 0x01, 0x00, 0x03]);
    STANDARD.encode(raw)
}

pub(crate) fn solana_step(id: &str, to_chain: ChainId) -> Step {
    let mut step = sample_step(id, SOLANA_CHAIN_ID, to_chain);
    step.action.from_address = Some(SOL_WALLET.to_string());
    step.transaction_request = Some(TransactionRequest {
        data: Some(solana_transaction()),
        ..TransactionRequest::default()
    });
    step
}

pub(crate) struct FakeSolana {
    pub address: String,
    height: AtomicU64,
    /// Status polls before the signature reports confirmed
    confirm_after: u32,
    polls: AtomicU32,
    failure: Option<String>,
    reject_signing: bool,
    bundle_state: BundleState,
    pub signed: Mutex<Vec<String>>,
    pub sent: Mutex<Vec<String>>,
    pub bundles: Mutex<Vec<Vec<String>>>,
}

impl FakeSolana {
    pub fn new() -> Self {
        Self {
            address: SOL_WALLET.to_string(),
            height: AtomicU64::new(100),
            confirm_after: 1,
            polls: AtomicU32::new(0),
            failure: None,
            reject_signing: false,
            bundle_state: BundleState::Landed,
            signed: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            bundles: Mutex::new(Vec::new()),
        }
    }

    pub fn confirming_after(mut self, polls: u32) -> Self {
        self.confirm_after = polls;
        self
    }

    pub fn never_confirming(mut self) -> Self {
        self.confirm_after = u32::MAX;
        self
    }

    pub fn failing_with(mut self, err: &str) -> Self {
        self.failure = Some(err.to_string());
        self
    }

    pub fn rejecting_signatures(mut self) -> Self {
        self.reject_signing = true;
        self
    }

    pub fn with_bundle_state(mut self, state: BundleState) -> Self {
        self.bundle_state = state;
        self
    }

    pub fn with_address(mut self, address: &str) -> Self {
        self.address = address.to_string();
        self
    }

    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }
}

#[async_trait]
impl WalletIdentity for FakeSolana {
    async fn active_chain_id(&self) -> Result<ChainId, ChainError> {
        Ok(SOLANA_CHAIN_ID)
    }

    async fn active_address(&self) -> Result<String, ChainError> {
        Ok(self.address.clone())
    }
}

#[async_trait]
impl SolanaWallet for FakeSolana {
    async fn sign_transaction(&self, transaction: &str) -> Result<String, ChainError> {
        if self.reject_signing {
            return Err(ChainError::new("User rejected the request.")
                .with_name("WalletSignTransactionError"));
        }
        self.signed.lock().unwrap().push(transaction.to_string());
        Ok(transaction.to_string())
    }
}

#[async_trait]
impl SolanaRpc for FakeSolana {
    async fn block_height(&self) -> Result<u64, ChainError> {
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn send_transaction(&self, signed: &str) -> Result<String, ChainError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push(signed.to_string());
        Ok(format!("sig-{}", sent.len()))
    }

    async fn signature_status(
        &self,
        _signature: &str,
    ) -> Result<Option<SignatureStatus>, ChainError> {
        let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(err) = &self.failure {
            return Ok(Some(SignatureStatus {
                slot: 1,
                confirmation: Some(Commitment::Confirmed),
                err: Some(err.clone()),
            }));
        }
        if polls < self.confirm_after {
            return Ok(None);
        }
        Ok(Some(SignatureStatus {
            slot: 1,
            confirmation: Some(Commitment::Confirmed),
            err: None,
        }))
    }
}

#[async_trait]
impl JitoClient for FakeSolana {
    async fn send_bundle(&self, signed: &[String]) -> Result<String, ChainError> {
        let mut bundles = self.bundles.lock().unwrap();
        bundles.push(signed.to_vec());
        Ok(format!("bundle-{}", bundles.len()))
    }

    async fn bundle_status(&self, _bundle_id: &str) -> Result<BundleStatus, ChainError> {
        let signatures = match self.bundle_state {
            BundleState::Landed => vec!["bundle-sig-1".to_string()],
            _ => Vec::new(),
        };
        Ok(BundleStatus {
            state: self.bundle_state,
            signatures,
            error: None,
        })
    }
}

pub(crate) fn solana_chain(fake: Arc<FakeSolana>, with_jito: bool) -> SolanaChain {
    let jito: Option<Arc<dyn JitoClient>> = if with_jito { Some(fake.clone()) } else { None };
    SolanaChain::new(fake.clone(), fake, jito, Arc::new(SolanaWatchers::new()))
}

pub(crate) fn solana_context(
    services: Arc<ExecutionServices>,
    step_id: &str,
    strategy: ExecutionStrategy,
    options: ExecutionOptions,
    fake: Arc<FakeSolana>,
) -> TaskContext<SolanaChain> {
    TaskContext::new(
        StepContext::new(services, step_id, strategy, options),
        TaskState::default(),
        solana_chain(fake, strategy == ExecutionStrategy::SolanaJito),
    )
}
