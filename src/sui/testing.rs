//! Sui fake playing wallet and full node

use super::client::{SuiClient, SuiExecutionStatus, SuiTransactionEffects, SuiWallet};
use super::executor::SuiChain;
use crate::chain::{ChainId, SUI_CHAIN_ID};
use crate::error::ChainError;
use crate::guard::WalletIdentity;
use crate::interaction::ExecutionOptions;
use crate::pipeline::{ExecutionStrategy, StepContext, TaskContext, TaskState};
use crate::step::{Step, TransactionRequest};
use crate::testing::{sample_step, services_for};
use crate::watch::WatcherRegistry;

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

pub(crate) const SUI_WALLET: &str =
    "0xa11ce0000000000000000000000000000000000000000000000000000000b0b";

pub(crate) fn sui_step(id: &str, to_chain: ChainId) -> Step {
    let mut step = sample_step(id, SUI_CHAIN_ID, to_chain);
    step.action.from_address = Some(SUI_WALLET.to_string());
    step.transaction_request = Some(TransactionRequest {
        data: Some("AAACAAgA4fUFAAAAAA==".to_string()),
        ..TransactionRequest::default()
    });
    step
}

pub(crate) struct FakeSui {
    address: String,
    /// Effects polls before the transaction is checkpointed
    checkpoint_after: u32,
    polls: AtomicU32,
    execution_error: Option<String>,
    aborts: bool,
    pub executed: Mutex<Vec<String>>,
}

impl FakeSui {
    pub fn new() -> Self {
        Self {
            address: SUI_WALLET.to_string(),
            checkpoint_after: 1,
            polls: AtomicU32::new(0),
            execution_error: None,
            aborts: false,
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn checkpointed_after(mut self, polls: u32) -> Self {
        self.checkpoint_after = polls;
        self
    }

    pub fn with_address(mut self, address: &str) -> Self {
        self.address = address.to_string();
        self
    }

    pub fn failing_execution(mut self, message: &str) -> Self {
        self.execution_error = Some(message.to_string());
        self
    }

    pub fn aborting(mut self) -> Self {
        self.aborts = true;
        self
    }
}

#[async_trait]
impl WalletIdentity for FakeSui {
    async fn active_chain_id(&self) -> Result<ChainId, ChainError> {
        Ok(SUI_CHAIN_ID)
    }

    async fn active_address(&self) -> Result<String, ChainError> {
        Ok(self.address.clone())
    }
}

#[async_trait]
impl SuiWallet for FakeSui {
    async fn sign_and_execute(&self, transaction: &str) -> Result<String, ChainError> {
        if let Some(message) = &self.execution_error {
            return Err(ChainError::new(message.clone()));
        }
        let mut executed = self.executed.lock().unwrap();
        executed.push(transaction.to_string());
        Ok(format!("digest-{}", executed.len()))
    }
}

#[async_trait]
impl SuiClient for FakeSui {
    async fn transaction_effects(
        &self,
        digest: &str,
    ) -> Result<Option<SuiTransactionEffects>, ChainError> {
        let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.aborts {
            return Ok(Some(SuiTransactionEffects {
                digest: digest.to_string(),
                status: SuiExecutionStatus::Failure,
                error: Some("MoveAbort(swap, 3) in command 1".to_string()),
                checkpoint: Some(10),
            }));
        }
        Ok(Some(SuiTransactionEffects {
            digest: digest.to_string(),
            status: SuiExecutionStatus::Success,
            error: None,
            checkpoint: (polls >= self.checkpoint_after).then_some(10),
        }))
    }
}

pub(crate) fn sui_context(
    step: Step,
    options: ExecutionOptions,
    fake: Arc<FakeSui>,
) -> TaskContext<SuiChain> {
    let step_id = step.id.clone();
    TaskContext::new(
        StepContext::new(services_for(step), &step_id, ExecutionStrategy::Sui, options),
        TaskState::default(),
        SuiChain::new(fake.clone(), fake, Arc::new(WatcherRegistry::new("sui_transaction"))),
    )
}
