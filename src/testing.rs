//! Shared fixtures for unit tests

use crate::chain::{
    ChainId, ChainInfo, ChainRegistry, ChainType, BITCOIN_CHAIN_ID, SOLANA_CHAIN_ID, SUI_CHAIN_ID,
};
use crate::config::ExecutorConfig;
use crate::error::{ChainError, ErrorCode, SdkError};
use crate::interaction::{ExecutionOptions, NoInteraction, UserInteraction};
use crate::pipeline::{ChainAdapter, ExecutionServices, ExecutionStrategy, StepContext};
use crate::quote::{MockStepService, StepService};
use crate::state::{RouteRegistry, StatusLedger};
use crate::step::{Estimate, Route, Step, StepAction, StepType, Token};

use std::sync::Arc;

pub(crate) const WALLET: &str = "0x1111111111111111111111111111111111111111";
pub(crate) const SPENDER: &str = "0x2222222222222222222222222222222222222222";
pub(crate) const PERMIT2: &str = "0x000000000022D473030F116dDEE9F6B43aC78BA3";
pub(crate) const PERMIT2_PROXY: &str = "0x3333333333333333333333333333333333333333";

pub(crate) fn token(chain_id: ChainId, address: &str) -> Token {
    Token {
        address: address.to_string(),
        chain_id,
        symbol: "USDC".to_string(),
        decimals: 6,
        name: None,
    }
}

pub(crate) fn sample_step(id: &str, from_chain: ChainId, to_chain: ChainId) -> Step {
    Step {
        id: id.to_string(),
        step_type: StepType::Lifi,
        tool: "stargate".to_string(),
        action: StepAction {
            from_chain_id: from_chain,
            to_chain_id: to_chain,
            from_token: token(from_chain, "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174"),
            to_token: token(to_chain, "0x0b2C639c533813f4Aa9D7837CAf62653d097Ff85"),
            from_amount: "100".to_string(),
            from_address: Some(WALLET.to_string()),
            to_address: Some(WALLET.to_string()),
            slippage: Some(0.005),
        },
        estimate: Estimate {
            approval_address: Some(SPENDER.to_string()),
            from_amount: "100".to_string(),
            to_amount: "99".to_string(),
            to_amount_min: "98".to_string(),
            execution_duration: 60.0,
        },
        transaction_request: None,
        typed_data: Vec::new(),
        execution: None,
    }
}

pub(crate) fn route_for(step: Step) -> Route {
    Route {
        id: format!("route-{}", step.id),
        from_chain_id: step.action.from_chain_id,
        to_chain_id: step.action.to_chain_id,
        from_address: step.action.from_address.clone(),
        to_address: step.action.to_address.clone(),
        steps: vec![step],
    }
}

pub(crate) fn ledger_with(step: Step) -> StatusLedger {
    let registry = Arc::new(RouteRegistry::new());
    registry.insert(route_for(step));
    StatusLedger::new(registry)
}

pub(crate) fn chain_registry() -> ChainRegistry {
    let registry = ChainRegistry::new();
    for (id, key) in [(1, "eth"), (10, "opt"), (137, "pol")] {
        let mut info = ChainInfo::new(id, key, ChainType::Evm);
        info.explorer_url = Some(format!("https://explorer.{}.example", key));
        info.permit2 = Some(PERMIT2.to_string());
        info.permit2_proxy = Some(PERMIT2_PROXY.to_string());
        info.relayer_supported = true;
        registry.insert(info);
    }
    for (id, key, chain_type) in [
        (SOLANA_CHAIN_ID, "sol", ChainType::Svm),
        (SUI_CHAIN_ID, "sui", ChainType::Mvm),
        (BITCOIN_CHAIN_ID, "btc", ChainType::Utxo),
    ] {
        let mut info = ChainInfo::new(id, key, chain_type);
        info.explorer_url = Some(format!("https://explorer.{}.example", key));
        registry.insert(info);
    }
    registry
}

pub(crate) fn fast_settings() -> ExecutorConfig {
    ExecutorConfig {
        poll_interval_ms: 1,
        max_retries: 3,
        receipt_timeout_secs: 5,
        destination_poll_interval_ms: 1,
        destination_timeout_secs: 5,
        gas_limit_buffer_percent: 20,
    }
}

pub(crate) fn services_with(
    step: Step,
    quotes: MockStepService,
    interaction: Arc<dyn UserInteraction>,
) -> Arc<ExecutionServices> {
    let quotes: Arc<dyn StepService> = Arc::new(quotes);
    Arc::new(ExecutionServices::new(
        Arc::new(ledger_with(step)),
        Arc::new(chain_registry()),
        quotes,
        interaction,
        fast_settings(),
    ))
}

pub(crate) fn services_for(step: Step) -> Arc<ExecutionServices> {
    services_with(step, MockStepService::new(), Arc::new(NoInteraction))
}

pub(crate) fn step_context(
    services: Arc<ExecutionServices>,
    step_id: &str,
    strategy: ExecutionStrategy,
    options: ExecutionOptions,
) -> StepContext {
    StepContext::new(services, step_id, strategy, options)
}

/// Chain adapter whose classifier only knows user rejections
pub(crate) struct TestChain;

impl ChainAdapter for TestChain {
    fn chain_type(&self) -> ChainType {
        ChainType::Evm
    }

    fn classify(&self, err: &ChainError) -> SdkError {
        if err.message.contains("rejected") {
            SdkError::new(ErrorCode::SignatureRejected, "User rejected the request.")
        } else {
            SdkError::new(ErrorCode::UnknownError, err.message.clone())
        }
    }
}
