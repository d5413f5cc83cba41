//! EVM pipeline tasks
//!
//! | task | action |
//! |---|---|
//! | [`CheckChainTask`] | `SWITCH_CHAIN` |
//! | [`AllowanceTask`] | `TOKEN_ALLOWANCE` / `PERMIT` |
//! | [`SendTransactionTask`] | `SWAP` / `CROSS_CHAIN` |
//! | [`BatchTransactionTask`] | `SWAP` / `CROSS_CHAIN` |
//! | [`RelayedTransactionTask`] | `SWAP` / `CROSS_CHAIN` |

mod allowance;
mod batch;
mod chain;
mod relayer;
mod transaction;

pub use allowance::AllowanceTask;
pub use batch::BatchTransactionTask;
pub use chain::CheckChainTask;
pub use relayer::RelayedTransactionTask;
pub use transaction::SendTransactionTask;

use super::adapter::{format_hash, EvmChain};
use super::watch::{ReceiptOutcome, WatchParams};
use crate::chain::{ChainId, ChainType};
use crate::error::ExecutionResult;
use crate::guard::ensure_same_wallet;
use crate::pipeline::TaskContext;
use crate::step::{ActionType, TransactionKind};

use ethers::types::H256;
use tracing::info;

pub(crate) fn watch_params(ctx: &TaskContext<EvmChain>) -> WatchParams {
    WatchParams::from(ctx.step.settings())
}

/// Wait for `hash` and judge the receipt. A transaction that replaced it is
/// written to the ledger first, so a cancelled or reverted replacement still
/// leaves its own hash on the action.
pub(crate) async fn confirm_action(
    ctx: &TaskContext<EvmChain>,
    action_type: Option<ActionType>,
    kind: TransactionKind,
    chain_id: ChainId,
    hash: H256,
) -> ExecutionResult<ReceiptOutcome> {
    let outcome = ctx.chain.watch(hash, watch_params(ctx)).await?;

    if let Some(reason) = outcome.replaced {
        let replacement = format_hash(outcome.tx_hash);
        info!(
            "Step {} transaction {:?} {:?} by {}",
            ctx.step_id(),
            hash,
            reason,
            replacement
        );
        ctx.step
            .record_transaction(kind, chain_id, Some(&replacement), None)?;
        if let Some(action_type) = action_type {
            if let Some(action) = ctx.step.action(action_type)?.filter(|a| a.is_live()) {
                ctx.step.update_action(
                    action_type,
                    action.status,
                    ctx.step.tx_patch(chain_id, &replacement),
                )?;
            }
        }
    }

    outcome.check()?;
    Ok(outcome)
}

/// The connected wallet must still be the one the quote was made for
pub(crate) async fn ensure_quoted_wallet(ctx: &TaskContext<EvmChain>) -> ExecutionResult<()> {
    let step = ctx.step.step()?;
    ensure_same_wallet(
        ctx.chain.wallet.as_ref(),
        step.action.from_address.as_deref(),
        ChainType::Evm,
    )
    .await
}
