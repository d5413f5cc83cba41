//! Execution-side data: the per-step execution record, its actions and the
//! action status state machine
//!
//! ```text
//!   STARTED ──▶ RESET_REQUIRED ──▶ ACTION_REQUIRED ──▶ PENDING ──▶ DONE
//!      │               │          (MESSAGE_REQUIRED)      │
//!      └───────────────┴───────────────┴──────────────────┴──▶ FAILED
//! ```
//!
//! Transitions never move to a lower rank and nothing leaves DONE or FAILED.

use super::model::{SignedTypedData, Token};
use crate::chain::ChainId;
use crate::error::{ErrorCode, SdkError};
use crate::pipeline::ExecutionStrategy;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Named sub-operation of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    SwitchChain,
    TokenAllowance,
    Permit,
    Swap,
    CrossChain,
    ReceivingChain,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::SwitchChain => "SWITCH_CHAIN",
            ActionType::TokenAllowance => "TOKEN_ALLOWANCE",
            ActionType::Permit => "PERMIT",
            ActionType::Swap => "SWAP",
            ActionType::CrossChain => "CROSS_CHAIN",
            ActionType::ReceivingChain => "RECEIVING_CHAIN",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Started,
    ResetRequired,
    ActionRequired,
    MessageRequired,
    Pending,
    Done,
    Failed,
}

impl ActionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionStatus::Started => "STARTED",
            ActionStatus::ResetRequired => "RESET_REQUIRED",
            ActionStatus::ActionRequired => "ACTION_REQUIRED",
            ActionStatus::MessageRequired => "MESSAGE_REQUIRED",
            ActionStatus::Pending => "PENDING",
            ActionStatus::Done => "DONE",
            ActionStatus::Failed => "FAILED",
        }
    }

    fn rank(self) -> u8 {
        match self {
            ActionStatus::Started => 0,
            ActionStatus::ResetRequired => 1,
            ActionStatus::ActionRequired | ActionStatus::MessageRequired => 2,
            ActionStatus::Pending => 3,
            ActionStatus::Done | ActionStatus::Failed => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ActionStatus::Done | ActionStatus::Failed)
    }

    /// Waiting on the user (signature, approval, reset)
    pub fn awaits_user(self) -> bool {
        matches!(
            self,
            ActionStatus::ResetRequired | ActionStatus::ActionRequired | ActionStatus::MessageRequired
        )
    }

    pub fn can_transition_to(self, next: ActionStatus) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Default progress message for an action in a given status
pub fn default_message(action_type: ActionType, status: ActionStatus) -> Option<&'static str> {
    use ActionStatus::*;
    use ActionType::*;

    let message = match (action_type, status) {
        (SwitchChain, ActionRequired) => "Chain switch required.",
        (SwitchChain, Done) => "Chain switched successfully.",
        (TokenAllowance, Started) => "Setting token allowance.",
        (TokenAllowance, ResetRequired) => "Resetting token allowance.",
        (TokenAllowance, ActionRequired) => "Set token allowance.",
        (TokenAllowance, Pending) => "Waiting for token allowance.",
        (TokenAllowance, Done) => "Token allowance set.",
        (Permit, Started) => "Preparing transaction.",
        (Permit, MessageRequired) | (Permit, ActionRequired) => "Sign permit message.",
        (Permit, Done) => "Permit message signed.",
        (Swap, Started) => "Preparing swap transaction.",
        (Swap, ActionRequired) => "Please sign the transaction.",
        (Swap, MessageRequired) => "Please sign the message.",
        (Swap, Pending) => "Waiting for swap transaction.",
        (Swap, Done) => "Swap completed.",
        (CrossChain, Started) => "Preparing bridge transaction.",
        (CrossChain, ActionRequired) => "Please sign the transaction.",
        (CrossChain, MessageRequired) => "Please sign the message.",
        (CrossChain, Pending) => "Waiting for bridge transaction.",
        (CrossChain, Done) => "Bridge transaction confirmed.",
        (ReceivingChain, Pending) => "Waiting for destination chain.",
        (ReceivingChain, Done) => "Bridge completed.",
        (_, Failed) => "Transaction failed.",
        _ => return None,
    };
    Some(message)
}

/// Error recorded on a failed action or execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionError {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&SdkError> for ActionError {
    fn from(err: &SdkError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
        }
    }
}

/// One named sub-operation of a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub status: ActionStatus,
    pub chain_id: ChainId,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_link: Option<String>,
    /// Relayer task id or wallet batch id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signed_typed_data: Vec<SignedTypedData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub substatus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionError>,
}

impl Action {
    pub fn new(action_type: ActionType, chain_id: ChainId) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            action_type,
            status: ActionStatus::Started,
            chain_id,
            started_at: now,
            updated_at: now,
            done_at: None,
            message: default_message(action_type, ActionStatus::Started).map(str::to_string),
            tx_hash: None,
            tx_link: None,
            task_id: None,
            signed_typed_data: Vec::new(),
            substatus: None,
            error: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.status == ActionStatus::Done
    }

    pub fn is_live(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Partial update merged into an action
#[derive(Debug, Clone, Default)]
pub struct ActionPatch {
    pub message: Option<String>,
    pub tx_hash: Option<String>,
    pub tx_link: Option<String>,
    pub task_id: Option<String>,
    pub signed_typed_data: Option<Vec<SignedTypedData>>,
    pub substatus: Option<String>,
    pub error: Option<ActionError>,
}

impl ActionPatch {
    pub fn tx(tx_hash: impl Into<String>, tx_link: Option<String>) -> Self {
        Self {
            tx_hash: Some(tx_hash.into()),
            tx_link,
            ..Self::default()
        }
    }

    pub fn task(task_id: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id.into()),
            ..Self::default()
        }
    }

    pub fn signed(data: Vec<SignedTypedData>) -> Self {
        Self {
            signed_typed_data: Some(data),
            ..Self::default()
        }
    }

    pub fn failed(err: &SdkError) -> Self {
        Self {
            message: Some(err.message.clone()),
            error: Some(ActionError::from(err)),
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_substatus(mut self, substatus: impl Into<String>) -> Self {
        self.substatus = Some(substatus.into());
        self
    }

    pub(crate) fn apply(self, action: &mut Action) {
        if let Some(message) = self.message {
            action.message = Some(message);
        }
        if let Some(tx_hash) = self.tx_hash {
            action.tx_hash = Some(tx_hash);
        }
        if let Some(tx_link) = self.tx_link {
            action.tx_link = Some(tx_link);
        }
        if let Some(task_id) = self.task_id {
            action.task_id = Some(task_id);
        }
        if let Some(signed) = self.signed_typed_data {
            action.signed_typed_data = signed;
        }
        if let Some(substatus) = self.substatus {
            action.substatus = Some(substatus);
        }
        if let Some(error) = self.error {
            action.error = Some(error);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    ActionRequired,
    Done,
    Failed,
}

impl ExecutionStatus {
    pub fn is_done(self) -> bool {
        self == ExecutionStatus::Done
    }
}

/// Semantic kind of an on-chain submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Reset,
    Approval,
    Swap,
    CrossChain,
    Receiving,
    Batch,
    Relayed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub kind: TransactionKind,
    pub chain_id: ChainId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

/// Resumable pause point: which task to re-enter and the task state to restore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub strategy: ExecutionStrategy,
    pub task_index: usize,
    pub context: serde_json::Value,
    pub saved_at: DateTime<Utc>,
}

/// Aggregate status of a step's on-chain lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub transactions: Vec<TransactionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_token: Option<Token>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Checkpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionError>,
}

impl Execution {
    pub fn new() -> Self {
        Self {
            status: ExecutionStatus::Pending,
            started_at: Utc::now(),
            done_at: None,
            actions: Vec::new(),
            transactions: Vec::new(),
            from_amount: None,
            to_amount: None,
            to_token: None,
            checkpoint: None,
            error: None,
        }
    }

    pub fn action(&self, action_type: ActionType) -> Option<&Action> {
        self.actions.iter().find(|a| a.action_type == action_type)
    }

    pub fn action_mut(&mut self, action_type: ActionType) -> Option<&mut Action> {
        self.actions.iter_mut().find(|a| a.action_type == action_type)
    }

    /// Insert or replace the record of the same kind
    pub fn upsert_transaction(&mut self, record: TransactionRecord) {
        match self.transactions.iter_mut().find(|t| t.kind == record.kind) {
            Some(existing) => *existing = record,
            None => self.transactions.push(record),
        }
    }

    pub fn transaction(&self, kind: TransactionKind) -> Option<&TransactionRecord> {
        self.transactions.iter().find(|t| t.kind == kind)
    }

    /// Signed permits usable for the given chain at `now_unix`
    pub fn valid_permits(&self, chain_id: ChainId, now_unix: i64) -> Vec<&SignedTypedData> {
        self.actions
            .iter()
            .flat_map(|a| a.signed_typed_data.iter())
            .filter(|s| s.is_permit() && s.chain_id == chain_id && !s.is_expired(now_unix))
            .collect()
    }

    /// Drop failed actions and the error so a new attempt can start cleanly
    pub fn prepare_restart(&mut self) {
        self.actions.retain(|a| a.status != ActionStatus::Failed);
        self.error = None;
        self.done_at = None;
        self.status = ExecutionStatus::Pending;
    }
}

impl Default for Execution {
    fn default() -> Self {
        Self::new()
    }
}

/// Partial update merged into an execution
#[derive(Debug, Clone, Default)]
pub struct ExecutionPatch {
    pub status: Option<ExecutionStatus>,
    pub from_amount: Option<String>,
    pub to_amount: Option<String>,
    pub to_token: Option<Token>,
    pub transaction: Option<TransactionRecord>,
    /// `Some(None)` clears the checkpoint
    pub checkpoint: Option<Option<Checkpoint>>,
    pub error: Option<ActionError>,
}

impl ExecutionPatch {
    pub fn status(status: ExecutionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn transaction(record: TransactionRecord) -> Self {
        Self {
            transaction: Some(record),
            ..Self::default()
        }
    }

    pub(crate) fn apply(self, execution: &mut Execution) {
        if let Some(status) = self.status {
            execution.status = status;
            if status == ExecutionStatus::Done {
                execution.done_at = Some(Utc::now());
            }
        }
        if let Some(from_amount) = self.from_amount {
            execution.from_amount = Some(from_amount);
        }
        if let Some(to_amount) = self.to_amount {
            execution.to_amount = Some(to_amount);
        }
        if let Some(to_token) = self.to_token {
            execution.to_token = Some(to_token);
        }
        if let Some(record) = self.transaction {
            execution.upsert_transaction(record);
        }
        if let Some(checkpoint) = self.checkpoint {
            execution.checkpoint = checkpoint;
        }
        if let Some(error) = self.error {
            execution.error = Some(error);
        }
    }
}
