//! Status ledger: the only writer of step executions and their actions
//!
//! All mutations are synchronous, touch only the in-memory route registry and
//! finish by invoking the route-update hook with a snapshot of the route.

use crate::chain::ChainId;
use crate::error::LedgerError;
use crate::step::{
    default_message, Action, ActionPatch, ActionStatus, ActionType, Execution, ExecutionPatch,
    ExecutionStatus, Route, Step,
};

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Callback notified after every ledger mutation
pub type RouteUpdateHook = Arc<dyn Fn(&Route) + Send + Sync>;

/// Caller-supplied registry of routes being executed
#[derive(Debug, Default)]
pub struct RouteRegistry {
    routes: DashMap<String, Route>,
    /// step id -> route id
    step_index: DashMap<String, String>,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, route: Route) {
        for step in &route.steps {
            self.step_index.insert(step.id.clone(), route.id.clone());
        }
        self.routes.insert(route.id.clone(), route);
    }

    pub fn remove(&self, route_id: &str) -> Option<Route> {
        let (_, route) = self.routes.remove(route_id)?;
        for step in &route.steps {
            self.step_index.remove(&step.id);
        }
        Some(route)
    }

    pub fn route(&self, route_id: &str) -> Option<Route> {
        self.routes.get(route_id).map(|r| r.clone())
    }

    pub fn route_id_for_step(&self, step_id: &str) -> Option<String> {
        self.step_index.get(step_id).map(|r| r.clone())
    }

    pub fn step(&self, step_id: &str) -> Option<Step> {
        let route_id = self.route_id_for_step(step_id)?;
        let route = self.routes.get(&route_id)?;
        route.step(step_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Append/patch store for step executions
pub struct StatusLedger {
    registry: Arc<RouteRegistry>,
    hook: Option<RouteUpdateHook>,
}

impl StatusLedger {
    pub fn new(registry: Arc<RouteRegistry>) -> Self {
        Self {
            registry,
            hook: None,
        }
    }

    pub fn with_hook(mut self, hook: RouteUpdateHook) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn registry(&self) -> &Arc<RouteRegistry> {
        &self.registry
    }

    /// Snapshot of a step
    pub fn step(&self, step_id: &str) -> Result<Step, LedgerError> {
        self.registry
            .step(step_id)
            .ok_or_else(|| LedgerError::StepNotFound {
                step_id: step_id.to_string(),
            })
    }

    /// Run a mutation against a step, then notify the hook outside the map lock
    fn mutate<R>(
        &self,
        step_id: &str,
        f: impl FnOnce(&mut Step) -> Result<R, LedgerError>,
    ) -> Result<R, LedgerError> {
        let not_found = || LedgerError::StepNotFound {
            step_id: step_id.to_string(),
        };
        let route_id = self.registry.route_id_for_step(step_id).ok_or_else(not_found)?;

        let (result, snapshot) = {
            let mut route = self.registry.routes.get_mut(&route_id).ok_or_else(not_found)?;
            let step = route.step_mut(step_id).ok_or_else(not_found)?;
            let result = f(step)?;
            (result, route.clone())
        };

        if let Some(hook) = &self.hook {
            hook(&snapshot);
        }
        Ok(result)
    }

    /// Create the execution record if absent; a failed execution is prepared for restart
    pub fn init_execution(&self, step_id: &str) -> Result<Execution, LedgerError> {
        self.mutate(step_id, |step| {
            let execution = step.execution.get_or_insert_with(Execution::new);
            if execution.status == ExecutionStatus::Failed {
                info!("Restarting failed execution of step {}", step_id);
                execution.prepare_restart();
            }
            Ok(execution.clone())
        })
    }

    pub fn find_action(
        &self,
        step_id: &str,
        action_type: ActionType,
    ) -> Result<Option<Action>, LedgerError> {
        let step = self.step(step_id)?;
        Ok(step
            .execution
            .as_ref()
            .and_then(|e| e.action(action_type))
            .cloned())
    }

    /// Return the existing action of this type or create one in STARTED.
    /// A FAILED action ends its life-span and is replaced by a fresh one.
    pub fn find_or_create_action(
        &self,
        step_id: &str,
        action_type: ActionType,
        chain_id: ChainId,
    ) -> Result<Action, LedgerError> {
        self.mutate(step_id, |step| {
            let execution = step.execution.get_or_insert_with(Execution::new);
            if let Some(existing) = execution.action_mut(action_type) {
                if existing.status != ActionStatus::Failed {
                    return Ok(existing.clone());
                }
                debug!(
                    "Replacing failed {} action of step {}",
                    action_type, step_id
                );
                *existing = Action::new(action_type, chain_id);
                return Ok(existing.clone());
            }

            let action = Action::new(action_type, chain_id);
            debug!("Created {} action for step {}", action_type, step_id);
            execution.actions.push(action.clone());
            Ok(action)
        })
    }

    /// Stamp a new status on an action and merge the patch
    pub fn update_action(
        &self,
        step_id: &str,
        action_type: ActionType,
        status: ActionStatus,
        patch: ActionPatch,
    ) -> Result<Action, LedgerError> {
        let action = self.mutate(step_id, |step| {
            let execution = step
                .execution
                .as_mut()
                .ok_or_else(|| LedgerError::ActionNotFound {
                    step_id: step_id.to_string(),
                    action_type,
                })?;

            let action =
                execution
                    .action_mut(action_type)
                    .ok_or_else(|| LedgerError::ActionNotFound {
                        step_id: step_id.to_string(),
                        action_type,
                    })?;

            if !action.status.can_transition_to(status) {
                warn!(
                    "Rejected {} transition {} -> {} for step {}",
                    action_type, action.status, status, step_id
                );
                return Err(LedgerError::InvalidStateTransition {
                    from: action.status.to_string(),
                    to: status.to_string(),
                });
            }

            let status_changed = action.status != status;
            let now = Utc::now();
            action.status = status;
            action.updated_at = now;
            if status_changed {
                action.message = default_message(action_type, status).map(str::to_string);
            }
            if status.is_terminal() {
                action.done_at = Some(now);
            }
            patch.apply(action);
            let updated = action.clone();

            match status {
                ActionStatus::ResetRequired
                | ActionStatus::ActionRequired
                | ActionStatus::MessageRequired => {
                    execution.status = ExecutionStatus::ActionRequired;
                }
                ActionStatus::Started | ActionStatus::Pending => {
                    execution.status = ExecutionStatus::Pending;
                }
                ActionStatus::Failed => {
                    execution.status = ExecutionStatus::Failed;
                    execution.error = updated.error.clone();
                }
                ActionStatus::Done => {}
            }

            Ok(updated)
        })?;

        crate::metrics::record_action_transition(action_type, status);
        debug!("Step {} action {} -> {}", step_id, action_type, status);
        Ok(action)
    }

    /// Patch aggregate-level execution fields
    pub fn update_execution(
        &self,
        step_id: &str,
        patch: ExecutionPatch,
    ) -> Result<Execution, LedgerError> {
        self.mutate(step_id, |step| {
            let execution = step.execution.get_or_insert_with(Execution::new);
            patch.apply(execution);
            Ok(execution.clone())
        })
    }

    /// Swap in a refreshed quote while keeping the execution record
    pub fn replace_quote(&self, step_id: &str, refreshed: Step) -> Result<Step, LedgerError> {
        self.mutate(step_id, |step| {
            step.apply_quote(refreshed);
            Ok(step.clone())
        })
    }
}
