//! The delegation tool surface handed to an agent for one turn.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::delegation::DelegationContextManager;
use crate::errors::DelegationError;
use crate::runner::{AgentPool, TurnInput};
use crate::store::TaskStore;
use crate::task::{Task, TaskState};

use super::introspection::{builtin_tool_descriptors, AgentDescriptor, ToolDescriptor};
use super::normalize_agent_id;

/// Per-turn handle through which an agent delegates and introspects.
///
/// Constructed fresh for every turn with a snapshot of the current task.
/// `delegate` is fire-and-forget: it never blocks the caller's turn waiting
/// for the child; the caller's turn ends and resumes later when the
/// aggregated report is injected.
pub struct DelegationSurface {
    task: Task,
    agent_tools: Vec<ToolDescriptor>,
    store: Arc<TaskStore>,
    contexts: Arc<DelegationContextManager>,
    pool: Arc<AgentPool>,
    config: Arc<OrchestratorConfig>,
    delegations_this_turn: AtomicU32,
}

impl DelegationSurface {
    pub fn new(
        task: Task,
        agent_tools: Vec<ToolDescriptor>,
        store: Arc<TaskStore>,
        contexts: Arc<DelegationContextManager>,
        pool: Arc<AgentPool>,
        config: Arc<OrchestratorConfig>,
    ) -> Self {
        Self {
            task,
            agent_tools,
            store,
            contexts,
            pool,
            config,
            delegations_this_turn: AtomicU32::new(0),
        }
    }

    /// The task the current turn belongs to.
    pub fn current_task_id(&self) -> Uuid {
        self.task.id
    }

    /// How many delegations this turn has issued so far.
    pub fn delegation_count(&self) -> u32 {
        self.delegations_this_turn.load(Ordering::SeqCst)
    }

    /// Delegate a sub-task to another agent, creating a child task.
    ///
    /// Validates the target (not self, not an ancestor of the current
    /// chain, pool large enough, depth under the cap), records the
    /// delegation into the current task's context, marks the current task
    /// as delegating, and enqueues the sub-request to the target's runner.
    pub fn delegate(
        &self,
        target_agent_id: &str,
        message: &str,
    ) -> Result<Uuid, DelegationError> {
        let me = normalize_agent_id(&self.task.delegated_to);
        let target = normalize_agent_id(target_agent_id);

        if target == me {
            return Err(DelegationError::InvalidDelegation {
                agent_id: me,
                reason: "an agent cannot delegate to itself".into(),
            });
        }

        if self.pool.len() < 2 {
            return Err(DelegationError::InvalidDelegation {
                agent_id: me,
                reason: "the pool has fewer than two eligible agents".into(),
            });
        }

        if !self.pool.contains(&target) {
            let available = self.pool.agent_ids().join(", ");
            return Err(DelegationError::InvalidDelegation {
                agent_id: me,
                reason: format!("target '{target}' not found; available agents: {available}"),
            });
        }

        let chain = self.store.ancestor_chain(self.task.id);
        if chain
            .iter()
            .any(|ancestor| normalize_agent_id(&ancestor.delegated_to) == target)
        {
            return Err(DelegationError::InvalidDelegation {
                agent_id: me,
                reason: format!("target '{target}' is an ancestor in this task's own chain"),
            });
        }

        let depth = chain.len() as u32 + 1;
        if depth > self.config.max_delegation_depth {
            return Err(DelegationError::DepthExceeded {
                depth,
                max_depth: self.config.max_delegation_depth,
            });
        }

        let child = self.store.create_task(
            self.task.delegated_to.clone(),
            self.task.requester_channel,
            message,
            target.clone(),
            Some(self.task.id),
            None,
        );
        self.contexts
            .record_delegation(self.task.id, child.id, &target, message)?;
        self.store.set_state(self.task.id, TaskState::Delegating)?;
        self.delegations_this_turn.fetch_add(1, Ordering::SeqCst);

        debug!(
            parent = %self.task.id,
            child = %child.id,
            target = %target,
            "delegation recorded"
        );

        if let Err(err) = self.pool.send_input(
            &target,
            TurnInput {
                task_id: child.id,
                message: message.to_string(),
                reminder: None,
            },
        ) {
            // Only possible when the pool is shutting down; the child task
            // stays in the store for the staleness sweep.
            warn!(child = %child.id, %err, "failed to hand child task to target runner");
        }

        Ok(child.id)
    }

    /// Introspection helper: every agent in the pool.
    pub fn list_agents(&self) -> Vec<AgentDescriptor> {
        self.pool.descriptors()
    }

    /// The caller's own tool set: the delegation operations plus whatever
    /// the agent itself declares.
    pub fn get_my_tools(&self) -> Vec<ToolDescriptor> {
        let mut tools = builtin_tool_descriptors();
        tools.extend(self.agent_tools.iter().cloned());
        tools
    }
}
