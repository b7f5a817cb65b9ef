//! Agent execution loops.
//!
//! Each registered agent gets one lightweight worker consuming an inbox of
//! turn inputs. A loop suspends the instant a turn ends and resumes only
//! when the dispatcher pushes new input. Agents are stateless between
//! turns: every fact they need arrives in the [`TurnInput`].

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{error, warn};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::delegation::reminder::ContextReminder;
use crate::delegation::DelegationContextManager;
use crate::dispatcher::AutoReportDispatcher;
use crate::errors::{AgentError, DeliveryError, OrchestratorError};
use crate::store::TaskStore;
use crate::tools::{normalize_agent_id, AgentDescriptor, DelegationSurface, ToolDescriptor};

/// Everything an agent receives for one turn.
#[derive(Debug, Clone)]
pub struct TurnInput {
    /// The task this turn belongs to.
    pub task_id: Uuid,
    /// The fresh message: an external request, a delegated sub-task, or an
    /// aggregated report from completed delegations.
    pub message: String,
    /// Reconstructed delegation history, present when the task is resuming
    /// after a round-trip.
    pub reminder: Option<ContextReminder>,
}

impl TurnInput {
    /// The full text a reasoning layer would be prompted with.
    pub fn rendered_prompt(&self) -> String {
        match &self.reminder {
            Some(reminder) => format!("{}\n\n{}", reminder.render(), self.message),
            None => self.message.clone(),
        }
    }
}

/// How an agent ended its turn.
#[derive(Debug, Clone)]
pub enum TurnAction {
    /// The agent produced its final answer for the task.
    FinalAnswer(String),
    /// The agent delegated this turn and yields until results return.
    AwaitDelegations,
    /// The turn ended with neither answer nor local delegation; completion
    /// will arrive externally (used by cross-process proxies).
    Suspend,
}

/// The agent reasoning boundary.
///
/// Implementations decide what to do with a turn; the engine only cares
/// whether the turn ended in delegation, a final answer, or suspension.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable identifier within the pool.
    fn id(&self) -> &str;

    /// Human-readable purpose, shown to other agents via `list_agents`.
    fn description(&self) -> &str {
        ""
    }

    /// Tools the agent carries beyond the delegation surface.
    fn tools(&self) -> Vec<ToolDescriptor> {
        Vec::new()
    }

    /// Execute one turn. Delegations are issued through `surface`; the
    /// returned action must be consistent with them (a delegating turn
    /// produces no final answer).
    async fn take_turn(
        &self,
        input: TurnInput,
        surface: &DelegationSurface,
    ) -> Result<TurnAction, AgentError>;
}

struct AgentSlot {
    agent: Arc<dyn Agent>,
    sender: mpsc::UnboundedSender<TurnInput>,
    /// Taken exactly once when the orchestrator starts this agent's loop.
    receiver: Mutex<Option<mpsc::UnboundedReceiver<TurnInput>>>,
}

/// Registry of the agents in one pool, keyed by normalized agent id.
#[derive(Default)]
pub struct AgentPool {
    slots: DashMap<String, AgentSlot>,
}

impl AgentPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent. Replaces any previous registration under the
    /// same normalized id. Register before the orchestrator starts.
    pub fn register(&self, agent: Arc<dyn Agent>) -> String {
        let id = normalize_agent_id(agent.id());
        let (tx, rx) = mpsc::unbounded_channel();
        self.slots.insert(
            id.clone(),
            AgentSlot {
                agent,
                sender: tx,
                receiver: Mutex::new(Some(rx)),
            },
        );
        id
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.slots.contains_key(&normalize_agent_id(agent_id))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn descriptors(&self) -> Vec<AgentDescriptor> {
        let mut descriptors: Vec<AgentDescriptor> = self
            .slots
            .iter()
            .map(|entry| AgentDescriptor {
                agent_id: entry.key().clone(),
                description: entry.agent.description().to_string(),
                tool_names: entry.agent.tools().iter().map(|t| t.name.clone()).collect(),
            })
            .collect();
        descriptors.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        descriptors
    }

    /// Queue a turn input to the agent's inbox. Never blocks.
    pub fn send_input(&self, agent_id: &str, input: TurnInput) -> Result<(), OrchestratorError> {
        let id = normalize_agent_id(agent_id);
        let slot = self
            .slots
            .get(&id)
            .ok_or_else(|| OrchestratorError::UnknownAgent {
                agent_id: id.clone(),
            })?;
        slot.sender
            .send(input)
            .map_err(|_| OrchestratorError::AgentUnavailable { agent_id: id })
    }

    /// Hand out the agent and its inbox receiver for loop startup.
    pub(crate) fn take_runner(
        &self,
        agent_id: &str,
    ) -> Option<(Arc<dyn Agent>, mpsc::UnboundedReceiver<TurnInput>)> {
        let slot = self.slots.get(&normalize_agent_id(agent_id))?;
        let receiver = slot.receiver.lock().take()?;
        Some((Arc::clone(&slot.agent), receiver))
    }
}

impl std::fmt::Debug for AgentPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentPool")
            .field("agents", &self.agent_ids())
            .finish()
    }
}

/// Shared services a runner loop needs for each turn.
#[derive(Clone)]
pub(crate) struct RunnerDeps {
    pub store: Arc<TaskStore>,
    pub contexts: Arc<DelegationContextManager>,
    pub pool: Arc<AgentPool>,
    pub config: Arc<OrchestratorConfig>,
    pub dispatcher: Arc<AutoReportDispatcher>,
}

/// One agent's execution loop. Runs until the inbox closes.
pub(crate) async fn run_agent_loop(
    agent: Arc<dyn Agent>,
    mut inbox: mpsc::UnboundedReceiver<TurnInput>,
    deps: RunnerDeps,
) {
    while let Some(input) = inbox.recv().await {
        let task_id = input.task_id;
        let task = match deps.store.get_task(task_id) {
            Ok(task) => task,
            Err(_) => {
                warn!(%task_id, agent = agent.id(), "turn input for deleted task; skipping");
                continue;
            }
        };

        let surface = DelegationSurface::new(
            task,
            agent.tools(),
            Arc::clone(&deps.store),
            Arc::clone(&deps.contexts),
            Arc::clone(&deps.pool),
            Arc::clone(&deps.config),
        );

        let result = agent.take_turn(input, &surface).await;
        let delegated = surface.delegation_count();

        match result {
            Ok(action) => {
                deps.dispatcher.on_turn_end(task_id, action, delegated).await;
            }
            Err(err) => {
                // A failed turn must not leave the chain hanging: surface
                // the failure as this task's answer so parents can react.
                error!(%task_id, agent = agent.id(), %err, "agent turn failed");
                deps.dispatcher
                    .on_turn_end(
                        task_id,
                        TurnAction::FinalAnswer(format!(
                            "Agent '{}' failed to handle the request: {err}",
                            agent.id()
                        )),
                        delegated,
                    )
                    .await;
            }
        }
    }
}

/// Outbound boundary for delegating to an agent pool in another process.
#[async_trait]
pub trait RemoteDelegationTransport: Send + Sync {
    /// Forward the sub-request to the remote pool, carrying the local task
    /// id the remote side must address its report to.
    async fn forward(
        &self,
        reply_to_task_id: Uuid,
        target_agent_id: &str,
        message: &str,
    ) -> Result<(), DeliveryError>;
}

/// In-pool proxy for a remotely-running agent pool.
///
/// Its turn forwards the sub-request across the process boundary and
/// suspends; the proxy task is completed later when the remote report is
/// ingested from the queue.
pub struct RemoteAgent {
    agent_id: String,
    description: String,
    transport: Arc<dyn RemoteDelegationTransport>,
}

impl RemoteAgent {
    pub fn new(
        agent_id: impl Into<String>,
        description: impl Into<String>,
        transport: Arc<dyn RemoteDelegationTransport>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            description: description.into(),
            transport,
        }
    }
}

#[async_trait]
impl Agent for RemoteAgent {
    fn id(&self) -> &str {
        &self.agent_id
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn take_turn(
        &self,
        input: TurnInput,
        _surface: &DelegationSurface,
    ) -> Result<TurnAction, AgentError> {
        match self
            .transport
            .forward(input.task_id, &self.agent_id, &input.message)
            .await
        {
            Ok(()) => Ok(TurnAction::Suspend),
            Err(err) => Ok(TurnAction::FinalAnswer(format!(
                "Could not reach remote pool '{}': {err}",
                self.agent_id
            ))),
        }
    }
}
