//! The orchestrator service object.
//!
//! Explicitly constructed and dependency-injected, with a start/stop
//! lifecycle. Nothing here is a process-wide global: multiple independent
//! pools can run in one process, each with its own store, contexts, router,
//! and agents.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::channels::{Channel, ChannelRouter, ReportEnvelope, ReportQueue};
use crate::config::OrchestratorConfig;
use crate::delegation::DelegationContextManager;
use crate::dispatcher::AutoReportDispatcher;
use crate::errors::OrchestratorError;
use crate::runner::{run_agent_loop, Agent, AgentPool, RunnerDeps, TurnInput};
use crate::store::TaskStore;
use crate::task::ChannelKind;

/// One agent pool: store, contexts, router, dispatcher, and the runner
/// loops for every registered agent.
pub struct Orchestrator {
    config: Arc<OrchestratorConfig>,
    store: Arc<TaskStore>,
    contexts: Arc<DelegationContextManager>,
    router: Arc<ChannelRouter>,
    pool: Arc<AgentPool>,
    dispatcher: Arc<AutoReportDispatcher>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(TaskStore::new());
        let contexts = Arc::new(DelegationContextManager::new(Arc::clone(&store)));
        let router = Arc::new(ChannelRouter::new(config.delivery_retry_limit));
        let pool = Arc::new(AgentPool::new());
        let dispatcher = Arc::new(AutoReportDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&contexts),
            Arc::clone(&router),
            Arc::clone(&pool),
        ));
        Self {
            config,
            store,
            contexts,
            router,
            pool,
            dispatcher,
            workers: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    pub fn contexts(&self) -> &Arc<DelegationContextManager> {
        &self.contexts
    }

    pub fn router(&self) -> &Arc<ChannelRouter> {
        &self.router
    }

    pub fn pool(&self) -> &Arc<AgentPool> {
        &self.pool
    }

    pub fn dispatcher(&self) -> &Arc<AutoReportDispatcher> {
        &self.dispatcher
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Register an agent in this pool. Call before `start`.
    pub fn register_agent(&self, agent: Arc<dyn Agent>) -> String {
        self.pool.register(agent)
    }

    /// Register a delivery channel with the router.
    pub fn register_channel(&self, channel: Arc<dyn Channel>) {
        self.router.register(channel);
    }

    /// Spawn one runner loop per registered agent. Idempotent: a second
    /// call while running is a logged no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("orchestrator already running");
            return;
        }
        let deps = RunnerDeps {
            store: Arc::clone(&self.store),
            contexts: Arc::clone(&self.contexts),
            pool: Arc::clone(&self.pool),
            config: Arc::clone(&self.config),
            dispatcher: Arc::clone(&self.dispatcher),
        };
        let mut workers = self.workers.lock();
        for agent_id in self.pool.agent_ids() {
            if let Some((agent, inbox)) = self.pool.take_runner(&agent_id) {
                info!(agent = %agent_id, "starting agent runner");
                workers.push(tokio::spawn(run_agent_loop(agent, inbox, deps.clone())));
            }
        }
    }

    /// Stop every runner loop and report pump.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("orchestrator shutting down");
        for handle in self.workers.lock().drain(..) {
            handle.abort();
        }
    }

    /// Entry point for an external request: create the root task for the
    /// named agent and queue its first turn.
    pub fn submit_request(
        &self,
        requester: impl Into<String>,
        channel: ChannelKind,
        routing_token: Option<String>,
        agent_id: &str,
        request: impl Into<String>,
    ) -> Result<Uuid, OrchestratorError> {
        if !self.pool.contains(agent_id) {
            return Err(OrchestratorError::UnknownAgent {
                agent_id: agent_id.to_string(),
            });
        }
        let request = request.into();
        let task = self.store.create_task(
            requester,
            channel,
            request.clone(),
            agent_id,
            None,
            routing_token,
        );
        info!(task_id = %task.id, agent = %agent_id, %channel, "root task created");
        self.pool.send_input(
            agent_id,
            TurnInput {
                task_id: task.id,
                message: request,
                reminder: None,
            },
        )?;
        Ok(task.id)
    }

    /// Consume one report from a remote pool. Idempotent per originating
    /// task id.
    pub async fn ingest_remote_report(&self, envelope: &ReportEnvelope) {
        self.dispatcher.ingest_remote_report(envelope).await;
    }

    /// Spawn a pump that drains the queue of reports from remote pools.
    pub fn start_report_pump(&self, queue: Arc<dyn ReportQueue>) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let interval = Duration::from_millis(self.config.report_poll_interval_ms);
        self.workers.lock().push(tokio::spawn(async move {
            loop {
                while let Some(envelope) = queue.dequeue().await {
                    dispatcher.ingest_remote_report(&envelope).await;
                }
                tokio::time::sleep(interval).await;
            }
        }));
    }

    /// Remove tasks older than the configured maximum age.
    pub fn expire_stale_tasks(&self) -> Vec<Uuid> {
        self.store
            .expire_stale(ChronoDuration::seconds(self.config.stale_task_max_age_secs as i64))
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        for handle in self.workers.lock().drain(..) {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("running", &self.is_running())
            .field("agents", &self.pool.agent_ids())
            .field("tasks", &self.store.len())
            .finish()
    }
}
