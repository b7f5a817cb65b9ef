//! The orchestration core.
//!
//! Runs once at the end of every agent turn and decides whether the task
//! delegates, waits, or reports. When parallel delegations complete, the
//! parent's pending counter is the single linearization point: the one
//! decrement that observes zero builds the aggregated report and resumes
//! the parent, exactly once, regardless of sibling completion order.

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::channels::{ChannelRouter, ReportEnvelope};
use crate::delegation::reminder::AggregatedReport;
use crate::delegation::{DelegationContextManager, RecordOutcome};
use crate::runner::{AgentPool, TurnAction, TurnInput};
use crate::store::TaskStore;
use crate::task::TaskState;

/// Decides, on every turn end, whether to delegate, wait, or report, and
/// performs the exactly-once aggregation for parallel delegations.
pub struct AutoReportDispatcher {
    store: Arc<TaskStore>,
    contexts: Arc<DelegationContextManager>,
    router: Arc<ChannelRouter>,
    pool: Arc<AgentPool>,
}

impl AutoReportDispatcher {
    pub fn new(
        store: Arc<TaskStore>,
        contexts: Arc<DelegationContextManager>,
        router: Arc<ChannelRouter>,
        pool: Arc<AgentPool>,
    ) -> Self {
        Self {
            store,
            contexts,
            router,
            pool,
        }
    }

    /// Handle the end of one agent turn for `task_id`.
    ///
    /// `delegations_this_turn` is the number of delegations the turn issued
    /// through its tool surface; a turn that delegated produces no final
    /// answer, so any answer alongside delegations is discarded with a
    /// warning.
    pub async fn on_turn_end(&self, task_id: Uuid, action: TurnAction, delegations_this_turn: u32) {
        if delegations_this_turn > 0 {
            if matches!(action, TurnAction::FinalAnswer(_)) {
                warn!(
                    %task_id,
                    "final answer discarded: delegation suspends output until results return"
                );
            }
            // The tool surface already marked the task as delegating.
            return;
        }

        match action {
            TurnAction::AwaitDelegations => {
                // Yielding for delegations without having issued any would
                // hang the chain forever; convert it into a failure answer.
                warn!(%task_id, "agent yielded for delegations but issued none this turn");
                self.complete(
                    task_id,
                    "The agent yielded without delegating or producing an answer.",
                )
                .await;
            }
            TurnAction::Suspend => {
                debug!(%task_id, "turn suspended; completion will arrive externally");
            }
            TurnAction::FinalAnswer(content) => {
                let task = match self.store.get_task(task_id) {
                    Ok(task) => task,
                    Err(_) => {
                        warn!(%task_id, "final answer for deleted task; dropping");
                        return;
                    }
                };
                if task.pending_delegations > 0 {
                    warn!(
                        %task_id,
                        pending = task.pending_delegations,
                        "final answer while delegations are outstanding; still waiting"
                    );
                    return;
                }
                if self.store.set_state(task_id, TaskState::Reporting).is_err() {
                    return;
                }
                self.complete(task_id, &content).await;
            }
        }
    }

    /// A completed task reports upward (to its parent's agent) or outward
    /// (through the channel router at the root).
    pub async fn complete(&self, task_id: Uuid, content: &str) {
        let task = match self.store.get_task(task_id) {
            Ok(task) => task,
            Err(_) => {
                warn!(%task_id, "completion for unknown task; dropping");
                return;
            }
        };

        match task.parent_task_id {
            Some(parent_id) => {
                match self
                    .contexts
                    .record_response(parent_id, task_id, &task.delegated_to, content)
                {
                    RecordOutcome::Recorded => {}
                    RecordOutcome::Duplicate => {
                        // Already counted; do not decrement twice.
                        self.store.delete_task(task_id);
                        return;
                    }
                    RecordOutcome::Orphaned => {
                        // The parent that would have consumed this is gone.
                        self.store.delete_task(task_id);
                        return;
                    }
                }

                // The child has reported; its record and context go now,
                // before the parent acts on the result.
                self.store.delete_task(task_id);

                let remaining = match self.store.decrement_pending(parent_id) {
                    Ok(n) => n,
                    Err(_) => {
                        warn!(%parent_id, "parent vanished between record and decrement");
                        return;
                    }
                };
                if remaining > 0 {
                    debug!(%parent_id, remaining, "collecting sibling responses");
                    return;
                }

                self.resume_parent(parent_id).await;
            }
            None => {
                self.deliver_root(&task, content).await;
            }
        }
    }

    /// Consume a report from a remotely-running pool.
    ///
    /// The envelope's originating task id addresses the local proxy task
    /// that was waiting on the remote side. Redelivered envelopes find the
    /// proxy already gone and are dropped, so at-least-once queues decrement
    /// the parent exactly once.
    pub async fn ingest_remote_report(&self, envelope: &ReportEnvelope) {
        let task_id = envelope.originating_task_id;
        if !self.store.contains(task_id) {
            debug!(%task_id, "remote report for unknown task (duplicate or orphaned); dropping");
            return;
        }
        info!(%task_id, "remote report received");
        self.complete(task_id, &envelope.content).await;
    }

    /// All siblings are in: aggregate and hand the report to the parent
    /// task's agent, then let the parent run again.
    async fn resume_parent(&self, parent_id: Uuid) {
        let reminder = self.contexts.render_context_reminder(parent_id);
        let responses = reminder
            .as_ref()
            .map(|r| r.responses.clone())
            .unwrap_or_default();
        let report = AggregatedReport {
            parent_task_id: parent_id,
            responses,
        };

        let parent = match self.store.get_task(parent_id) {
            Ok(task) => task,
            Err(_) => {
                warn!(%parent_id, "parent deleted before resumption");
                return;
            }
        };
        if self.store.set_state(parent_id, TaskState::Running).is_err() {
            return;
        }

        info!(
            %parent_id,
            agent = %parent.delegated_to,
            responses = report.responses.len(),
            "all delegations complete; resuming parent"
        );

        if let Err(err) = self.pool.send_input(
            &parent.delegated_to,
            TurnInput {
                task_id: parent_id,
                message: report.render(),
                reminder,
            },
        ) {
            error!(%parent_id, %err, "failed to resume parent agent");
        }
    }

    /// Root task: deliver through the channel router, then delete.
    async fn deliver_root(&self, task: &crate::task::Task, content: &str) {
        match self
            .router
            .deliver(task.requester_channel, task.routing_token.as_deref(), content)
            .await
        {
            Ok(()) => {
                info!(task_id = %task.id, channel = %task.requester_channel, "final answer delivered");
                self.store.delete_task(task.id);
            }
            Err(err) => {
                error!(
                    task_id = %task.id,
                    channel = %task.requester_channel,
                    %err,
                    "final answer delivery failed past the retry budget"
                );
                let _ = self.store.set_state(task.id, TaskState::Failed);
            }
        }
    }
}

impl std::fmt::Debug for AutoReportDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoReportDispatcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::channels::parent_orchestrator::ReportQueue;
    use crate::channels::{InMemoryReportQueue, ParentOrchestratorChannel, SessionRegistry, UiChannel};
    use crate::config::OrchestratorConfig;
    use crate::runner::test_support::NullAgent;
    use crate::task::{ChannelKind, Task};
    use crate::tools::DelegationSurface;

    struct Fixture {
        store: Arc<TaskStore>,
        contexts: Arc<DelegationContextManager>,
        pool: Arc<AgentPool>,
        router: Arc<ChannelRouter>,
        sessions: Arc<SessionRegistry>,
        config: Arc<OrchestratorConfig>,
        dispatcher: AutoReportDispatcher,
    }

    fn fixture(agents: &[&str]) -> Fixture {
        let store = Arc::new(TaskStore::new());
        let contexts = Arc::new(DelegationContextManager::new(Arc::clone(&store)));
        let pool = Arc::new(AgentPool::new());
        for id in agents {
            pool.register(Arc::new(NullAgent::new(*id)));
        }
        let sessions = Arc::new(SessionRegistry::new());
        let router = Arc::new(ChannelRouter::new(1));
        router.register(Arc::new(UiChannel::new(Arc::clone(&sessions))));
        let dispatcher = AutoReportDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&contexts),
            Arc::clone(&router),
            Arc::clone(&pool),
        );
        Fixture {
            store,
            contexts,
            pool,
            router,
            sessions,
            config: Arc::new(OrchestratorConfig::default()),
            dispatcher,
        }
    }

    impl Fixture {
        fn surface_for(&self, task: Task) -> DelegationSurface {
            DelegationSurface::new(
                task,
                Vec::new(),
                Arc::clone(&self.store),
                Arc::clone(&self.contexts),
                Arc::clone(&self.pool),
                Arc::clone(&self.config),
            )
        }

        fn root_task(&self, agent: &str, session: &str) -> Task {
            self.store.create_task(
                "user-1",
                ChannelKind::Ui,
                "the request",
                agent,
                None,
                Some(session.to_string()),
            )
        }
    }

    #[tokio::test]
    async fn single_delegation_round_trip_and_root_delivery() {
        // Agent a (root task over ui) delegates to b; b completes; a resumes
        // with b's response, answers, and the answer lands on the session.
        let fx = fixture(&["a", "b"]);
        let mut ui_rx = fx.sessions.register("ws-1");
        let (_, mut a_inbox) = fx.pool.take_runner("a").unwrap();

        let root = fx.root_task("a", "ws-1");
        let surface = fx.surface_for(root.clone());
        let child_id = surface.delegate("b", "summarize X").unwrap();
        fx.dispatcher
            .on_turn_end(root.id, TurnAction::AwaitDelegations, surface.delegation_count())
            .await;

        // Child completes.
        fx.dispatcher
            .on_turn_end(child_id, TurnAction::FinalAnswer("summary text".into()), 0)
            .await;

        // Parent resumed exactly once, with the child's response in both the
        // aggregated report and the reminder.
        let resume = a_inbox.try_recv().unwrap();
        assert_eq!(resume.task_id, root.id);
        assert!(resume.message.contains("summary text"));
        let reminder = resume.reminder.as_ref().unwrap();
        assert_eq!(reminder.responses.len(), 1);
        assert_eq!(fx.store.get_task(root.id).unwrap().pending_delegations, 0);
        assert!(!fx.store.contains(child_id));

        // Parent produces the final answer; it reaches the ui session and
        // the task (with its context) is gone.
        fx.dispatcher
            .on_turn_end(root.id, TurnAction::FinalAnswer("here you go".into()), 0)
            .await;
        assert_eq!(ui_rx.try_recv().unwrap(), "here you go");
        assert!(fx.store.is_empty());
        assert!(fx.contexts.render_context_reminder(root.id).is_none());
    }

    #[tokio::test]
    async fn parallel_delegations_aggregate_exactly_once() {
        // a delegates to b, c, d; completions arrive d, b, c. No report
        // until the last, then one report with all three responses.
        let fx = fixture(&["a", "b", "c", "d"]);
        let (_, mut a_inbox) = fx.pool.take_runner("a").unwrap();

        let root = fx.root_task("a", "ws-1");
        let surface = fx.surface_for(root.clone());
        let b = surface.delegate("b", "part b").unwrap();
        let c = surface.delegate("c", "part c").unwrap();
        let d = surface.delegate("d", "part d").unwrap();
        fx.dispatcher
            .on_turn_end(root.id, TurnAction::AwaitDelegations, 3)
            .await;
        assert_eq!(fx.store.get_task(root.id).unwrap().pending_delegations, 3);

        fx.dispatcher
            .on_turn_end(d, TurnAction::FinalAnswer("delta done".into()), 0)
            .await;
        assert_eq!(fx.store.get_task(root.id).unwrap().pending_delegations, 2);
        assert!(a_inbox.try_recv().is_err());

        fx.dispatcher
            .on_turn_end(b, TurnAction::FinalAnswer("beta done".into()), 0)
            .await;
        assert_eq!(fx.store.get_task(root.id).unwrap().pending_delegations, 1);
        assert!(a_inbox.try_recv().is_err());

        fx.dispatcher
            .on_turn_end(c, TurnAction::FinalAnswer("gamma done".into()), 0)
            .await;
        assert_eq!(fx.store.get_task(root.id).unwrap().pending_delegations, 0);

        let resume = a_inbox.try_recv().unwrap();
        assert!(resume.message.contains("delta done"));
        assert!(resume.message.contains("beta done"));
        assert!(resume.message.contains("gamma done"));
        // Exactly once: nothing else queued.
        assert!(a_inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn aggregation_is_order_independent() {
        // Every completion order of three siblings produces exactly one
        // aggregated report containing all responses.
        const ORDERS: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for order in ORDERS {
            let fx = fixture(&["a", "b", "c", "d"]);
            let (_, mut a_inbox) = fx.pool.take_runner("a").unwrap();
            let root = fx.root_task("a", "ws-1");
            let surface = fx.surface_for(root.clone());
            let children = [
                surface.delegate("b", "part 0").unwrap(),
                surface.delegate("c", "part 1").unwrap(),
                surface.delegate("d", "part 2").unwrap(),
            ];
            fx.dispatcher
                .on_turn_end(root.id, TurnAction::AwaitDelegations, 3)
                .await;

            for (done, &i) in order.iter().enumerate() {
                fx.dispatcher
                    .on_turn_end(children[i], TurnAction::FinalAnswer(format!("result {i}")), 0)
                    .await;
                if done < 2 {
                    assert!(a_inbox.try_recv().is_err(), "early report for order {order:?}");
                }
            }

            let resume = a_inbox.try_recv().unwrap();
            for i in 0..3 {
                assert!(resume.message.contains(&format!("result {i}")));
            }
            assert!(a_inbox.try_recv().is_err(), "double report for order {order:?}");
            assert_eq!(fx.store.get_task(root.id).unwrap().pending_delegations, 0);
        }
    }

    #[tokio::test]
    async fn sequential_delegation_carries_context_forward() {
        // a delegates to b, gets the result, then delegates to c; the
        // reminder before c completes holds the b pair and the c entry.
        let fx = fixture(&["a", "b", "c"]);
        let (_, mut a_inbox) = fx.pool.take_runner("a").unwrap();

        let root = fx.root_task("a", "ws-1");
        let surface = fx.surface_for(root.clone());
        let b = surface.delegate("b", "find the figures").unwrap();
        fx.dispatcher
            .on_turn_end(root.id, TurnAction::AwaitDelegations, 1)
            .await;
        fx.dispatcher
            .on_turn_end(b, TurnAction::FinalAnswer("figures: 42".into()), 0)
            .await;

        let resume = a_inbox.try_recv().unwrap();
        assert!(resume.message.contains("figures: 42"));

        // Second round, referencing the first result.
        let surface = fx.surface_for(fx.store.get_task(root.id).unwrap());
        let _c = surface
            .delegate("c", "write a summary using figures: 42")
            .unwrap();
        fx.dispatcher
            .on_turn_end(root.id, TurnAction::AwaitDelegations, 1)
            .await;

        let reminder = fx.contexts.render_context_reminder(root.id).unwrap();
        assert_eq!(reminder.delegations.len(), 2);
        assert_eq!(reminder.responses.len(), 1);
        let text = reminder.render();
        assert!(text.contains("find the figures"));
        assert!(text.contains("figures: 42"));
        assert!(text.contains("write a summary"));
    }

    #[tokio::test]
    async fn cross_process_report_decrements_exactly_once_under_redelivery() {
        // Pool P1 holds the root; its proxy child waits on a remote pool P2.
        // P2 reports through the queue; the envelope is delivered twice.
        let p1 = fixture(&["lead", "leaf-pool"]);
        let (_, mut lead_inbox) = p1.pool.take_runner("lead").unwrap();

        let root = p1.root_task("lead", "ws-1");
        let surface = p1.surface_for(root.clone());
        let proxy = surface.delegate("leaf-pool", "crunch the logs").unwrap();
        p1.dispatcher
            .on_turn_end(root.id, TurnAction::AwaitDelegations, 1)
            .await;

        // P2 is a separate orchestrator with its own store; its root task
        // reports back through the parent-orchestrator channel.
        let queue = Arc::new(InMemoryReportQueue::new());
        let p2 = fixture(&["worker"]);
        p2.router
            .register(Arc::new(ParentOrchestratorChannel::new(queue.clone())));
        let remote_root = p2.store.create_task(
            "p1",
            ChannelKind::ParentOrchestrator,
            "crunch the logs",
            "worker",
            None,
            Some(proxy.to_string()),
        );
        p2.dispatcher
            .on_turn_end(remote_root.id, TurnAction::FinalAnswer("logs crunched".into()), 0)
            .await;
        assert!(p2.store.is_empty());

        let envelope = queue.dequeue().await.unwrap();
        assert_eq!(envelope.originating_task_id, proxy);

        // First delivery resumes the lead.
        p1.dispatcher.ingest_remote_report(&envelope).await;
        let resume = lead_inbox.try_recv().unwrap();
        assert!(resume.message.contains("logs crunched"));
        assert_eq!(p1.store.get_task(root.id).unwrap().pending_delegations, 0);

        // Redelivery is dropped: no second resumption, no underflow.
        p1.dispatcher.ingest_remote_report(&envelope).await;
        assert!(lead_inbox.try_recv().is_err());
        assert_eq!(p1.store.get_task(root.id).unwrap().pending_delegations, 0);
    }

    #[tokio::test]
    async fn orphaned_child_completion_is_dropped() {
        let fx = fixture(&["a", "b"]);
        let root = fx.root_task("a", "ws-1");
        let surface = fx.surface_for(root.clone());
        let child = surface.delegate("b", "late work").unwrap();

        // Parent crashes (task removed) before the child completes.
        fx.store.delete_task(root.id);
        fx.dispatcher
            .on_turn_end(child, TurnAction::FinalAnswer("too late".into()), 0)
            .await;

        // Child cleaned up, nothing resumed, nothing negative.
        assert!(fx.store.is_empty());
    }

    #[tokio::test]
    async fn failed_root_delivery_marks_the_task_failed() {
        let fx = fixture(&["a", "b"]);
        // No session registered for the token: both attempts fail.
        let root = fx.root_task("a", "ws-gone");
        fx.dispatcher
            .on_turn_end(root.id, TurnAction::FinalAnswer("answer".into()), 0)
            .await;

        let task = fx.store.get_task(root.id).unwrap();
        assert_eq!(task.state, TaskState::Failed);
    }

    #[tokio::test]
    async fn delegating_turn_discards_a_final_answer() {
        let fx = fixture(&["a", "b"]);
        let mut ui_rx = fx.sessions.register("ws-1");
        let root = fx.root_task("a", "ws-1");
        let surface = fx.surface_for(root.clone());
        surface.delegate("b", "part").unwrap();

        fx.dispatcher
            .on_turn_end(root.id, TurnAction::FinalAnswer("premature".into()), 1)
            .await;

        // Still waiting on the child; nothing delivered, task intact.
        assert!(ui_rx.try_recv().is_err());
        let task = fx.store.get_task(root.id).unwrap();
        assert_eq!(task.state, TaskState::Delegating);
        assert_eq!(task.pending_delegations, 1);
    }
}
