//! # crewlink
//!
//! Delegation and auto-report orchestration engine for pools of stateless
//! AI agents.
//!
//! Agents delegate sub-tasks to one another (and to remotely-running
//! pools); the engine tracks every task and its delegation context,
//! aggregates the results of parallel delegations exactly once as siblings
//! complete in any order, and routes each root task's final answer back to
//! its original requester over the right channel (UI session, email, P2P,
//! or a parent orchestrator in another process).
//!
//! The reasoning layer, tool sandbox, persistence technology, and channel
//! transports stay outside the crate, behind the [`runner::Agent`],
//! [`channels::Channel`], and [`channels::ReportQueue`] traits.

pub mod channels;
pub mod config;
pub mod delegation;
pub mod dispatcher;
pub mod errors;
pub mod logging;
pub mod orchestrator;
pub mod runner;
pub mod store;
pub mod task;
pub mod tools;

pub use channels::{ChannelRouter, ReportEnvelope, ReportQueue};
pub use config::OrchestratorConfig;
pub use delegation::reminder::{AggregatedReport, ContextReminder};
pub use delegation::DelegationContextManager;
pub use dispatcher::AutoReportDispatcher;
pub use errors::{AgentError, DelegationError, DeliveryError, OrchestratorError, StoreError};
pub use orchestrator::Orchestrator;
pub use runner::{Agent, AgentPool, TurnAction, TurnInput};
pub use store::TaskStore;
pub use task::{ChannelKind, Task, TaskState};
pub use tools::{AgentDescriptor, DelegationSurface, ToolDescriptor};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
