//! Descriptors agents use to choose a delegation target and to decide
//! whether they can handle a request themselves.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A delegation target visible through `list_agents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Registry id of the agent (normalized).
    pub agent_id: String,
    /// What the agent is for, in the agent's own words.
    pub description: String,
    /// Names of the tools the agent carries.
    pub tool_names: Vec<String>,
}

/// A tool visible through `get_my_tools`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// The unique name of the tool.
    pub name: String,
    /// Description used to tell the model how/when/why to use the tool.
    pub description: String,
    /// JSON schema for the tool's arguments.
    pub args_schema: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, args_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            args_schema,
        }
    }
}

/// Descriptors for the delegation operations every agent in a pool gets.
pub fn builtin_tool_descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new(
            "delegate",
            "Delegate a sub-task to another agent in the pool. The input should be \
             the target agent and the message with ALL necessary context to execute \
             the sub-task. Your turn ends after delegating; you resume when every \
             delegated sub-task has completed.",
            json!({
                "type": "object",
                "properties": {
                    "target_agent_id": {
                        "type": "string",
                        "description": "The agent to delegate to"
                    },
                    "message": {
                        "type": "string",
                        "description": "The sub-task, with all necessary context"
                    }
                },
                "required": ["target_agent_id", "message"]
            }),
        ),
        ToolDescriptor::new(
            "list_agents",
            "List the agents available as delegation targets, with their \
             descriptions and tools.",
            json!({ "type": "object", "properties": {} }),
        ),
        ToolDescriptor::new(
            "get_my_tools",
            "List your own tools, to decide whether to handle a request yourself \
             instead of delegating.",
            json!({ "type": "object", "properties": {} }),
        ),
    ]
}
