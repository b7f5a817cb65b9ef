//! Operations an agent invokes to participate in delegation.

pub mod delegate_tool;
pub mod introspection;

pub use delegate_tool::DelegationSurface;
pub use introspection::{builtin_tool_descriptors, AgentDescriptor, ToolDescriptor};

/// Normalize an agent id for comparison and registry lookup: collapse
/// whitespace, strip quotes, lowercase.
pub fn normalize_agent_id(name: &str) -> String {
    if name.is_empty() {
        return String::new();
    }
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('"', "")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_collapses_whitespace_and_case() {
        assert_eq!(normalize_agent_id("  Research   Lead "), "research lead");
        assert_eq!(normalize_agent_id("\"Writer\""), "writer");
        assert_eq!(normalize_agent_id(""), "");
    }
}
