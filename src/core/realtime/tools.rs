//! Registered tools offered to the remote agent.

use super::openai::{ClientEvent, ToolDef};

/// Tools keyed by name, in first-registration order.
///
/// Each registration is announced by re-sending the whole set, so the registry
/// can be mutated before, during or after a connection.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDef>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a tool. Returns `true` when the set changed.
    pub fn register(&mut self, tool: ToolDef) -> bool {
        match self.tools.iter_mut().find(|t| t.name == tool.name) {
            Some(existing) if *existing == tool => false,
            Some(existing) => {
                *existing = tool;
                true
            }
            None => {
                self.tools.push(tool);
                true
            }
        }
    }

    /// Register several tools. Returns `true` when any of them changed the set.
    pub fn extend(&mut self, tools: impl IntoIterator<Item = ToolDef>) -> bool {
        tools
            .into_iter()
            .fold(false, |changed, tool| self.register(tool) || changed)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn tools(&self) -> &[ToolDef] {
        &self.tools
    }

    /// `session.update` announcing the full current set.
    pub fn announcement(&self) -> ClientEvent {
        ClientEvent::tools_update(self.tools.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str, description: &str) -> ToolDef {
        ToolDef::function(name, description, json!({"type": "object"}))
    }

    #[test]
    fn test_register_keyed_by_name() {
        let mut registry = ToolRegistry::new();
        assert!(registry.register(tool("create_flashcard", "v1")));
        assert!(registry.register(tool("judge_card", "v1")));
        assert!(!registry.register(tool("create_flashcard", "v1")));
        assert!(registry.register(tool("create_flashcard", "v2")));

        assert_eq!(registry.names(), vec!["create_flashcard", "judge_card"]);
        assert_eq!(registry.tools()[0].description.as_deref(), Some("v2"));
    }

    #[test]
    fn test_extend_reports_change() {
        let mut registry = ToolRegistry::new();
        assert!(registry.extend([tool("a", "x"), tool("b", "y")]));
        assert!(!registry.extend([tool("a", "x")]));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_announcement_carries_full_set() {
        let mut registry = ToolRegistry::new();
        registry.register(tool("a", "x"));
        registry.register(tool("b", "y"));

        let json = serde_json::to_value(registry.announcement()).unwrap();
        assert_eq!(json["type"], "session.update");
        assert_eq!(json["session"]["tool_choice"], "auto");
        assert_eq!(json["session"]["tools"].as_array().unwrap().len(), 2);
        assert_eq!(json["session"]["tools"][1]["name"], "b");
    }
}
