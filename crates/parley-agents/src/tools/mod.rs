use serde::{Deserialize, Serialize};
use serde_json::json;

/// A function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments.
    pub parameters: serde_json::Value,
}

/// The set of tools offered to the model for a turn.
///
/// Tool calls returned by the model are resolved against this registry; calls
/// naming an unknown tool are dropped.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any existing tool with the same name.
    pub fn register(&mut self, tool: ToolDefinition) {
        self.tools.retain(|t| t.name != tool.name);
        self.tools.push(tool);
    }

    pub fn with_tool(mut self, tool: ToolDefinition) -> Self {
        self.register(tool);
        self
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.tools
    }

    /// Tool descriptors in the chat-completion `tools` field format.
    pub fn openai_descriptors(&self) -> Vec<serde_json::Value> {
        self.tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weather() -> ToolDefinition {
        ToolDefinition::new(
            "get_weather",
            "Get weather",
            json!({"type": "object", "properties": {"location": {"type": "string"}}}),
        )
    }

    #[test]
    fn descriptors_use_function_schema() {
        let registry = ToolRegistry::new().with_tool(weather());
        let descriptors = registry.openai_descriptors();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0]["type"], "function");
        assert_eq!(descriptors[0]["function"]["name"], "get_weather");
        assert_eq!(
            descriptors[0]["function"]["parameters"]["properties"]["location"]["type"],
            "string"
        );
    }

    #[test]
    fn register_replaces_same_name() {
        let mut registry = ToolRegistry::new();
        registry.register(weather());
        registry.register(ToolDefinition::new("get_weather", "v2", json!({})));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("get_weather").unwrap().description, "v2");
        assert!(registry.contains("get_weather"));
        assert!(!registry.contains("search"));
    }

    #[test]
    fn empty_registry_has_no_descriptors() {
        let registry = ToolRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.openai_descriptors().is_empty());
    }
}
