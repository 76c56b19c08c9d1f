//! Tool lookup by name.

use std::sync::Arc;

use super::tool::Tool;
use crate::provider::ToolDefinition;

/// Resolves a tool id to an executable capability.
pub trait ToolRegistry: Send + Sync {
    /// Look up a tool by the name the model uses.
    fn get(&self, name: &str) -> Option<Arc<dyn Tool>>;

    /// Schemas advertised to the model provider.
    fn definitions(&self) -> Vec<ToolDefinition>;
}

/// Ordered, immutable set of tools.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self { tools }
    }

    /// Add a tool, replacing any previous tool with the same name.
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.retain(|existing| existing.name() != tool.name());
        self.tools.push(tool);
        self
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl ToolRegistry for ToolSet {
    fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters().schema.clone(),
            })
            .collect()
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.tools.iter().map(|t| t.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{AgentTool, ToolOutput, ToolParameters};

    fn named(name: &str, description: &str) -> Arc<dyn Tool> {
        Arc::new(AgentTool::new(
            name,
            description,
            ToolParameters::empty(),
            |_args, _ctx| async { Ok(ToolOutput::text("ok")) },
        ))
    }

    #[test]
    fn lookup_and_definitions_follow_insertion_order() {
        let set = ToolSet::default()
            .with_tool(named("read_file", "read"))
            .with_tool(named("bash", "shell"));

        assert!(set.get("bash").is_some());
        assert!(set.get("missing").is_none());
        let names: Vec<String> = set.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["read_file", "bash"]);
    }

    #[test]
    fn with_tool_replaces_same_name() {
        let set = ToolSet::default()
            .with_tool(named("bash", "old"))
            .with_tool(named("bash", "new"));

        assert_eq!(set.len(), 1);
        assert_eq!(set.definitions()[0].description, "new");
    }
}
