use std::collections::BTreeMap;
use std::sync::Arc;

use runwatch_core::{Tool, ToolDefinition};

/// Tools this process exposes to the agent runtime, keyed by name.
///
/// Tools provided by the runtime itself (its MCP servers) never appear here.
#[derive(Default)]
pub struct ToolRegistry {
    by_name: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `tool`; a later registration under the same name wins.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        if let Some(previous) = self.by_name.insert(tool.name().to_owned(), tool) {
            tracing::debug!(tool = previous.name(), "tool registration replaced");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.by_name.keys().cloned().collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.by_name.values().map(|t| t.to_definition()).collect()
    }

    /// Handles in name order, handed to the runtime at session creation.
    pub fn tools(&self) -> Vec<Arc<dyn Tool>> {
        self.by_name.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
