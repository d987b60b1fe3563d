use std::collections::HashMap;
use std::sync::Arc;

use kana_core::tools::{Tool, ToolDefinition, ToolFlags};

/// One row of the dispatch table: the tool and its approval/notification classification.
#[derive(Clone)]
pub struct ToolEntry {
    pub tool: Arc<dyn Tool>,
    pub flags: ToolFlags,
}

/// Registry of available tools, keyed by name.
pub struct ToolRegistry {
    tools: HashMap<String, ToolEntry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool with the flags it declares.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let flags = tool.flags();
        self.register_with_flags(tool, flags);
    }

    /// Register a tool, overriding its declared flags.
    pub fn register_with_flags(&mut self, tool: Arc<dyn Tool>, flags: ToolFlags) {
        let name = tool.name().to_string();
        self.tools.insert(name, ToolEntry { tool, flags });
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn entry(&self, name: &str) -> Option<&ToolEntry> {
        self.tools.get(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|e| Arc::clone(&e.tool))
    }

    pub fn flags(&self, name: &str) -> Option<ToolFlags> {
        self.tools.get(name).map(|e| e.flags)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List all tool names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get tool definitions for the LLM.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|e| e.tool.to_definition())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kana_core::tools::{ToolContext, ToolError, ToolOutput};

    struct DummyTool {
        name: String,
        flags: ToolFlags,
    }

    impl DummyTool {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                flags: ToolFlags::approval_required(),
            }
        }
    }

    #[async_trait]
    impl Tool for DummyTool {
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "A dummy tool for testing"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        fn flags(&self) -> ToolFlags {
            self.flags
        }
        async fn execute(
            &self,
            _args: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::text("ok"))
        }
    }

    #[test]
    fn register_and_get() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DummyTool::new("read_file")));

        assert!(registry.contains("read_file"));
        assert!(!registry.contains("write_file"));
        assert_eq!(registry.count(), 1);
        assert!(registry.get("read_file").is_some());
        assert_eq!(registry.flags("read_file"), Some(ToolFlags::approval_required()));
    }

    #[test]
    fn declared_flags_are_used() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DummyTool {
            name: "rest_session".into(),
            flags: ToolFlags::auto().silent().terminal(),
        }));
        let flags = registry.flags("rest_session").unwrap();
        assert!(flags.auto_approved && flags.silent && flags.terminal);
    }

    #[test]
    fn override_flags() {
        let mut registry = ToolRegistry::new();
        registry.register_with_flags(Arc::new(DummyTool::new("shell")), ToolFlags::auto());
        assert!(registry.entry("shell").unwrap().flags.auto_approved);
    }

    #[test]
    fn unregister() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DummyTool::new("shell")));
        assert!(registry.unregister("shell"));
        assert!(!registry.contains("shell"));
        assert!(!registry.unregister("shell"));
    }

    #[test]
    fn names_and_definitions_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DummyTool::new("think")));
        registry.register(Arc::new(DummyTool::new("recall")));
        registry.register(Arc::new(DummyTool::new("shell")));

        assert_eq!(registry.names(), vec!["recall", "shell", "think"]);
        let defs = registry.definitions();
        assert_eq!(defs.len(), 3);
        assert_eq!(defs[0].name, "recall");
        assert_eq!(defs[2].name, "think");
    }
}
