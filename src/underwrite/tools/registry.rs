// SPDX-License-Identifier: MIT

use crate::adk::tool::Tool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Collaborators available to pipeline steps, keyed by tool name
#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, Arc<dyn Tool>>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let mut tools = self.tools.write().await;
        log::info!("Registered tool: {}", tool.name());
        tools.insert(tool.name().to_string(), tool);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let tools = self.tools.read().await;
        tools.get(name).cloned()
    }

    /// Registered tool names, sorted
    pub async fn names(&self) -> Vec<String> {
        let tools = self.tools.read().await;
        let mut names: Vec<String> = tools.keys().cloned().collect();
        names.sort();
        names
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
    use serde_json::{json, Value};
    use std::error::Error;

    use once_cell::sync::Lazy;

    static MOCK_SCHEMA: Lazy<Value> = Lazy::new(|| {
        json!({
            "type": "object",
            "properties": {}
        })
    });

    struct MockTool {
        name: String,
    }

    impl MockTool {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
            }
        }
    }

    #[async_trait]
    impl Tool for MockTool {
        fn name(&self) -> &str {
            &self.name
        }

        fn description(&self) -> &str {
            "Mock collaborator"
        }

        fn schema(&self) -> &Value {
            &MOCK_SCHEMA
        }

        async fn execute(&self, _input: Value) -> Result<Value, Box<dyn Error + Send + Sync>> {
            Ok(json!({"results": []}))
        }
    }

    #[tokio::test]
    async fn test_register_and_get_tool() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(MockTool::new("web_search"))).await;

        let retrieved = registry.get("web_search").await;
        assert_eq!(retrieved.unwrap().name(), "web_search");
        assert!(registry.get("case_study_search").await.is_none());
    }

    #[tokio::test]
    async fn test_names_sorted() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(MockTool::new("web_search"))).await;
        registry.register(Arc::new(MockTool::new("document_ocr"))).await;

        assert_eq!(registry.names().await, vec!["document_ocr", "web_search"]);
    }

    #[tokio::test]
    async fn test_registry_is_shared_between_clones() {
        let registry = ToolRegistry::new();
        let cloned = registry.clone();

        cloned.register(Arc::new(MockTool::new("document_ocr"))).await;
        assert!(registry.get("document_ocr").await.is_some());
    }
}
