// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde_json::{json, Value};

use super::truncate_chars;
use crate::underwrite::engine::error::StepError;
use crate::underwrite::engine::state::{StateStore, StateUpdate};
use crate::underwrite::engine::step::Step;
use crate::underwrite::pipeline::fields;
use crate::underwrite::tools::{tavily, ToolRegistry};

const QUERY_PREFIX: &str = "Verify professional indemnity information for: ";
const QUERY_CONTEXT_CHARS: usize = 200;

/// Verifies the applicant against the open web
pub struct WebSearchStep {
    tools: ToolRegistry,
    max_results: u32,
}

impl WebSearchStep {
    pub fn new(tools: ToolRegistry, max_results: u32) -> Self {
        Self { tools, max_results }
    }
}

pub fn format_results(results: &[Value]) -> String {
    results
        .iter()
        .map(|r| {
            let field = |key: &str| r.get(key).and_then(Value::as_str).unwrap_or_default();
            format!("- {}: {} ({})", field("title"), field("snippet"), field("url"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Step for WebSearchStep {
    fn name(&self) -> &str {
        fields::WEB_SEARCH
    }

    async fn run(&self, state: &StateStore) -> Result<StateUpdate, StepError> {
        let Some(tool) = self.tools.get(tavily::TOOL_NAME).await else {
            log::warn!("No web search collaborator configured, skipping search");
            return Ok(StateUpdate::new()
                .with(
                    fields::TAVILY_RESULTS,
                    json!("Placeholder: web search skipped, no search collaborator configured."),
                )
                .with(fields::ERROR, Value::Null));
        };

        let Some(context) = state.non_empty_str(fields::GATHERED_CONTEXT) else {
            log::warn!("No gathered context available for web search");
            return Ok(StateUpdate::new()
                .with(fields::TAVILY_RESULTS, json!("No context provided for search."))
                .with(fields::ERROR, Value::Null));
        };

        let query = format!("{}{}", QUERY_PREFIX, truncate_chars(context, QUERY_CONTEXT_CHARS));
        log::info!("Web search query: {}", query);

        match tool
            .execute(json!({ "query": query, "max_results": self.max_results }))
            .await
        {
            Ok(out) => {
                let results = out
                    .get("results")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                log::info!("Web search found {} result(s)", results.len());
                let formatted = if results.is_empty() {
                    "No results found.".to_string()
                } else {
                    format_results(&results)
                };
                Ok(StateUpdate::new()
                    .with(fields::TAVILY_RESULTS, json!(formatted))
                    .with(fields::ERROR, Value::Null))
            }
            Err(e) => {
                log::error!("Web search failed: {}", e);
                Ok(StateUpdate::new()
                    .with(fields::TAVILY_RESULTS, Value::Null)
                    .with(fields::ERROR, json!(format!("Web search error: {}", e))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::tool::Tool;
    use once_cell::sync::Lazy;
    use std::error::Error;
    use std::sync::{Arc, Mutex};

    static SCHEMA: Lazy<Value> = Lazy::new(|| json!({"type": "object"}));

    struct FakeSearch {
        reply: Result<Value, String>,
        queries: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl Tool for FakeSearch {
        fn name(&self) -> &str {
            tavily::TOOL_NAME
        }
        fn description(&self) -> &str {
            "fake"
        }
        fn schema(&self) -> &Value {
            &SCHEMA
        }
        async fn execute(&self, input: Value) -> Result<Value, Box<dyn Error + Send + Sync>> {
            self.queries.lock().unwrap().push(input);
            self.reply.clone().map_err(|e| e.into())
        }
    }

    async fn step_with(reply: Result<Value, String>) -> (WebSearchStep, Arc<FakeSearch>) {
        let tool = Arc::new(FakeSearch {
            reply,
            queries: Mutex::new(Vec::new()),
        });
        let tools = ToolRegistry::new();
        tools.register(tool.clone()).await;
        (WebSearchStep::new(tools, 5), tool)
    }

    fn with_context(context: &str) -> StateStore {
        let mut state = StateStore::new();
        state.merge(StateUpdate::new().with(fields::GATHERED_CONTEXT, json!(context)));
        state
    }

    #[tokio::test]
    async fn test_formats_results_and_truncates_query() {
        let (step, tool) = step_with(Ok(json!({"results": [
            {"title": "Acme", "snippet": "Founded 2004", "url": "https://acme.example"},
            {"title": "Register", "snippet": "Active", "url": "https://reg.example"}
        ]})))
        .await;

        let long_context = "x".repeat(500);
        let update = step.run(&with_context(&long_context)).await.unwrap();
        assert_eq!(
            update.get(fields::TAVILY_RESULTS),
            Some(&json!("- Acme: Founded 2004 (https://acme.example)\n- Register: Active (https://reg.example)"))
        );

        let queries = tool.queries.lock().unwrap();
        let query = queries[0]["query"].as_str().unwrap();
        assert_eq!(query.len(), QUERY_PREFIX.len() + 200);
        assert_eq!(queries[0]["max_results"], json!(5));
    }

    #[tokio::test]
    async fn test_no_results() {
        let (step, _) = step_with(Ok(json!({"results": []}))).await;
        let update = step.run(&with_context("Acme")).await.unwrap();
        assert_eq!(update.get(fields::TAVILY_RESULTS), Some(&json!("No results found.")));
    }

    #[tokio::test]
    async fn test_no_context() {
        let (step, tool) = step_with(Ok(json!({"results": []}))).await;
        let update = step.run(&StateStore::new()).await.unwrap();
        assert_eq!(
            update.get(fields::TAVILY_RESULTS),
            Some(&json!("No context provided for search."))
        );
        assert!(tool.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_sets_error() {
        let (step, _) = step_with(Err("401 unauthorized".to_string())).await;
        let update = step.run(&with_context("Acme")).await.unwrap();
        assert_eq!(update.get(fields::TAVILY_RESULTS), Some(&Value::Null));
        assert_eq!(
            update.get(fields::ERROR),
            Some(&json!("Web search error: 401 unauthorized"))
        );
    }

    #[tokio::test]
    async fn test_unconfigured_tool_is_placeholder() {
        let step = WebSearchStep::new(ToolRegistry::new(), 5);
        let update = step.run(&with_context("Acme")).await.unwrap();
        let text = update.get(fields::TAVILY_RESULTS).and_then(Value::as_str).unwrap();
        assert!(text.starts_with("Placeholder"));
    }
}
