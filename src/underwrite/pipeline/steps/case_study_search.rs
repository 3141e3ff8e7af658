// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde_json::{json, Value};

use super::truncate_chars;
use crate::underwrite::engine::error::StepError;
use crate::underwrite::engine::state::{StateStore, StateUpdate};
use crate::underwrite::engine::step::Step;
use crate::underwrite::pipeline::fields;
use crate::underwrite::tools::{vertex_search, ToolRegistry};

const QUERY_CHARS: usize = 1000;

/// Retrieves similar past cases for the consolidated context
pub struct CaseStudySearchStep {
    tools: ToolRegistry,
    page_size: u32,
}

impl CaseStudySearchStep {
    pub fn new(tools: ToolRegistry, page_size: u32) -> Self {
        Self { tools, page_size }
    }
}

pub fn format_case_studies(results: &[Value]) -> String {
    results
        .iter()
        .map(|r| {
            let field = |key: &str| r.get(key).and_then(Value::as_str).unwrap_or("N/A");
            format!(
                "Case Study: {}\nLink: {}\nSnippet: {}",
                field("title"),
                field("link"),
                field("snippet")
            )
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}

#[async_trait]
impl Step for CaseStudySearchStep {
    fn name(&self) -> &str {
        fields::CASE_STUDY_SEARCH
    }

    async fn run(&self, state: &StateStore) -> Result<StateUpdate, StepError> {
        let Some(context) = state.non_empty_str(fields::GATHERED_CONTEXT) else {
            log::warn!("No gathered context for case study search");
            return Ok(StateUpdate::new()
                .with(fields::CASE_STUDY_RESULTS, json!("No context for search."))
                .with(fields::ERROR, Value::Null));
        };

        let Some(tool) = self.tools.get(vertex_search::TOOL_NAME).await else {
            log::warn!("No case study collaborator configured, skipping search");
            return Ok(StateUpdate::new()
                .with(
                    fields::CASE_STUDY_RESULTS,
                    json!("Placeholder: case study search skipped, no datastore configured."),
                )
                .with(fields::ERROR, Value::Null));
        };

        let input = json!({
            "query": truncate_chars(context, QUERY_CHARS),
            "page_size": self.page_size,
        });

        match tool.execute(input).await {
            Ok(out) => {
                let results = out
                    .get("results")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                log::info!("Retrieved {} case studies", results.len());
                let formatted = if results.is_empty() {
                    "No relevant case studies found.".to_string()
                } else {
                    format_case_studies(&results)
                };
                Ok(StateUpdate::new()
                    .with(fields::CASE_STUDY_RESULTS, json!(formatted))
                    .with(fields::ERROR, Value::Null))
            }
            Err(e) => {
                log::error!("Case study search failed: {}", e);
                Ok(StateUpdate::new()
                    .with(fields::CASE_STUDY_RESULTS, Value::Null)
                    .with(fields::ERROR, json!(format!("Case study search error: {}", e))))
            }
        }
    }
}
