// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::underwrite::engine::error::StepError;
use crate::underwrite::engine::state::{StateStore, StateUpdate};
use crate::underwrite::engine::step::Step;
use crate::underwrite::pipeline::fields;
use crate::underwrite::tools::{ocr, ToolRegistry};

/// OCRs every document in order and joins the text with a space.
///
/// The first document that fails stops extraction; text from the documents
/// before it is kept and `error` names the failing document.
pub struct ExtractTextStep {
    tools: ToolRegistry,
}

impl ExtractTextStep {
    pub fn new(tools: ToolRegistry) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl Step for ExtractTextStep {
    fn name(&self) -> &str {
        fields::EXTRACT_TEXT
    }

    async fn run(&self, state: &StateStore) -> Result<StateUpdate, StepError> {
        let paths = state.get_str_list(fields::DOCUMENT_PATHS);
        if paths.is_empty() {
            log::warn!("No document paths found in state");
            return Ok(StateUpdate::new().with(fields::ERROR, json!("No document paths provided.")));
        }

        let Some(tool) = self.tools.get(ocr::TOOL_NAME).await else {
            return Ok(StateUpdate::new()
                .with(fields::EXTRACTED_TEXT, json!(""))
                .with(fields::ERROR, json!("No document OCR collaborator configured.")));
        };

        let mut texts = Vec::with_capacity(paths.len());
        for path in &paths {
            log::info!("Processing document: {}", path);
            match tool.execute(json!({ "path": path })).await {
                Ok(out) => {
                    let text = out.get("text").and_then(Value::as_str).unwrap_or_default();
                    texts.push(text.to_string());
                }
                Err(e) => {
                    log::error!("Text extraction failed for {}: {}", path, e);
                    return Ok(StateUpdate::new()
                        .with(fields::EXTRACTED_TEXT, json!(texts.join(" ")))
                        .with(
                            fields::ERROR,
                            json!(format!("Unexpected error processing {}: {}", path, e)),
                        ));
                }
            }
        }

        log::info!("Text extraction complete ({} docs)", texts.len());
        Ok(StateUpdate::new()
            .with(fields::EXTRACTED_TEXT, json!(texts.join(" ")))
            .with(fields::ERROR, Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::tool::Tool;
    use once_cell::sync::Lazy;
    use std::error::Error;
    use std::sync::Arc;

    static SCHEMA: Lazy<Value> = Lazy::new(|| json!({"type": "object"}));

    /// Returns the file stem as text; fails on paths containing "bad"
    struct StemOcr;

    #[async_trait]
    impl Tool for StemOcr {
        fn name(&self) -> &str {
            ocr::TOOL_NAME
        }
        fn description(&self) -> &str {
            "stem ocr"
        }
        fn schema(&self) -> &Value {
            &SCHEMA
        }
        async fn execute(&self, input: Value) -> Result<Value, Box<dyn Error + Send + Sync>> {
            let path = input["path"].as_str().unwrap_or_default().to_string();
            if path.contains("bad") {
                return Err("unreadable page".into());
            }
            Ok(json!({"text": path.trim_end_matches(".png")}))
        }
    }

    async fn step() -> ExtractTextStep {
        let tools = ToolRegistry::new();
        tools.register(Arc::new(StemOcr)).await;
        ExtractTextStep::new(tools)
    }

    fn with_docs(docs: Value) -> StateStore {
        let mut state = StateStore::new();
        state.merge(StateUpdate::new().with(fields::DOCUMENT_PATHS, docs));
        state
    }

    #[tokio::test]
    async fn test_joins_documents_with_space() {
        let update = step()
            .await
            .run(&with_docs(json!(["one.png", "two.png"])))
            .await
            .unwrap();
        assert_eq!(update.get(fields::EXTRACTED_TEXT), Some(&json!("one two")));
        assert_eq!(update.get(fields::ERROR), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_no_documents() {
        let update = step().await.run(&StateStore::new()).await.unwrap();
        assert_eq!(update.get(fields::ERROR), Some(&json!("No document paths provided.")));
        assert_eq!(update.get(fields::EXTRACTED_TEXT), None);
    }

    #[tokio::test]
    async fn test_failure_keeps_earlier_text_and_stops() {
        let update = step()
            .await
            .run(&with_docs(json!(["one.png", "bad.png", "three.png"])))
            .await
            .unwrap();
        assert_eq!(update.get(fields::EXTRACTED_TEXT), Some(&json!("one")));
        let error = update.get(fields::ERROR).and_then(Value::as_str).unwrap();
        assert!(error.contains("bad.png"));
        assert!(error.contains("unreadable page"));
    }

    #[tokio::test]
    async fn test_missing_tool_is_reported() {
        let step = ExtractTextStep::new(ToolRegistry::new());
        let update = step.run(&with_docs(json!(["one.png"]))).await.unwrap();
        assert_eq!(update.get(fields::EXTRACTED_TEXT), Some(&json!("")));
        assert!(update.get(fields::ERROR).unwrap().is_string());
    }
}
