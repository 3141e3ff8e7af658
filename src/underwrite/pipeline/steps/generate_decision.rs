// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

use crate::adk::model::{Content, GenerationConfig, Model};
use crate::underwrite::engine::error::StepError;
use crate::underwrite::engine::state::{StateStore, StateUpdate};
use crate::underwrite::engine::step::Step;
use crate::underwrite::pipeline::fields;

const TEMPERATURE: f32 = 0.4;

/// Template placeholders and the state field each one is filled from
const PLACEHOLDERS: [(&str, &str); 4] = [
    ("{gathered_context}", fields::GATHERED_CONTEXT),
    ("{guidelines}", fields::GUIDELINES),
    ("{tavily_results}", fields::TAVILY_RESULTS),
    ("{case_study_results}", fields::CASE_STUDY_RESULTS),
];

/// Produces the final underwriting decision from the consolidated context,
/// the search findings and the prompt template on disk
pub struct GenerateDecisionStep {
    model: Option<Arc<dyn Model>>,
    template_path: PathBuf,
}

impl GenerateDecisionStep {
    pub fn new(model: Option<Arc<dyn Model>>, template_path: impl Into<PathBuf>) -> Self {
        Self {
            model,
            template_path: template_path.into(),
        }
    }

    fn placeholder() -> StateUpdate {
        StateUpdate::new()
            .with(fields::UNDERWRITING_DECISION, json!("Placeholder Decision"))
            .with(fields::RATE_CARD, json!({ "placeholder_rate": 0.0 }))
            .with(
                fields::REASONING,
                json!("Placeholder: decision generation skipped, no model configured."),
            )
            .with(fields::ERROR, Value::Null)
    }
}

/// Fill the template from state. Braces inside inserted values become
/// brackets so a value can never introduce another placeholder.
pub fn render_prompt(template: &str, state: &StateStore) -> String {
    PLACEHOLDERS
        .iter()
        .fold(template.to_string(), |prompt, &(placeholder, field)| {
            let value = match state.non_empty_str(field) {
                Some(v) => v,
                None if field == fields::GATHERED_CONTEXT => "No context available.",
                None => "",
            };
            prompt.replace(placeholder, &value.replace('{', "[").replace('}', "]"))
        })
}

#[async_trait]
impl Step for GenerateDecisionStep {
    fn name(&self) -> &str {
        fields::GENERATE_DECISION
    }

    async fn run(&self, state: &StateStore) -> Result<StateUpdate, StepError> {
        let Some(model) = &self.model else {
            log::warn!("No decision model configured, writing placeholder decision");
            return Ok(Self::placeholder());
        };

        let template = match tokio::fs::read_to_string(&self.template_path).await {
            Ok(text) => text,
            Err(e) => {
                log::error!(
                    "Cannot read prompt template {}: {}",
                    self.template_path.display(),
                    e
                );
                return Ok(StateUpdate::new().with(
                    fields::ERROR,
                    json!(format!(
                        "Failed to load prompt template from {}",
                        self.template_path.display()
                    )),
                ));
            }
        };

        let prompt = render_prompt(&template, state);
        let config = GenerationConfig::with_temperature(TEMPERATURE);
        log::info!("Generating underwriting decision with {}", model.name());

        match model
            .generate_content(&[Content::user_text(prompt)], Some(&config))
            .await
        {
            Ok(content) => {
                let text = content.text();
                if text.trim().is_empty() {
                    log::error!("Decision model returned an empty response");
                    return Ok(StateUpdate::new().with(
                        fields::ERROR,
                        json!("Decision generation failed: empty model response"),
                    ));
                }
                Ok(StateUpdate::new()
                    .with(fields::OUTPUT, json!(text))
                    .with(fields::ERROR, Value::Null))
            }
            Err(e) => {
                log::error!("Decision generation failed: {}", e);
                Ok(StateUpdate::new()
                    .with(fields::ERROR, json!(format!("Decision generation failed: {}", e))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct RecordingModel {
        reply: Result<String, String>,
        prompts: Mutex<Vec<String>>,
        temperatures: Mutex<Vec<Option<f32>>>,
    }

    impl RecordingModel {
        fn new(reply: Result<&str, &str>) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.map(str::to_string).map_err(str::to_string),
                prompts: Mutex::new(Vec::new()),
                temperatures: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Model for RecordingModel {
        fn name(&self) -> &str {
            "recording"
        }

        async fn generate_content(
            &self,
            history: &[Content],
            config: Option<&GenerationConfig>,
        ) -> Result<Content, Box<dyn Error + Send + Sync>> {
            self.prompts.lock().unwrap().push(history[0].text());
            self.temperatures
                .lock()
                .unwrap()
                .push(config.and_then(|c| c.temperature));
            match &self.reply {
                Ok(text) => Ok(Content {
                    role: "model".to_string(),
                    parts: vec![crate::adk::model::Part::Text(text.clone())],
                }),
                Err(e) => Err(e.clone().into()),
            }
        }
    }

    fn template_file(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("prompt.txt");
        std::fs::write(
            &path,
            "CTX={gathered_context}\nG={guidelines}\nW={tavily_results}\nC={case_study_results}",
        )
        .unwrap();
        path
    }

    #[test]
    fn test_render_prompt_defaults_and_brace_escaping() {
        let mut state = StateStore::new();
        state.merge(
            StateUpdate::new()
                .with(fields::GUIDELINES, json!("Limit {max} per claim"))
                .with(fields::TAVILY_RESULTS, Value::Null),
        );
        let prompt = render_prompt(
            "{gathered_context}|{guidelines}|{tavily_results}|{case_study_results}",
            &state,
        );
        assert_eq!(prompt, "No context available.|Limit [max] per claim||");
    }

    #[tokio::test]
    async fn test_writes_model_output() {
        let dir = TempDir::new().unwrap();
        let model = RecordingModel::new(Ok("Decision: Approve"));
        let step = GenerateDecisionStep::new(Some(model.clone()), template_file(&dir));

        let mut state = StateStore::new();
        state.merge(
            StateUpdate::new()
                .with(fields::GATHERED_CONTEXT, json!("Acme LLP"))
                .with(fields::CASE_STUDY_RESULTS, json!("Case Study: A")),
        );

        let update = step.run(&state).await.unwrap();
        assert_eq!(update.get(fields::OUTPUT), Some(&json!("Decision: Approve")));
        assert_eq!(update.get(fields::ERROR), Some(&Value::Null));

        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts[0], "CTX=Acme LLP\nG=\nW=\nC=Case Study: A");
        assert_eq!(model.temperatures.lock().unwrap()[0], Some(0.4));
    }

    #[tokio::test]
    async fn test_model_failure_sets_error() {
        let dir = TempDir::new().unwrap();
        let model = RecordingModel::new(Err("quota exceeded"));
        let step = GenerateDecisionStep::new(Some(model), template_file(&dir));

        let update = step.run(&StateStore::new()).await.unwrap();
        assert_eq!(update.get(fields::OUTPUT), None);
        assert_eq!(
            update.get(fields::ERROR),
            Some(&json!("Decision generation failed: quota exceeded"))
        );
    }

    #[tokio::test]
    async fn test_empty_response_sets_error() {
        let dir = TempDir::new().unwrap();
        let step = GenerateDecisionStep::new(Some(RecordingModel::new(Ok("  "))), template_file(&dir));
        let update = step.run(&StateStore::new()).await.unwrap();
        assert!(update.get(fields::ERROR).unwrap().is_string());
    }

    #[tokio::test]
    async fn test_missing_template() {
        let step = GenerateDecisionStep::new(
            Some(RecordingModel::new(Ok("unused"))),
            "/no/such/template.txt",
        );
        let update = step.run(&StateStore::new()).await.unwrap();
        assert_eq!(
            update.get(fields::ERROR),
            Some(&json!("Failed to load prompt template from /no/such/template.txt"))
        );
    }

    #[tokio::test]
    async fn test_no_model_writes_placeholder() {
        let step = GenerateDecisionStep::new(None, "/unused");
        let update = step.run(&StateStore::new()).await.unwrap();
        assert_eq!(
            update.get(fields::UNDERWRITING_DECISION),
            Some(&json!("Placeholder Decision"))
        );
        assert_eq!(
            update.get(fields::RATE_CARD),
            Some(&json!({ "placeholder_rate": 0.0 }))
        );
        assert_eq!(update.get(fields::OUTPUT), None);
    }
}
