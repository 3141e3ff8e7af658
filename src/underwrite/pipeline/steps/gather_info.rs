// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;

use crate::underwrite::engine::error::StepError;
use crate::underwrite::engine::state::{StateStore, StateUpdate};
use crate::underwrite::engine::step::Step;
use crate::underwrite::pipeline::fields;

/// Consolidates the document summary and the underwriting guidelines into
/// `gathered_context`
pub struct GatherInfoStep {
    guidelines_path: PathBuf,
}

impl GatherInfoStep {
    pub fn new(guidelines_path: impl Into<PathBuf>) -> Self {
        Self {
            guidelines_path: guidelines_path.into(),
        }
    }
}

pub fn consolidate(extracted_information: &str, guidelines: &str) -> String {
    [
        "--- Extracted Document Text ---",
        extracted_information,
        "\n--- Underwriting Guidelines Context ---",
        guidelines,
    ]
    .join("\n")
}

#[async_trait]
impl Step for GatherInfoStep {
    fn name(&self) -> &str {
        fields::GATHER_INFO
    }

    async fn run(&self, state: &StateStore) -> Result<StateUpdate, StepError> {
        let extracted = state
            .non_empty_str(fields::EXTRACTED_INFORMATION)
            .unwrap_or("N/A");

        let mut update = StateUpdate::new();
        let guidelines = match tokio::fs::read_to_string(&self.guidelines_path).await {
            Ok(text) => text,
            Err(e) => {
                log::error!(
                    "Cannot read guidelines {}: {}",
                    self.guidelines_path.display(),
                    e
                );
                update.set(
                    fields::ERROR,
                    json!(format!(
                        "Failed to read guidelines from {}: {}",
                        self.guidelines_path.display(),
                        e
                    )),
                );
                String::new()
            }
        };

        update.set(fields::GATHERED_CONTEXT, json!(consolidate(extracted, &guidelines)));
        update.set(fields::GUIDELINES, json!(guidelines));
        log::info!("Information gathering complete");
        Ok(update)
    }
}
