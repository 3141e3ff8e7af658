// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::underwrite::engine::error::StepError;
use crate::underwrite::engine::state::{StateStore, StateUpdate};
use crate::underwrite::engine::step::Step;
use crate::underwrite::pipeline::fields;

/// Builds the message asking the human for the missing fields. The pause
/// itself happens in the engine, before `gather_info`.
pub struct UserPromptStep;

pub fn prompt_message(missing: &[String]) -> String {
    format!(
        "The following required information is missing or couldn't be identified:\n{}\nPlease provide the missing information, or type 'SKIP' if unavailable:",
        missing.join("\n")
    )
}

#[async_trait]
impl Step for UserPromptStep {
    fn name(&self) -> &str {
        fields::USER_PROMPT
    }

    async fn run(&self, state: &StateStore) -> Result<StateUpdate, StepError> {
        let missing: Vec<String> = match state.get(fields::MISSING_FIELDS) {
            Some(Value::String(text)) => text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            _ => state.get_str_list(fields::MISSING_FIELDS),
        };

        if missing.is_empty() {
            log::info!("No missing fields, user prompt not needed");
            return Ok(StateUpdate::new().with(fields::USER_PROMPT_MESSAGE, Value::Null));
        }

        let message = prompt_message(&missing);
        log::info!("Generated user prompt for {} field(s)", missing.len());
        Ok(StateUpdate::new().with(fields::USER_PROMPT_MESSAGE, json!(message)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_message_lists_fields_one_per_line() {
        let mut state = StateStore::new();
        state.merge(StateUpdate::new().with(fields::MISSING_FIELDS, json!(["Financials", "Personnel"])));

        let update = UserPromptStep.run(&state).await.unwrap();
        assert_eq!(
            update.get(fields::USER_PROMPT_MESSAGE),
            Some(&json!(
                "The following required information is missing or couldn't be identified:\nFinancials\nPersonnel\nPlease provide the missing information, or type 'SKIP' if unavailable:"
            ))
        );
    }

    #[tokio::test]
    async fn test_empty_list_gives_null() {
        let mut state = StateStore::new();
        state.merge(StateUpdate::new().with(fields::MISSING_FIELDS, json!([])));
        let update = UserPromptStep.run(&state).await.unwrap();
        assert_eq!(update.get(fields::USER_PROMPT_MESSAGE), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_legacy_string_value() {
        let mut state = StateStore::new();
        state.merge(StateUpdate::new().with(fields::MISSING_FIELDS, json!("Financials\n")));
        let update = UserPromptStep.run(&state).await.unwrap();
        let message = update.get(fields::USER_PROMPT_MESSAGE).and_then(Value::as_str).unwrap();
        assert!(message.contains(":\nFinancials\nPlease"));
    }
}
