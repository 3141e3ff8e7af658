// SPDX-License-Identifier: MIT

//! Completeness routing after `check_completeness`

use serde_json::Value;

use super::config::RoutingSettings;
use super::fields;
use crate::underwrite::engine::router::Router;
use crate::underwrite::engine::state::StateStore;

/// Sends the thread to `gather_info` when few enough fields are missing or the
/// human skipped, otherwise to `user_prompt`
pub struct CompletenessRouter {
    settings: RoutingSettings,
    targets: Vec<String>,
}

impl CompletenessRouter {
    pub fn new(settings: RoutingSettings) -> Self {
        Self {
            settings,
            targets: vec![
                fields::USER_PROMPT.to_string(),
                fields::GATHER_INFO.to_string(),
            ],
        }
    }

    fn is_skip(&self, state: &StateStore) -> bool {
        state
            .get_str(fields::USER_INPUT)
            .map(|input| input.trim().eq_ignore_ascii_case(self.settings.skip_sentinel.trim()))
            .unwrap_or(false)
    }
}

/// Number of missing fields. A legacy string value counts its non-empty lines.
pub fn missing_count(value: Option<&Value>) -> usize {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter(|v| v.as_str().map(|s| !s.trim().is_empty()).unwrap_or(true))
            .count(),
        Some(Value::String(text)) => text.lines().filter(|l| !l.trim().is_empty()).count(),
        _ => 0,
    }
}

impl Router for CompletenessRouter {
    fn targets(&self) -> &[String] {
        &self.targets
    }

    fn route(&self, state: &StateStore) -> String {
        let missing = missing_count(state.get(fields::MISSING_FIELDS));

        if missing < self.settings.missing_threshold || self.is_skip(state) {
            log::info!("Completeness: {} missing, routing to {}", missing, fields::GATHER_INFO);
            fields::GATHER_INFO.to_string()
        } else {
            log::info!("Completeness: {} missing, routing to {}", missing, fields::USER_PROMPT);
            fields::USER_PROMPT.to_string()
        }
    }
}
