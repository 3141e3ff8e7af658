// SPDX-License-Identifier: MIT

//! Pipeline configuration - YAML file loading plus environment overrides
//!
//! Every section has defaults, so an empty file (or no file) is a valid
//! configuration. Secrets are never read from YAML; they come from the
//! environment (`.env` is honoured by the binary).

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adk::error::UnderwriteError;

/// Default categories the completeness check looks for
pub const DEFAULT_REQUIRED_FIELDS: [&str; 7] = [
    "Firm/Business Details",
    "Services & Operations",
    "Personnel",
    "Financials",
    "Risk Management & Quality Control",
    "Insurance & Claims History",
    "Coverage Requirements",
];

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub model: ModelSettings,
    pub search: SearchSettings,
    pub pipeline: PipelineSettings,
    pub routing: RoutingSettings,
    pub checkpoint: CheckpointSettings,
    pub server: ServerSettings,
    #[serde(skip)]
    pub secrets: Secrets,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ModelSettings {
    /// Model used for the completeness check and the decision
    pub name: String,
    /// Model used for OCR
    pub ocr_model: String,
    /// Separate decision model; falls back to `name`
    pub decision_model: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            name: "gemini-2.0-flash-001".to_string(),
            ocr_model: "gemini-2.0-flash-lite-001".to_string(),
            decision_model: None,
            timeout_secs: 120,
        }
    }
}

impl ModelSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn decision_model(&self) -> &str {
        self.decision_model.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SearchSettings {
    pub web_max_results: u32,
    pub web_search_depth: String,
    pub gcp_project_id: Option<String>,
    pub gcp_location: String,
    pub case_study_datastore_id: Option<String>,
    pub case_study_page_size: u32,
    pub timeout_secs: u64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            web_max_results: 5,
            web_search_depth: "advanced".to_string(),
            gcp_project_id: None,
            gcp_location: "global".to_string(),
            case_study_datastore_id: None,
            case_study_page_size: 5,
            timeout_secs: 60,
        }
    }
}

/// What `check_completeness` does when OCR produced no text
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmptyExtractionPolicy {
    /// Mark every required field missing, record an error, and carry on
    #[default]
    Continue,
    /// Fail the thread
    Abort,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    pub required_fields: Vec<String>,
    pub guidelines_path: PathBuf,
    pub prompt_template_path: PathBuf,
    pub on_empty_extraction: EmptyExtractionPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            required_fields: DEFAULT_REQUIRED_FIELDS.iter().map(|f| f.to_string()).collect(),
            guidelines_path: PathBuf::from("prompts/guidelines.txt"),
            prompt_template_path: PathBuf::from("prompts/gemini_underwriting_prompt.txt"),
            on_empty_extraction: EmptyExtractionPolicy::Continue,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RoutingSettings {
    /// Fewer missing fields than this counts as complete
    pub missing_threshold: usize,
    pub skip_sentinel: String,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            missing_threshold: 1,
            skip_sentinel: "SKIP".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    Memory,
    #[default]
    File,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CheckpointSettings {
    pub backend: CheckpointBackend,
    pub dir: PathBuf,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            backend: CheckpointBackend::File,
            dir: PathBuf::from(".underwrite/checkpoints"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

/// Credentials, taken from the environment only
#[derive(Clone, Default, PartialEq)]
pub struct Secrets {
    pub google_api_key: Option<String>,
    pub tavily_api_key: Option<String>,
    pub gcp_access_token: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |s: &Option<String>| s.as_ref().map(|_| "***");
        f.debug_struct("Secrets")
            .field("google_api_key", &mask(&self.google_api_key))
            .field("tavily_api_key", &mask(&self.tavily_api_key))
            .field("gcp_access_token", &mask(&self.gcp_access_token))
            .finish()
    }
}

/// Loads [`PipelineConfig`] from YAML and the environment
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load from `path` if given, then apply environment overrides
    pub fn load(&self, path: Option<&Path>) -> Result<PipelineConfig, UnderwriteError> {
        let mut config = match path {
            Some(path) => {
                let content = fs::read_to_string(path).map_err(|e| {
                    UnderwriteError::config(format!("cannot read {}: {}", path.display(), e))
                })?;
                Self::parse_yaml(&content)?
            }
            None => PipelineConfig::default(),
        };
        Self::apply_env(&mut config, |key| env::var(key).ok());
        Ok(config)
    }

    /// Parse a configuration from a YAML string
    pub fn parse_yaml(content: &str) -> Result<PipelineConfig, UnderwriteError> {
        if content.trim().is_empty() {
            return Ok(PipelineConfig::default());
        }
        let config: PipelineConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Overlay environment variables read through `lookup`
    pub fn apply_env<F>(config: &mut PipelineConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        config.secrets.google_api_key = get("GOOGLE_API_KEY");
        config.secrets.tavily_api_key = get("TAVILY_API_KEY");
        config.secrets.gcp_access_token = get("GCP_ACCESS_TOKEN");

        if let Some(v) = get("GEMINI_MODEL_NAME") {
            config.model.name = v;
        }
        if let Some(v) = get("GCP_PROJECT_ID") {
            config.search.gcp_project_id = Some(v);
        }
        if let Some(v) = get("GCP_LOCATION") {
            config.search.gcp_location = v;
        }
        if let Some(v) = get("CASE_STUDY_DATASTORE_ID") {
            config.search.case_study_datastore_id = Some(v);
        }
        if let Some(v) = get("UNDERWRITE_CHECKPOINT_DIR") {
            config.checkpoint.dir = PathBuf::from(v);
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_yaml_is_default() {
        let config = ConfigLoader::parse_yaml("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.routing.missing_threshold, 1);
        assert_eq!(config.routing.skip_sentinel, "SKIP");
        assert_eq!(config.pipeline.required_fields.len(), 7);
        assert_eq!(config.pipeline.on_empty_extraction, EmptyExtractionPolicy::Continue);
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
model:
  name: gemini-2.5-pro
  timeout_secs: 30
pipeline:
  required_fields: ["Financials", "Personnel"]
  on_empty_extraction: abort
checkpoint:
  backend: memory
"#;
        let config = ConfigLoader::parse_yaml(yaml).unwrap();
        assert_eq!(config.model.name, "gemini-2.5-pro");
        assert_eq!(config.model.ocr_model, "gemini-2.0-flash-lite-001");
        assert_eq!(config.model.timeout(), Duration::from_secs(30));
        assert_eq!(config.model.decision_model(), "gemini-2.5-pro");
        assert_eq!(config.pipeline.required_fields, vec!["Financials", "Personnel"]);
        assert_eq!(config.pipeline.on_empty_extraction, EmptyExtractionPolicy::Abort);
        assert_eq!(config.checkpoint.backend, CheckpointBackend::Memory);
        assert_eq!(config.search.gcp_location, "global");
    }

    #[test]
    fn test_invalid_yaml_is_error() {
        let err = ConfigLoader::parse_yaml("routing: [not, a, map]").unwrap_err();
        assert!(matches!(err, UnderwriteError::Yaml(_)));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("GOOGLE_API_KEY", "g-key"),
            ("TAVILY_API_KEY", ""),
            ("GCP_PROJECT_ID", "my-project"),
            ("CASE_STUDY_DATASTORE_ID", "cases"),
            ("UNDERWRITE_CHECKPOINT_DIR", "/tmp/cp"),
        ]
        .into_iter()
        .collect();

        let mut config = PipelineConfig::default();
        ConfigLoader::apply_env(&mut config, |k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.secrets.google_api_key.as_deref(), Some("g-key"));
        assert_eq!(config.secrets.tavily_api_key, None);
        assert_eq!(config.search.gcp_project_id.as_deref(), Some("my-project"));
        assert_eq!(config.search.case_study_datastore_id.as_deref(), Some("cases"));
        assert_eq!(config.checkpoint.dir, PathBuf::from("/tmp/cp"));
    }

    #[test]
    fn test_secrets_are_masked_in_debug() {
        let secrets = Secrets {
            google_api_key: Some("super-secret".to_string()),
            ..Default::default()
        };
        let printed = format!("{:?}", secrets);
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("***"));
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let err = ConfigLoader::new()
            .load(Some(Path::new("/no/such/underwrite.yaml")))
            .unwrap_err();
        assert!(matches!(err, UnderwriteError::Config(_)));
    }
}
