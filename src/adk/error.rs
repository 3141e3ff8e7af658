// SPDX-License-Identifier: MIT

//! Typed error handling for underwrite-rs
//!
//! Engine-level failures (protocol violations, step faults, storage) live in
//! [`crate::underwrite::engine::error`]; this module wraps them together with
//! configuration and collaborator errors for callers of the application.

use thiserror::Error;

use crate::underwrite::engine::error::{CheckpointError, EngineError, GraphError};

/// Top-level error type for underwrite-rs
#[derive(Debug, Error)]
pub enum UnderwriteError {
    /// API errors from external services (Gemini, Tavily, Vertex AI Search)
    #[error("API error from {provider}: {message}")]
    Api { provider: String, message: String },

    /// Configuration errors (missing env vars, invalid config)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Engine errors: protocol violations, step faults, storage failures
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Malformed graph definition
    #[error("Invalid graph: {0}")]
    Graph(#[from] GraphError),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Generic error wrapper for compatibility
    #[error("{0}")]
    Other(String),
}

/// Model/LLM-specific errors
#[derive(Debug, Error)]
pub enum ModelError {
    /// API key not configured
    #[error("API key not configured for provider: {0}")]
    ApiKeyMissing(String),

    /// Response could not be used (empty, truncated, wrong shape)
    #[error("Invalid response from model: {0}")]
    InvalidResponse(String),
}

impl UnderwriteError {
    /// Create an API error
    pub fn api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create from a generic error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

impl From<CheckpointError> for UnderwriteError {
    fn from(err: CheckpointError) -> Self {
        Self::Engine(EngineError::Checkpoint(err))
    }
}

impl From<&str> for UnderwriteError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

impl From<String> for UnderwriteError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for UnderwriteError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::Other(err.to_string())
    }
}
