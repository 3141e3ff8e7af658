// SPDX-License-Identifier: MIT

//! Model module - defines the LLM model trait and shared message types
//!
//! Model implementations live in their own submodules:
//! - [gemini] - Google's Gemini API

pub mod gemini;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;

/// Configuration for model generation
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct GenerationConfig {
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
}

impl GenerationConfig {
    /// Config with only the sampling temperature set
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature: Some(temperature),
            ..Default::default()
        }
    }
}

/// A message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

impl Content {
    /// A user message made of a single text part
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            parts: vec![Part::Text(text.into())],
        }
    }

    /// Concatenated text of all text parts, in order
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Parts of a message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Part {
    /// Regular text
    Text(String),
    /// Thinking/reasoning content from thinking models
    Thinking(String),
    /// Binary payload sent inline, e.g. a scanned page for OCR
    InlineData { mime_type: String, data: Vec<u8> },
}

/// Core trait for LLM model implementations
#[async_trait]
pub trait Model: Send + Sync {
    /// Model identifier, used in logs
    fn name(&self) -> &str;

    async fn generate_content(
        &self,
        history: &[Content],
        config: Option<&GenerationConfig>,
    ) -> Result<Content, Box<dyn Error + Send + Sync>>;
}
