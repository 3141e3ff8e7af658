// SPDX-License-Identifier: MIT

//! Gemini Model - Google's Gemini API implementation

use super::{Content, GenerationConfig, Model, Part};
use crate::adk::error::ModelError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client;
use serde_json::json;
use std::env;
use std::error::Error;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini model implementation
pub struct GeminiModel {
    client: Client,
    api_key: String,
    model_name: String,
    base_url: String,
}

impl GeminiModel {
    /// Create a new GeminiModel
    ///
    /// Requires `GOOGLE_API_KEY` environment variable to be set.
    pub fn new(model_name: String) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let api_key = env::var("GOOGLE_API_KEY")
            .map_err(|_| ModelError::ApiKeyMissing("Gemini".to_string()))?;
        Self::with_api_key(model_name, api_key, Duration::from_secs(120))
    }

    /// Create a GeminiModel with an explicit key and request timeout
    pub fn with_api_key(
        model_name: String,
        api_key: String,
        timeout: Duration,
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key,
            model_name,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Point the model at a different API root (proxies, test servers)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Model for GeminiModel {
    fn name(&self) -> &str {
        &self.model_name
    }

    async fn generate_content(
        &self,
        history: &[Content],
        config: Option<&GenerationConfig>,
    ) -> Result<Content, Box<dyn Error + Send + Sync>> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model_name, self.api_key
        );

        let body = request_body(history, config);

        log::debug!(
            "Gemini request for {} with {} message(s)",
            self.model_name,
            history.len()
        );

        let resp = self.client.post(&url).json(&body).send().await?;

        if !resp.status().is_success() {
            let text = resp.text().await?;
            return Err(format!("Gemini API error: {}", text).into());
        }

        let resp_json: serde_json::Value = resp.json().await?;
        parse_response(&resp_json)
    }
}

/// Build the `generateContent` request body
pub fn request_body(history: &[Content], config: Option<&GenerationConfig>) -> serde_json::Value {
    let contents: Vec<serde_json::Value> = history
        .iter()
        .map(|c| {
            let parts: Vec<serde_json::Value> =
                c.parts.iter().filter_map(part_to_gemini_json).collect();
            json!({ "role": c.role, "parts": parts })
        })
        .collect();

    let mut body = json!({ "contents": contents });

    if let Some(config) = config {
        let mut gen = serde_json::Map::new();
        if let Some(t) = config.temperature {
            gen.insert("temperature".to_string(), json!(t));
        }
        if let Some(m) = config.max_output_tokens {
            gen.insert("maxOutputTokens".to_string(), json!(m));
        }
        if let Some(p) = config.top_p {
            gen.insert("topP".to_string(), json!(p));
        }
        if let Some(k) = config.top_k {
            gen.insert("topK".to_string(), json!(k));
        }
        if !gen.is_empty() {
            body["generationConfig"] = serde_json::Value::Object(gen);
        }
    }

    body
}

/// Turn a `generateContent` response into a model message
pub fn parse_response(
    resp_json: &serde_json::Value,
) -> Result<Content, Box<dyn Error + Send + Sync>> {
    let candidates = resp_json["candidates"]
        .as_array()
        .ok_or_else(|| ModelError::InvalidResponse("no candidates".to_string()))?;
    let candidate = candidates
        .first()
        .ok_or_else(|| ModelError::InvalidResponse("empty candidates".to_string()))?;

    if let Some(finish_reason) = candidate.get("finishReason").and_then(|v| v.as_str()) {
        log::debug!("Gemini finish reason: {}", finish_reason);
        if finish_reason == "SAFETY" {
            return Err(ModelError::InvalidResponse(
                "blocked by Gemini safety filters".to_string(),
            )
            .into());
        }
    }

    let parts_json = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            ModelError::InvalidResponse(format!("no content parts in candidate {}", candidate))
        })?;

    let parts = parts_json.iter().flat_map(parse_gemini_part).collect();

    Ok(Content {
        role: "model".to_string(),
        parts,
    })
}

/// Serialize a Part to Gemini API JSON format
/// Returns None for parts that shouldn't be sent (e.g., Thinking)
pub fn part_to_gemini_json(part: &Part) -> Option<serde_json::Value> {
    match part {
        Part::Text(t) => Some(json!({ "text": t })),
        Part::Thinking(_) => None,
        Part::InlineData { mime_type, data } => Some(json!({
            "inlineData": { "mimeType": mime_type, "data": BASE64.encode(data) }
        })),
    }
}

/// Parse a Gemini API JSON part into Parts
pub fn parse_gemini_part(p: &serde_json::Value) -> Vec<Part> {
    let mut parts = Vec::new();

    if let Some(thought) = p.get("thought").and_then(|t| t.as_str()) {
        if !thought.is_empty() {
            parts.push(Part::Thinking(thought.to_string()));
        }
    }

    if let Some(text) = p["text"].as_str() {
        parts.push(Part::Text(text.to_string()));
    }

    parts
}
