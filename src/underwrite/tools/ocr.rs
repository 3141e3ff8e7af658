// SPDX-License-Identifier: MIT

//! Document text extraction with a multimodal model

use crate::adk::model::{Content, Model, Part};
use crate::adk::tool::Tool;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{json, Value};
use std::error::Error;
use std::path::Path;
use std::sync::Arc;

pub const TOOL_NAME: &str = "document_ocr";

const OCR_INSTRUCTION: &str = "OCR and format in a easily readable manner";

static OCR_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "path": {
                "type": "string",
                "description": "Path of the scanned page image"
            }
        },
        "required": ["path"]
    })
});

#[derive(Debug, Deserialize)]
struct OcrArgs {
    path: String,
}

/// Sends each page image inline to a model and returns the recognised text
pub struct GeminiOcrTool {
    model: Arc<dyn Model>,
}

impl GeminiOcrTool {
    pub fn new(model: Arc<dyn Model>) -> Self {
        Self { model }
    }
}

pub fn mime_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("tiff") | Some("tif") => "image/tiff",
        Some("bmp") => "image/bmp",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

/// Strip code fences and flatten the text onto one line
pub fn clean_ocr_text(raw: &str) -> String {
    raw.replace("```text", "")
        .replace("```", "")
        .trim()
        .replace('\n', " ")
}

#[async_trait]
impl Tool for GeminiOcrTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Extracts readable text from a scanned document page."
    }

    fn schema(&self) -> &Value {
        &OCR_SCHEMA
    }

    async fn execute(&self, input: Value) -> Result<Value, Box<dyn Error + Send + Sync>> {
        let args: OcrArgs = serde_json::from_value(input)?;
        let path = Path::new(&args.path);

        let data = tokio::fs::read(path)
            .await
            .map_err(|e| format!("Document not found: {} ({})", args.path, e))?;

        let request = Content {
            role: "user".to_string(),
            parts: vec![
                Part::Text(OCR_INSTRUCTION.to_string()),
                Part::InlineData {
                    mime_type: mime_type_for(path).to_string(),
                    data,
                },
            ],
        };

        log::debug!("OCR request for {} via {}", args.path, self.model.name());
        let response = self.model.generate_content(&[request], None).await?;

        Ok(json!({ "text": clean_ocr_text(&response.text()) }))
    }
}
