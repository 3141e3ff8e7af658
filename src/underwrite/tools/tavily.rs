// SPDX-License-Identifier: MIT

use crate::adk::tool::Tool;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::env;
use std::error::Error;
use std::time::Duration;

pub const TOOL_NAME: &str = "web_search";

const DEFAULT_ENDPOINT: &str = "https://api.tavily.com/search";

// --- Static schema ---

static TAVILY_SEARCH_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "The search query"
            },
            "max_results": {
                "type": "integer",
                "description": "Number of results to return (default 5, max 20)"
            }
        },
        "required": ["query"]
    })
});

#[derive(Debug, Serialize, Deserialize)]
pub struct TavilySearchArgs {
    pub query: String,
    #[serde(default)]
    pub max_results: Option<u32>,
}

/// One normalized web result
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct WebResult {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TavilySearchResult {
    pub results: Vec<WebResult>,
    pub query: String,
}

/// Web verification search backed by the Tavily API
pub struct TavilySearchTool {
    client: Client,
    api_key: String,
    endpoint: String,
    search_depth: String,
}

impl TavilySearchTool {
    /// Requires `TAVILY_API_KEY` to be set
    pub fn new() -> Result<Self, Box<dyn Error + Send + Sync>> {
        let api_key = env::var("TAVILY_API_KEY").map_err(|_| "TAVILY_API_KEY must be set")?;
        Self::with_api_key(api_key, Duration::from_secs(60))
    }

    pub fn with_api_key(
        api_key: String,
        timeout: Duration,
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            api_key,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            search_depth: "advanced".to_string(),
        })
    }

    pub fn with_search_depth(mut self, depth: impl Into<String>) -> Self {
        self.search_depth = depth.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Map Tavily's `results` array to [`WebResult`]s, defaulting missing keys
pub fn parse_results(body: &Value) -> Result<Vec<WebResult>, Box<dyn Error + Send + Sync>> {
    let results = body
        .get("results")
        .and_then(|r| r.as_array())
        .ok_or("Invalid response format: missing results")?;

    Ok(results
        .iter()
        .map(|r| {
            let field = |key: &str, default: &str| {
                r.get(key)
                    .and_then(|v| v.as_str())
                    .unwrap_or(default)
                    .to_string()
            };
            WebResult {
                title: field("title", "No Title Available"),
                snippet: field("content", "No Snippet Available"),
                url: field("url", "#"),
            }
        })
        .collect())
}

#[async_trait]
impl Tool for TavilySearchTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Searches the web using the Tavily API to verify details about an applicant. Returns titles, snippets and URLs."
    }

    fn schema(&self) -> &Value {
        &TAVILY_SEARCH_SCHEMA
    }

    async fn execute(&self, input: Value) -> Result<Value, Box<dyn Error + Send + Sync>> {
        let args: TavilySearchArgs = serde_json::from_value(input)?;
        let max_results = args.max_results.unwrap_or(5).min(20);

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "api_key": self.api_key,
                "query": args.query,
                "search_depth": self.search_depth,
                "max_results": max_results,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let text = resp.text().await?;
            return Err(format!("Tavily API error: {}", text).into());
        }

        let body: Value = resp.json().await?;
        let result = TavilySearchResult {
            results: parse_results(&body)?,
            query: args.query,
        };

        Ok(serde_json::to_value(result)?)
    }
}
