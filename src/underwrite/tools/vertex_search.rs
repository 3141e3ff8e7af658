// SPDX-License-Identifier: MIT

//! Case-study retrieval through the Vertex AI Search (Discovery Engine) REST API

use crate::adk::tool::Tool;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::error::Error;
use std::time::Duration;

pub const TOOL_NAME: &str = "case_study_search";

static VERTEX_SEARCH_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "Free-text query, usually the consolidated applicant context"
            },
            "page_size": {
                "type": "integer",
                "description": "Maximum number of case studies to return (default 5)"
            }
        },
        "required": ["query"]
    })
});

#[derive(Debug, Serialize, Deserialize)]
pub struct CaseStudySearchArgs {
    pub query: String,
    #[serde(default)]
    pub page_size: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct CaseStudy {
    pub title: String,
    pub link: String,
    pub snippet: String,
}

/// Where the datastore lives
#[derive(Debug, Clone)]
pub struct DatastoreLocation {
    pub project_id: String,
    pub location: String,
    pub datastore_id: String,
}

impl DatastoreLocation {
    /// `:search` endpoint of the datastore's default serving config
    pub fn search_url(&self) -> String {
        let host = if self.location == "global" {
            "discoveryengine.googleapis.com".to_string()
        } else {
            format!("{}-discoveryengine.googleapis.com", self.location)
        };
        format!(
            "https://{}/v1alpha/projects/{}/locations/{}/collections/default_collection/dataStores/{}/servingConfigs/default_config:search",
            host, self.project_id, self.location, self.datastore_id
        )
    }
}

pub struct VertexSearchTool {
    client: Client,
    datastore: DatastoreLocation,
    access_token: String,
    url: String,
}

impl VertexSearchTool {
    pub fn new(
        datastore: DatastoreLocation,
        access_token: String,
        timeout: Duration,
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let url = datastore.search_url();
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            datastore,
            access_token,
            url,
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

/// Extract title, link and snippet from each result's `derivedStructData`
pub fn parse_case_studies(body: &Value) -> Vec<CaseStudy> {
    let Some(results) = body.get("results").and_then(|r| r.as_array()) else {
        return Vec::new();
    };

    results
        .iter()
        .map(|result| {
            let data = result
                .get("document")
                .and_then(|d| d.get("derivedStructData"));

            let Some(data) = data else {
                return CaseStudy {
                    title: "N/A".to_string(),
                    link: "N/A".to_string(),
                    snippet: "N/A".to_string(),
                };
            };

            let text = |key: &str| {
                data.get(key)
                    .and_then(|v| v.as_str())
                    .unwrap_or("N/A")
                    .to_string()
            };
            let joined = |key: &str, inner: &str| {
                data.get(key)
                    .and_then(|v| v.as_array())
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|i| i.get(inner).and_then(|v| v.as_str()))
                            .collect::<Vec<_>>()
                            .join(" ")
                    })
                    .unwrap_or_default()
            };

            let mut snippet = joined("extractive_answers", "content");
            if snippet.is_empty() {
                snippet = joined("snippets", "snippet");
            }

            CaseStudy {
                title: text("title"),
                link: text("link"),
                snippet,
            }
        })
        .collect()
}

#[async_trait]
impl Tool for VertexSearchTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Searches a Vertex AI Search datastore for underwriting case studies similar to the applicant."
    }

    fn schema(&self) -> &Value {
        &VERTEX_SEARCH_SCHEMA
    }

    async fn execute(&self, input: Value) -> Result<Value, Box<dyn Error + Send + Sync>> {
        let args: CaseStudySearchArgs = serde_json::from_value(input)?;

        log::info!(
            "Querying case study datastore: {}",
            self.datastore.datastore_id
        );

        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.access_token)
            .header("X-Goog-User-Project", &self.datastore.project_id)
            .json(&json!({
                "query": args.query,
                "pageSize": args.page_size.unwrap_or(5),
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let text = resp.text().await?;
            return Err(format!("Vertex AI Search API error: {}", text).into());
        }

        let body: Value = resp.json().await?;
        let results = parse_case_studies(&body);
        Ok(json!({ "results": results }))
    }
}
