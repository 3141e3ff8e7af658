// SPDX-License-Identifier: MIT

//! Startup wiring: collaborators from credentials, the checkpointer, the
//! graph and the engine, assembled into a [`PipelineService`]

use std::sync::Arc;
use std::time::Duration;

use super::config::{CheckpointBackend, CheckpointSettings, PipelineConfig};
use super::graph::{build_graph, Collaborators};
use super::service::PipelineService;
use crate::adk::error::UnderwriteError;
use crate::adk::model::gemini::GeminiModel;
use crate::adk::model::Model;
use crate::underwrite::engine::checkpoint::{Checkpointer, FileCheckpointer, InMemoryCheckpointer};
use crate::underwrite::engine::graph::Engine;
use crate::underwrite::tools::{
    DatastoreLocation, GeminiOcrTool, TavilySearchTool, ToolRegistry, VertexSearchTool,
};

fn gemini(config: &PipelineConfig, name: &str, api_key: &str) -> Result<Arc<dyn Model>, UnderwriteError> {
    let model = GeminiModel::with_api_key(name.to_string(), api_key.to_string(), config.model.timeout())
        .map_err(|e| UnderwriteError::config(format!("cannot build Gemini client: {}", e)))?;
    Ok(Arc::new(model))
}

/// Build every collaborator whose credentials are present. Missing
/// credentials are logged; the matching steps then write placeholders.
pub async fn collaborators(config: &PipelineConfig) -> Result<Collaborators, UnderwriteError> {
    let tools = ToolRegistry::new();
    let mut collaborators = Collaborators {
        tools: tools.clone(),
        ..Default::default()
    };

    match config.secrets.google_api_key.as_deref() {
        Some(key) => {
            let model = gemini(config, &config.model.name, key)?;
            let decision = if config.model.decision_model() == config.model.name {
                model.clone()
            } else {
                gemini(config, config.model.decision_model(), key)?
            };
            let ocr = gemini(config, &config.model.ocr_model, key)?;

            tools.register(Arc::new(GeminiOcrTool::new(ocr))).await;
            collaborators.completeness_model = Some(model);
            collaborators.decision_model = Some(decision);
        }
        None => log::warn!("GOOGLE_API_KEY not set: OCR, completeness check and decision are disabled"),
    }

    let search_timeout = Duration::from_secs(config.search.timeout_secs);

    match config.secrets.tavily_api_key.as_deref() {
        Some(key) => {
            let tool = TavilySearchTool::with_api_key(key.to_string(), search_timeout)
                .map_err(|e| UnderwriteError::config(format!("cannot build Tavily client: {}", e)))?
                .with_search_depth(config.search.web_search_depth.clone());
            tools.register(Arc::new(tool)).await;
        }
        None => log::warn!("TAVILY_API_KEY not set: web search is disabled"),
    }

    let search = &config.search;
    match (
        search.gcp_project_id.as_deref(),
        search.case_study_datastore_id.as_deref(),
        config.secrets.gcp_access_token.as_deref(),
    ) {
        (Some(project_id), Some(datastore_id), Some(token)) => {
            let location = DatastoreLocation {
                project_id: project_id.to_string(),
                location: search.gcp_location.clone(),
                datastore_id: datastore_id.to_string(),
            };
            let tool = VertexSearchTool::new(location, token.to_string(), search_timeout)
                .map_err(|e| UnderwriteError::config(format!("cannot build Vertex AI Search client: {}", e)))?;
            tools.register(Arc::new(tool)).await;
        }
        _ => log::warn!(
            "GCP_PROJECT_ID, CASE_STUDY_DATASTORE_ID or GCP_ACCESS_TOKEN not set: case study search is disabled"
        ),
    }

    Ok(collaborators)
}

pub fn checkpointer(settings: &CheckpointSettings) -> Arc<dyn Checkpointer> {
    match settings.backend {
        CheckpointBackend::Memory => {
            log::info!("Using in-memory checkpoints");
            Arc::new(InMemoryCheckpointer::new())
        }
        CheckpointBackend::File => {
            log::info!("Writing checkpoints under {}", settings.dir.display());
            Arc::new(FileCheckpointer::new(settings.dir.clone()))
        }
    }
}

/// Assemble a service around the given collaborators and checkpointer
pub fn service_with(
    config: &PipelineConfig,
    collaborators: &Collaborators,
    checkpointer: Arc<dyn Checkpointer>,
) -> Result<PipelineService, UnderwriteError> {
    let graph = build_graph(config, collaborators)?;
    let engine = Engine::new(Arc::new(graph), checkpointer);
    Ok(PipelineService::new(
        Arc::new(engine),
        config.routing.skip_sentinel.clone(),
    ))
}

/// Build the service the drivers use from configuration alone
pub async fn build_service(config: &PipelineConfig) -> Result<PipelineService, UnderwriteError> {
    let collaborators = collaborators(config).await?;
    service_with(config, &collaborators, checkpointer(&config.checkpoint))
}
