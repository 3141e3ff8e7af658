// SPDX-License-Identifier: MIT

//! Caller-facing operations on underwriting runs
//!
//! [`PipelineService`] hides the engine's state updates behind the
//! operations the drivers need. Both the CLI and the HTTP server go through
//! it, so a run started in one can be resumed from the other when they share
//! a file checkpointer.

use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::fields;
use crate::adk::error::UnderwriteError;
use crate::underwrite::engine::checkpoint::{StepFaultRecord, ThreadStatus};
use crate::underwrite::engine::graph::{Engine, ThreadSnapshot};
use crate::underwrite::engine::state::StateUpdate;

/// What a caller sees of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStatus {
    pub thread_id: String,
    pub status: ThreadStatus,
    /// Step the run is waiting to enter, when paused
    pub paused_at: Option<String>,
    /// Question for the human, when paused
    pub pending_prompt: Option<String>,
    /// Last collaborator error recorded in state
    pub error: Option<String>,
    /// Step fault behind a failed run
    pub fault: Option<StepFaultRecord>,
    pub state: Value,
}

impl From<ThreadSnapshot> for RunStatus {
    fn from(snapshot: ThreadSnapshot) -> Self {
        let paused_at = snapshot.paused_at().map(str::to_string);
        let pending_prompt = paused_at
            .as_ref()
            .and_then(|_| snapshot.state.non_empty_str(fields::USER_PROMPT_MESSAGE))
            .map(str::to_string);
        let error = snapshot
            .state
            .non_empty_str(fields::ERROR)
            .map(str::to_string);

        Self {
            thread_id: snapshot.thread_id,
            status: snapshot.status,
            paused_at,
            pending_prompt,
            error,
            fault: snapshot.fault,
            state: snapshot.state.to_json(),
        }
    }
}

pub struct PipelineService {
    engine: Arc<Engine>,
    skip_sentinel: String,
}

impl PipelineService {
    pub fn new(engine: Arc<Engine>, skip_sentinel: impl Into<String>) -> Self {
        Self {
            engine,
            skip_sentinel: skip_sentinel.into(),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Start a new run over `document_paths` and drive it until it pauses or
    /// finishes. The returned status carries the new thread id.
    pub async fn start_run(&self, document_paths: Vec<String>) -> Result<RunStatus, UnderwriteError> {
        let thread_id = new_thread_id();
        self.start_run_as(&thread_id, document_paths).await
    }

    /// [`Self::start_run`] under a caller-chosen thread id, so the caller can
    /// follow the run's progress events from the first step
    pub async fn start_run_as(
        &self,
        thread_id: &str,
        document_paths: Vec<String>,
    ) -> Result<RunStatus, UnderwriteError> {
        log::info!(
            "Starting run {} over {} document(s)",
            thread_id,
            document_paths.len()
        );

        let input = StateUpdate::new().with(fields::DOCUMENT_PATHS, json!(document_paths));
        let outcome = self.engine.start(thread_id, input).await?;
        Ok(outcome.into_snapshot().into())
    }

    /// Current status of a run. Reads only; calling it repeatedly gives the
    /// same answer until the run is driven again.
    pub async fn get_status(&self, thread_id: &str) -> Result<RunStatus, UnderwriteError> {
        Ok(self.engine.status(thread_id).await?.into())
    }

    /// Answer the pending prompt and continue the run.
    ///
    /// The skip sentinel (case-insensitive) records only `user_input`. Any
    /// other text is also appended to the extracted information and the
    /// extracted text so the consolidated context includes it. A run that is
    /// not paused is rejected by the engine.
    pub async fn provide_input(&self, thread_id: &str, text: &str) -> Result<RunStatus, UnderwriteError> {
        let snapshot = self.engine.status(thread_id).await?;

        let mut overrides = StateUpdate::new().with(fields::USER_INPUT, json!(text));
        if self.is_skip(text) {
            log::info!("Run {} skipped the missing information", thread_id);
        } else {
            let append = |field: &str| {
                let current = snapshot.state.get_str(field).unwrap_or_default();
                json!(format!("{}\n{}", current, text))
            };
            overrides.set(
                fields::EXTRACTED_INFORMATION,
                append(fields::EXTRACTED_INFORMATION),
            );
            overrides.set(fields::EXTRACTED_TEXT, append(fields::EXTRACTED_TEXT));
            log::info!("Run {} received {} chars of input", thread_id, text.len());
        }

        let outcome = self.engine.resume(thread_id, overrides).await?;
        Ok(outcome.into_snapshot().into())
    }

    /// The decision text once the run is done
    pub async fn get_result(&self, thread_id: &str) -> Result<Option<String>, UnderwriteError> {
        let snapshot = self.engine.status(thread_id).await?;
        if snapshot.status != ThreadStatus::Done {
            return Ok(None);
        }
        Ok(snapshot.state.get_str(fields::OUTPUT).map(str::to_string))
    }

    /// Re-run the step that faulted
    pub async fn retry(&self, thread_id: &str) -> Result<RunStatus, UnderwriteError> {
        let outcome = self.engine.retry(thread_id).await?;
        Ok(outcome.into_snapshot().into())
    }

    pub async fn list_threads(&self) -> Result<Vec<String>, UnderwriteError> {
        Ok(self.engine.list_threads().await?)
    }

    fn is_skip(&self, text: &str) -> bool {
        text.trim().eq_ignore_ascii_case(self.skip_sentinel.trim())
    }
}

/// Fresh id for a new run
pub fn new_thread_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
