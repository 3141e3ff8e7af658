// SPDX-License-Identifier: MIT

//! Per-step progress of a run, for people watching it

use std::future::Future;
use tokio::sync::broadcast::{self, error::RecvError};

use super::fields;
use crate::underwrite::engine::checkpoint::ThreadStatus;
use crate::underwrite::engine::graph::StepEvent;

/// Message shown once `step` has finished
pub fn step_status(step: &str) -> String {
    let message = match step {
        fields::EXTRACT_TEXT => "Extracted text from the documents (OCR)",
        fields::CHECK_COMPLETENESS => "Checked document completeness",
        fields::USER_PROMPT => "Prepared a request for the missing information",
        fields::GATHER_INFO => "Consolidated the application information",
        fields::WEB_SEARCH => "Ran the external web search",
        fields::CASE_STUDY_SEARCH => "Searched for relevant case studies",
        fields::GENERATE_DECISION => "Generated the underwriting decision",
        other => return format!("Completed step: {}", other),
    };
    message.to_string()
}

/// Status line for an event; `None` for the checkpoint a call writes before
/// any step runs
pub fn describe(event: &StepEvent) -> Option<String> {
    let step = event.step.as_deref()?;
    Some(match event.status {
        ThreadStatus::Failed => format!("Step '{}' failed", step),
        _ => step_status(step),
    })
}

/// Await `call`, handing every event of `thread_id` to `on_event` as it
/// arrives. Events published before `call` resolves are all delivered before
/// this returns.
pub async fn follow<F>(
    events: &mut broadcast::Receiver<StepEvent>,
    thread_id: &str,
    call: F,
    mut on_event: impl FnMut(StepEvent),
) -> F::Output
where
    F: Future,
{
    tokio::pin!(call);
    let mut open = true;

    let output = loop {
        tokio::select! {
            output = &mut call => break output,
            received = events.recv(), if open => match received {
                Ok(event) if event.thread_id == thread_id => on_event(event),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Progress of '{}' skipped {} event(s)", thread_id, skipped)
                }
                Err(RecvError::Closed) => open = false,
            },
        }
    };

    while let Ok(event) = events.try_recv() {
        if event.thread_id == thread_id {
            on_event(event);
        }
    }
    output
}
