// SPDX-License-Identifier: MIT

//! Graph executor
//!
//! The [`Engine`] drives one thread at a time through a [`GraphDefinition`],
//! writing a checkpoint after every step. It stops before an applicable
//! interrupt point or at the terminal marker, and can be resumed later from
//! the latest checkpoint, by this process or another one.
//!
//! Every checkpoint written is also published as a [`StepEvent`] to
//! subscribers of [`Engine::subscribe`].

use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::types::{GraphDefinition, NextStep};
use crate::underwrite::engine::checkpoint::{
    Checkpoint, Checkpointer, StepFaultRecord, ThreadStatus,
};
use crate::underwrite::engine::error::{EngineError, ProtocolViolation, StepError};
use crate::underwrite::engine::state::{StateStore, StateUpdate};

/// Externally visible view of a thread
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadSnapshot {
    pub thread_id: String,
    pub status: ThreadStatus,
    /// Step counter of the latest checkpoint, `None` before `start`
    pub step: Option<u64>,
    pub next: Option<NextStep>,
    pub state: StateStore,
    pub fault: Option<StepFaultRecord>,
}

impl ThreadSnapshot {
    fn ready(thread_id: &str) -> Self {
        Self {
            thread_id: thread_id.to_string(),
            status: ThreadStatus::Ready,
            step: None,
            next: None,
            state: StateStore::new(),
            fault: None,
        }
    }

    /// The step the thread is waiting to run, if it is paused
    pub fn paused_at(&self) -> Option<&str> {
        match (self.status, &self.next) {
            (ThreadStatus::Paused, Some(next)) => next.as_step(),
            _ => None,
        }
    }
}

impl From<&Checkpoint> for ThreadSnapshot {
    fn from(cp: &Checkpoint) -> Self {
        Self {
            thread_id: cp.thread_id.clone(),
            status: cp.status,
            step: Some(cp.step),
            next: Some(cp.next.clone()),
            state: cp.state.clone(),
            fault: cp.fault.clone(),
        }
    }
}

/// Progress notice published after each checkpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepEvent {
    pub thread_id: String,
    /// Step counter of the checkpoint just written
    pub checkpoint: u64,
    /// Step that just ran or faulted; `None` when a call (re)started the thread
    pub step: Option<String>,
    pub next: NextStep,
    pub status: ThreadStatus,
}

impl StepEvent {
    fn new(checkpoint: &Checkpoint, step: Option<&str>) -> Self {
        Self {
            thread_id: checkpoint.thread_id.clone(),
            checkpoint: checkpoint.step,
            step: step.map(str::to_string),
            next: checkpoint.next.clone(),
            status: checkpoint.status,
        }
    }
}

const EVENT_CAPACITY: usize = 256;

/// How a `start`/`resume`/`retry` call ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Stopped before an interrupt point
    Paused(ThreadSnapshot),
    /// Reached the terminal marker
    Done(ThreadSnapshot),
}

impl RunOutcome {
    pub fn snapshot(&self) -> &ThreadSnapshot {
        match self {
            RunOutcome::Paused(s) | RunOutcome::Done(s) => s,
        }
    }

    pub fn into_snapshot(self) -> ThreadSnapshot {
        match self {
            RunOutcome::Paused(s) | RunOutcome::Done(s) => s,
        }
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, RunOutcome::Paused(_))
    }
}

/// Step-graph runner. Build one per process and share it behind an `Arc`.
pub struct Engine {
    graph: Arc<GraphDefinition>,
    checkpointer: Arc<dyn Checkpointer>,
    events: broadcast::Sender<StepEvent>,
}

impl Engine {
    pub fn new(graph: Arc<GraphDefinition>, checkpointer: Arc<dyn Checkpointer>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            graph,
            checkpointer,
            events,
        }
    }

    pub fn graph(&self) -> &GraphDefinition {
        &self.graph
    }

    /// Receive a [`StepEvent`] for every checkpoint written from now on.
    /// A receiver that falls behind skips the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<StepEvent> {
        self.events.subscribe()
    }

    /// Begin a new thread with `input` as its initial state
    pub async fn start(&self, thread_id: &str, input: StateUpdate) -> Result<RunOutcome, EngineError> {
        let _lease = self.checkpointer.lease(thread_id)?;

        if let Some(existing) = self.checkpointer.get(thread_id).await? {
            return Err(violation(thread_id, "start", existing.status));
        }
        self.graph.schema().validate(&input)?;

        let mut state = StateStore::new();
        state.merge(input);

        let entry = self.graph.entry();
        let status = if self.graph.pauses_before(entry, None) {
            ThreadStatus::Paused
        } else {
            ThreadStatus::Running
        };
        let checkpoint = Checkpoint::initial(thread_id, state, NextStep::step(entry), status);
        self.record(&checkpoint, None).await?;

        log::info!("Thread '{}' started on graph '{}'", thread_id, self.graph.name());
        self.drive(checkpoint).await
    }

    /// Continue a paused thread, merging `overrides` before the deferred step runs
    pub async fn resume(
        &self,
        thread_id: &str,
        overrides: StateUpdate,
    ) -> Result<RunOutcome, EngineError> {
        let _lease = self.checkpointer.lease(thread_id)?;

        let latest = self.latest(thread_id, "resume").await?;
        if latest.status != ThreadStatus::Paused {
            return Err(violation(thread_id, "resume", latest.status));
        }
        self.graph.schema().validate(&overrides)?;

        let mut state = latest.state.clone();
        state.merge(overrides);
        let checkpoint = latest.advance(state, latest.next.clone(), ThreadStatus::Running);
        self.record(&checkpoint, None).await?;

        log::info!("Thread '{}' resumed at '{}'", thread_id, checkpoint.next);
        self.drive(checkpoint).await
    }

    /// Re-dispatch the recorded next step of a failed thread.
    ///
    /// A thread left `running` by a crashed process is accepted too. The lease
    /// excludes every other caller sharing the checkpointer; for the file
    /// backend that includes other processes, through an OS file lock.
    pub async fn retry(&self, thread_id: &str) -> Result<RunOutcome, EngineError> {
        let _lease = self.checkpointer.lease(thread_id)?;

        let latest = self.latest(thread_id, "retry").await?;
        if !matches!(latest.status, ThreadStatus::Failed | ThreadStatus::Running) {
            return Err(violation(thread_id, "retry", latest.status));
        }

        let checkpoint = latest.advance(
            latest.state.clone(),
            latest.next.clone(),
            ThreadStatus::Running,
        );
        self.record(&checkpoint, None).await?;

        log::info!("Thread '{}' retrying '{}'", thread_id, checkpoint.next);
        self.drive(checkpoint).await
    }

    /// Current view of a thread; `ready` when it was never started
    pub async fn status(&self, thread_id: &str) -> Result<ThreadSnapshot, EngineError> {
        Ok(match self.checkpointer.get(thread_id).await? {
            Some(cp) => ThreadSnapshot::from(&cp),
            None => ThreadSnapshot::ready(thread_id),
        })
    }

    pub async fn state(&self, thread_id: &str) -> Result<StateStore, EngineError> {
        Ok(self.status(thread_id).await?.state)
    }

    pub async fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>, EngineError> {
        Ok(self.checkpointer.history(thread_id).await?)
    }

    pub async fn list_threads(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.checkpointer.list_threads().await?)
    }

    async fn latest(&self, thread_id: &str, operation: &'static str) -> Result<Checkpoint, EngineError> {
        self.checkpointer
            .get(thread_id)
            .await?
            .ok_or_else(|| violation(thread_id, operation, ThreadStatus::Ready))
    }

    /// Run steps from `checkpoint` until the thread pauses or ends
    async fn drive(&self, mut checkpoint: Checkpoint) -> Result<RunOutcome, EngineError> {
        loop {
            match checkpoint.status {
                ThreadStatus::Paused => {
                    log::info!(
                        "Thread '{}' paused before '{}'",
                        checkpoint.thread_id,
                        checkpoint.next
                    );
                    return Ok(RunOutcome::Paused(ThreadSnapshot::from(&checkpoint)));
                }
                ThreadStatus::Done => {
                    log::info!("Thread '{}' completed", checkpoint.thread_id);
                    return Ok(RunOutcome::Done(ThreadSnapshot::from(&checkpoint)));
                }
                _ => {}
            }

            let step_name = match &checkpoint.next {
                NextStep::Step(name) => name.clone(),
                NextStep::End => {
                    let done = checkpoint.advance(
                        checkpoint.state.clone(),
                        NextStep::End,
                        ThreadStatus::Done,
                    );
                    self.record(&done, None).await?;
                    checkpoint = done;
                    continue;
                }
            };

            let step = match self.graph.step(&step_name) {
                Some(step) => step.clone(),
                None => {
                    let message = format!("step '{}' is not part of graph '{}'", step_name, self.graph.name());
                    return Err(self.fail(&checkpoint, &step_name, message).await);
                }
            };

            log::info!("Thread '{}' running step '{}'", checkpoint.thread_id, step_name);

            let update = match AssertUnwindSafe(step.run(&checkpoint.state))
                .catch_unwind()
                .await
            {
                Ok(Ok(update)) => update,
                Ok(Err(e)) => return Err(self.fail(&checkpoint, &step_name, e.to_string()).await),
                Err(panic) => {
                    let message = format!("step panicked: {}", panic_message(panic.as_ref()));
                    return Err(self.fail(&checkpoint, &step_name, message).await);
                }
            };

            if let Err(e) = self.graph.schema().validate(&update) {
                let message = StepError::InvalidUpdate(e).to_string();
                return Err(self.fail(&checkpoint, &step_name, message).await);
            }

            if let Some(error) = update.get("error").and_then(|v| v.as_str()) {
                log::warn!("Step '{}' reported: {}", step_name, error);
            }

            let mut state = checkpoint.state.clone();
            state.merge(update);

            let routed = std::panic::catch_unwind(AssertUnwindSafe(|| {
                self.graph.next_after(&step_name, &state)
            }));
            let next = match routed {
                Ok(Ok(next)) => next,
                Ok(Err(message)) => return Err(self.fail(&checkpoint, &step_name, message).await),
                Err(panic) => {
                    let message = format!("router panicked: {}", panic_message(panic.as_ref()));
                    return Err(self.fail(&checkpoint, &step_name, message).await);
                }
            };

            let status = match &next {
                NextStep::End => ThreadStatus::Done,
                NextStep::Step(n) if self.graph.pauses_before(n, Some(&step_name)) => {
                    ThreadStatus::Paused
                }
                NextStep::Step(_) => ThreadStatus::Running,
            };

            let advanced = checkpoint.advance(state, next, status);
            self.record(&advanced, Some(&step_name)).await?;
            log::debug!(
                "Thread '{}' checkpoint {}: '{}' -> '{}'",
                advanced.thread_id,
                advanced.step,
                step_name,
                advanced.next
            );
            checkpoint = advanced;
        }
    }

    /// Persist `checkpoint`, then announce it
    async fn record(&self, checkpoint: &Checkpoint, step: Option<&str>) -> Result<(), EngineError> {
        self.checkpointer.put(checkpoint.clone()).await?;
        // No subscribers is fine
        let _ = self.events.send(StepEvent::new(checkpoint, step));
        Ok(())
    }

    /// Record a failed checkpoint and build the fault error
    async fn fail(&self, checkpoint: &Checkpoint, step: &str, message: String) -> EngineError {
        log::error!(
            "Step '{}' faulted on thread '{}': {}",
            step,
            checkpoint.thread_id,
            message
        );

        if let Err(e) = self.record(&checkpoint.failed(step, &message), Some(step)).await {
            return e;
        }

        EngineError::StepFault {
            thread_id: checkpoint.thread_id.clone(),
            step: step.to_string(),
            message,
        }
    }
}

fn violation(thread_id: &str, operation: &'static str, status: ThreadStatus) -> EngineError {
    ProtocolViolation::InvalidStateTransition {
        thread_id: thread_id.to_string(),
        operation,
        status,
    }
    .into()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::underwrite::engine::checkpoint::{FileCheckpointer, InMemoryCheckpointer};
    use crate::underwrite::engine::graph::GraphBuilder;
    use crate::underwrite::engine::router::{FnRouter, Router};
    use crate::underwrite::engine::state::{FieldType, StateSchema};
    use crate::underwrite::engine::step::{FnStep, Step};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn schema() -> StateSchema {
        StateSchema::new()
            .field("input", FieldType::String, "")
            .field("needs_review", FieldType::Boolean, "")
            .field("review", FieldType::String, "")
            .field("trace", FieldType::Array, "")
            .field("output", FieldType::String, "")
            .field("error", FieldType::String, "")
    }

    /// Appends its own name to `trace`
    fn tracing_step(name: &'static str) -> Arc<dyn Step> {
        Arc::new(FnStep::new(name, move |state: StateStore| async move {
            let mut trace = state.get("trace").cloned().unwrap_or(json!([]));
            if let Some(items) = trace.as_array_mut() {
                items.push(json!(name));
            }
            Ok(StateUpdate::new().with("trace", trace))
        }))
    }

    fn review_router() -> Arc<dyn Router> {
        Arc::new(FnRouter::new(&["review", "finish"], |state| {
            if state.get("needs_review") == Some(&json!(true)) {
                "review".to_string()
            } else {
                "finish".to_string()
            }
        }))
    }

    fn finish_step() -> Arc<dyn Step> {
        Arc::new(FnStep::new("finish", |state: StateStore| async move {
            let review = state.get_str("review").unwrap_or("none").to_string();
            Ok(StateUpdate::new().with("output", json!(format!("reviewed: {}", review))))
        }))
    }

    /// analyse -> fork{review | finish}; review -> finish (pause when from review)
    fn build_graph(analyse: Arc<dyn Step>) -> Arc<GraphDefinition> {
        Arc::new(
            GraphBuilder::new("review-flow")
                .schema(schema())
                .add_step(analyse)
                .add_step(tracing_step("review"))
                .add_step(finish_step())
                .set_entry("analyse")
                .add_fork("analyse", review_router())
                .add_edge("review", "finish")
                .add_end("finish")
                .interrupt_before_from("finish", "review")
                .build()
                .unwrap(),
        )
    }

    fn engine() -> (Engine, Arc<InMemoryCheckpointer>) {
        let store = Arc::new(InMemoryCheckpointer::new());
        let engine = Engine::new(build_graph(tracing_step("analyse")), store.clone());
        (engine, store)
    }

    fn input(needs_review: bool) -> StateUpdate {
        StateUpdate::new()
            .with("input", json!("doc"))
            .with("needs_review", json!(needs_review))
    }

    #[tokio::test]
    async fn test_direct_path_runs_to_end_without_pausing() {
        let (engine, store) = engine();
        let outcome = engine.start("t1", input(false)).await.unwrap();

        assert!(!outcome.is_paused());
        let snapshot = outcome.snapshot();
        assert_eq!(snapshot.status, ThreadStatus::Done);
        assert_eq!(snapshot.next, Some(NextStep::End));
        assert_eq!(snapshot.state.get("output"), Some(&json!("reviewed: none")));
        assert_eq!(snapshot.state.get("trace"), Some(&json!(["analyse"])));

        let history = store.history("t1").await.unwrap();
        let steps: Vec<u64> = history.iter().map(|cp| cp.step).collect();
        assert_eq!(steps, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let (engine, _) = engine();
        let outcome = engine.start("t1", input(true)).await.unwrap();

        assert!(outcome.is_paused());
        assert_eq!(outcome.snapshot().paused_at(), Some("finish"));
        assert_eq!(outcome.snapshot().state.get("output"), None);

        let resumed = engine
            .resume("t1", StateUpdate::new().with("review", json!("approved")))
            .await
            .unwrap();
        let snapshot = resumed.into_snapshot();
        assert_eq!(snapshot.status, ThreadStatus::Done);
        assert_eq!(snapshot.state.get("output"), Some(&json!("reviewed: approved")));
        assert_eq!(snapshot.state.get("trace"), Some(&json!(["analyse", "review"])));
    }

    #[tokio::test]
    async fn test_double_resume_is_rejected_without_mutation() {
        let (engine, store) = engine();
        engine.start("t1", input(true)).await.unwrap();
        engine.resume("t1", StateUpdate::new()).await.unwrap();

        let before = store.get("t1").await.unwrap().unwrap();
        let err = engine
            .resume("t1", StateUpdate::new().with("review", json!("again")))
            .await
            .unwrap_err();

        assert!(err.is_protocol_violation());
        assert_eq!(store.get("t1").await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let (engine, _) = engine();
        engine.start("t1", input(true)).await.unwrap();

        match engine.start("t1", input(false)).await {
            Err(EngineError::Protocol(ProtocolViolation::InvalidStateTransition {
                operation,
                status,
                ..
            })) => {
                assert_eq!(operation, "start");
                assert_eq!(status, ThreadStatus::Paused);
            }
            other => panic!("expected protocol violation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resume_unknown_thread_is_rejected() {
        let (engine, store) = engine();
        let err = engine.resume("ghost", StateUpdate::new()).await.unwrap_err();
        assert!(err.is_protocol_violation());
        assert!(store.get("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_input_writes_nothing() {
        let (engine, store) = engine();
        let err = engine
            .start("t1", StateUpdate::new().with("bogus", json!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        assert!(store.get("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_resume_override_is_rejected() {
        let (engine, store) = engine();
        engine.start("t1", input(true)).await.unwrap();
        let before = store.get("t1").await.unwrap().unwrap();

        let err = engine
            .resume("t1", StateUpdate::new().with("review", json!(42)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        assert_eq!(store.get("t1").await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn test_status_of_unknown_thread_is_ready() {
        let (engine, _) = engine();
        let snapshot = engine.status("nobody").await.unwrap();
        assert_eq!(snapshot.status, ThreadStatus::Ready);
        assert!(snapshot.state.is_empty());
    }

    #[tokio::test]
    async fn test_fault_records_failed_checkpoint_and_retry_recovers() {
        let healthy = Arc::new(AtomicBool::new(false));
        let flag = healthy.clone();
        let analyse: Arc<dyn Step> = Arc::new(FnStep::new("analyse", move |_| {
            let ok = flag.load(Ordering::SeqCst);
            async move {
                if ok {
                    Ok(StateUpdate::new().with("trace", json!(["analyse"])))
                } else {
                    Err(StepError::fault("backend exploded"))
                }
            }
        }));

        let store = Arc::new(InMemoryCheckpointer::new());
        let engine = Engine::new(build_graph(analyse), store.clone());

        match engine.start("t1", input(false)).await {
            Err(EngineError::StepFault { step, message, .. }) => {
                assert_eq!(step, "analyse");
                assert_eq!(message, "backend exploded");
            }
            other => panic!("expected step fault, got {:?}", other),
        }

        let failed = engine.status("t1").await.unwrap();
        assert_eq!(failed.status, ThreadStatus::Failed);
        assert_eq!(failed.next, Some(NextStep::step("analyse")));
        assert_eq!(failed.state.get("input"), Some(&json!("doc")));
        assert_eq!(failed.fault.as_ref().unwrap().step, "analyse");

        let err = engine.resume("t1", StateUpdate::new()).await.unwrap_err();
        assert!(err.is_protocol_violation());

        healthy.store(true, Ordering::SeqCst);
        let outcome = engine.retry("t1").await.unwrap();
        assert_eq!(outcome.snapshot().status, ThreadStatus::Done);
    }

    #[tokio::test]
    async fn test_panic_is_caught_as_fault() {
        let analyse: Arc<dyn Step> = Arc::new(FnStep::new("analyse", |_| async {
            if true {
                panic!("kaboom");
            }
            Ok(StateUpdate::new())
        }));
        let engine = Engine::new(build_graph(analyse), Arc::new(InMemoryCheckpointer::new()));

        match engine.start("t1", input(false)).await {
            Err(EngineError::StepFault { message, .. }) => assert!(message.contains("kaboom")),
            other => panic!("expected step fault, got {:?}", other),
        }
        assert_eq!(engine.status("t1").await.unwrap().status, ThreadStatus::Failed);
    }

    #[tokio::test]
    async fn test_undeclared_field_from_step_is_fault() {
        let analyse: Arc<dyn Step> = Arc::new(FnStep::new("analyse", |_| async {
            Ok(StateUpdate::new().with("surprise", json!("x")))
        }));
        let engine = Engine::new(build_graph(analyse), Arc::new(InMemoryCheckpointer::new()));

        let err = engine.start("t1", input(false)).await.unwrap_err();
        assert!(matches!(err, EngineError::StepFault { .. }));
        let state = engine.state("t1").await.unwrap();
        assert!(!state.contains("surprise"));
    }

    #[tokio::test]
    async fn test_router_outside_targets_is_fault() {
        let graph = GraphBuilder::new("bad-router")
            .add_step(tracing_step("a"))
            .add_step(tracing_step("b"))
            .add_step(tracing_step("c"))
            .set_entry("a")
            .add_fork(
                "a",
                Arc::new(FnRouter::new(&["b", "c"], |_| "z".to_string())),
            )
            .add_end("b")
            .add_end("c")
            .build()
            .unwrap();
        let engine = Engine::new(Arc::new(graph), Arc::new(InMemoryCheckpointer::new()));

        match engine.start("t1", StateUpdate::new()).await {
            Err(EngineError::StepFault { step, message, .. }) => {
                assert_eq!(step, "a");
                assert!(message.contains("'z'"));
            }
            other => panic!("expected step fault, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_router_panic_is_fault() {
        let graph = GraphBuilder::new("panicking-router")
            .add_step(tracing_step("a"))
            .add_step(tracing_step("b"))
            .add_step(tracing_step("c"))
            .set_entry("a")
            .add_fork(
                "a",
                Arc::new(FnRouter::new(&["b", "c"], |_| panic!("router bug"))),
            )
            .add_end("b")
            .add_end("c")
            .build()
            .unwrap();
        let engine = Arc::new(Engine::new(
            Arc::new(graph),
            Arc::new(InMemoryCheckpointer::new()),
        ));

        let driver = engine.clone();
        let joined = tokio::spawn(async move { driver.start("t1", StateUpdate::new()).await }).await;
        match joined.expect("the call must not unwind") {
            Err(EngineError::StepFault { step, message, .. }) => {
                assert_eq!(step, "a");
                assert!(message.contains("router bug"));
            }
            other => panic!("expected step fault, got {:?}", other),
        }

        let snapshot = engine.status("t1").await.unwrap();
        assert_eq!(snapshot.status, ThreadStatus::Failed);
        assert_eq!(snapshot.next, Some(NextStep::step("a")));
        assert_eq!(snapshot.fault.unwrap().step, "a");
    }

    #[tokio::test]
    async fn test_retry_recovers_thread_left_running() {
        let (engine, store) = engine();
        let mut state = StateStore::new();
        state.merge(input(false));
        store
            .put(Checkpoint::initial(
                "t1",
                state,
                NextStep::step("analyse"),
                ThreadStatus::Running,
            ))
            .await
            .unwrap();

        let held = store.lease("t1").unwrap();
        assert!(matches!(
            engine.retry("t1").await,
            Err(EngineError::Protocol(ProtocolViolation::ThreadBusy { .. }))
        ));
        assert_eq!(store.history("t1").await.unwrap().len(), 1);
        drop(held);

        let outcome = engine.retry("t1").await.unwrap();
        let snapshot = outcome.snapshot();
        assert_eq!(snapshot.status, ThreadStatus::Done);
        assert_eq!(snapshot.state.get("output"), Some(&json!("reviewed: none")));
    }

    #[tokio::test]
    async fn test_file_lease_blocks_writer_sharing_the_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let driving = Arc::new(FileCheckpointer::new(dir.path()));
        let other = Engine::new(
            build_graph(tracing_step("analyse")),
            Arc::new(FileCheckpointer::new(dir.path())),
        );

        let mut state = StateStore::new();
        state.merge(input(false));
        driving
            .put(Checkpoint::initial(
                "t1",
                state,
                NextStep::step("analyse"),
                ThreadStatus::Running,
            ))
            .await
            .unwrap();

        let held = driving.lease("t1").unwrap();
        assert!(matches!(
            other.retry("t1").await,
            Err(EngineError::Protocol(ProtocolViolation::ThreadBusy { .. }))
        ));
        assert_eq!(driving.history("t1").await.unwrap().len(), 1);

        drop(held);
        let outcome = other.retry("t1").await.unwrap();
        assert_eq!(outcome.snapshot().status, ThreadStatus::Done);
    }

    #[tokio::test]
    async fn test_events_follow_each_checkpoint() {
        let (engine, _) = engine();
        let mut events = engine.subscribe();
        engine.start("t1", input(true)).await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        let summary: Vec<(u64, Option<&str>, ThreadStatus)> = seen
            .iter()
            .map(|e| (e.checkpoint, e.step.as_deref(), e.status))
            .collect();
        assert_eq!(
            summary,
            vec![
                (0, None, ThreadStatus::Running),
                (1, Some("analyse"), ThreadStatus::Running),
                (2, Some("review"), ThreadStatus::Paused),
            ]
        );
        assert!(seen.iter().all(|e| e.thread_id == "t1"));
        assert_eq!(seen[2].next, NextStep::step("finish"));
    }

    #[tokio::test]
    async fn test_fault_is_published() {
        let analyse: Arc<dyn Step> = Arc::new(FnStep::new("analyse", |_| async {
            Err(StepError::fault("down"))
        }));
        let engine = Engine::new(build_graph(analyse), Arc::new(InMemoryCheckpointer::new()));
        let mut events = engine.subscribe();
        assert!(engine.start("t1", input(false)).await.is_err());

        let mut last = None;
        while let Ok(event) = events.try_recv() {
            last = Some(event);
        }
        let last = last.unwrap();
        assert_eq!(last.status, ThreadStatus::Failed);
        assert_eq!(last.step.as_deref(), Some("analyse"));
    }

    #[tokio::test]
    async fn test_concurrent_call_is_thread_busy() {
        let (engine, store) = engine();
        let _held = store.lease("t1").unwrap();

        let err = engine.start("t1", input(false)).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Protocol(ProtocolViolation::ThreadBusy { .. })
        ));
        assert!(store.get("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fresh_engine_resumes_from_checkpoint() {
        let store = Arc::new(InMemoryCheckpointer::new());
        let first = Engine::new(build_graph(tracing_step("analyse")), store.clone());
        first.start("t1", input(true)).await.unwrap();
        drop(first);

        let second = Engine::new(build_graph(tracing_step("analyse")), store.clone());
        assert_eq!(
            second.status("t1").await.unwrap().paused_at(),
            Some("finish")
        );
        let outcome = second.resume("t1", StateUpdate::new()).await.unwrap();
        assert_eq!(outcome.snapshot().status, ThreadStatus::Done);
    }

    #[tokio::test]
    async fn test_threads_are_independent() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();
        let analyse: Arc<dyn Step> = Arc::new(FnStep::new("analyse", move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            async { Ok(StateUpdate::new()) }
        }));
        let engine = Arc::new(Engine::new(
            build_graph(analyse),
            Arc::new(InMemoryCheckpointer::new()),
        ));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.start(&format!("t{}", i), input(false)).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert_eq!(engine.list_threads().await.unwrap().len(), 4);
    }
}
