// SPDX-License-Identifier: MIT

//! Checkpoint persistence
//!
//! A [`Checkpoint`] is an immutable snapshot of one thread: its full state,
//! the step counter, the execution cursor and the thread's status. Every
//! step writes a new checkpoint; the highest-numbered one is authoritative.
//!
//! Two backends are provided:
//! - [`InMemoryCheckpointer`] - process-local, for tests and one-shot runs
//! - [`FileCheckpointer`] - one JSON file per checkpoint, crash-durable

mod file;
mod memory;

pub use file::FileCheckpointer;
pub use memory::InMemoryCheckpointer;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::error::{CheckpointError, EngineError, ProtocolViolation};
use super::graph::NextStep;
use super::state::StateStore;

/// Lifecycle status of a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    /// No checkpoint has been written yet
    Ready,
    Running,
    /// Stopped before an interrupt step, waiting for `resume`
    Paused,
    Done,
    /// A step faulted; the last good state is retained
    Failed,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadStatus::Ready => "ready",
            ThreadStatus::Running => "running",
            ThreadStatus::Paused => "paused",
            ThreadStatus::Done => "done",
            ThreadStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The step and message of the fault behind a `failed` checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFaultRecord {
    pub step: String,
    pub message: String,
}

/// Snapshot of one thread after a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    pub step: u64,
    pub state: StateStore,
    pub next: NextStep,
    pub status: ThreadStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<StepFaultRecord>,
}

impl Checkpoint {
    /// Checkpoint 0 of a thread
    pub fn initial(thread_id: &str, state: StateStore, next: NextStep, status: ThreadStatus) -> Self {
        Self {
            thread_id: thread_id.to_string(),
            step: 0,
            state,
            next,
            status,
            created_at: Utc::now(),
            fault: None,
        }
    }

    /// The checkpoint that follows this one
    pub fn advance(&self, state: StateStore, next: NextStep, status: ThreadStatus) -> Self {
        Self {
            thread_id: self.thread_id.clone(),
            step: self.step + 1,
            state,
            next,
            status,
            created_at: Utc::now(),
            fault: None,
        }
    }

    /// A `failed` checkpoint that keeps this one's state and cursor
    pub fn failed(&self, step: &str, message: &str) -> Self {
        Self {
            thread_id: self.thread_id.clone(),
            step: self.step + 1,
            state: self.state.clone(),
            next: self.next.clone(),
            status: ThreadStatus::Failed,
            created_at: Utc::now(),
            fault: Some(StepFaultRecord {
                step: step.to_string(),
                message: message.to_string(),
            }),
        }
    }
}

type LockMap = HashMap<String, Arc<AsyncMutex<()>>>;

/// Exclusive right to drive one thread, released on drop
pub struct ThreadLease {
    thread_id: String,
    guard: Option<OwnedMutexGuard<()>>,
    registry: Arc<Mutex<LockMap>>,
    /// OS lock file held for backends shared between processes
    file_lock: Option<std::fs::File>,
}

impl ThreadLease {
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Keep `file` (already locked) open for the lifetime of the lease
    pub(crate) fn with_file_lock(mut self, file: std::fs::File) -> Self {
        self.file_lock = Some(file);
        self
    }

    pub fn holds_file_lock(&self) -> bool {
        self.file_lock.is_some()
    }
}

impl Drop for ThreadLease {
    fn drop(&mut self) {
        // Closing the file releases the OS lock
        self.file_lock.take();
        drop(self.guard.take());

        let mut locks = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        let unused = locks
            .get(&self.thread_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if unused {
            locks.remove(&self.thread_id);
        }
    }
}

impl fmt::Debug for ThreadLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadLease")
            .field("thread_id", &self.thread_id)
            .field("file_lock", &self.file_lock.is_some())
            .finish()
    }
}

/// Per-thread async mutexes backing [`Checkpointer::lease`] within one
/// process. An entry lives only while some lease or acquirer holds it.
#[derive(Default)]
pub struct ThreadLocks {
    locks: Arc<Mutex<LockMap>>,
}

impl ThreadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lease without waiting; a held lease is `ThreadBusy`
    pub fn try_acquire(&self, thread_id: &str) -> Result<ThreadLease, ProtocolViolation> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        let lock = locks
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();

        let guard = lock
            .try_lock_owned()
            .map_err(|_| ProtocolViolation::ThreadBusy {
                thread_id: thread_id.to_string(),
            })?;
        drop(locks);

        Ok(ThreadLease {
            thread_id: thread_id.to_string(),
            guard: Some(guard),
            registry: self.locks.clone(),
            file_lock: None,
        })
    }

    /// Number of threads with a live lease
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Durable storage of thread checkpoints.
///
/// Implementations must reject a `put` whose step is not greater than the
/// latest stored step for that thread, and must make the checkpoint readable
/// by `get` before `put` returns.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Persist a checkpoint
    async fn put(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError>;

    /// Latest checkpoint of a thread, `None` when the thread was never started
    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Every checkpoint of a thread, ordered by step
    async fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>, CheckpointError>;

    /// Ids of all stored threads, sorted
    async fn list_threads(&self) -> Result<Vec<String>, CheckpointError>;

    /// Remove every checkpoint of a thread
    async fn delete(&self, thread_id: &str) -> Result<(), CheckpointError>;

    /// Take the single-writer lease of a thread without waiting.
    ///
    /// A lease held by another call, in this process or in another process
    /// sharing the same storage, is [`ProtocolViolation::ThreadBusy`].
    fn lease(&self, thread_id: &str) -> Result<ThreadLease, EngineError>;
}

/// Reject `checkpoint` unless it comes strictly after `latest`
pub(crate) fn check_order(
    checkpoint: &Checkpoint,
    latest: Option<u64>,
) -> Result<(), CheckpointError> {
    match latest {
        Some(latest) if checkpoint.step <= latest => Err(CheckpointError::Stale {
            thread_id: checkpoint.thread_id.clone(),
            step: checkpoint.step,
            latest,
        }),
        _ => Ok(()),
    }
}
