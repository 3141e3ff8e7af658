// SPDX-License-Identifier: MIT

//! Volatile, process-local checkpoint storage

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{check_order, Checkpoint, Checkpointer, ThreadLease, ThreadLocks};
use crate::underwrite::engine::error::{CheckpointError, EngineError};

/// Keeps the full history of every thread in memory
#[derive(Default)]
pub struct InMemoryCheckpointer {
    threads: RwLock<BTreeMap<String, Vec<Checkpoint>>>,
    locks: ThreadLocks,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> CheckpointError {
        CheckpointError::backend("in-memory checkpoint store lock poisoned")
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn put(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError> {
        let mut threads = self.threads.write().map_err(|_| Self::poisoned())?;
        let history = threads.entry(checkpoint.thread_id.clone()).or_default();
        check_order(&checkpoint, history.last().map(|cp| cp.step))?;
        history.push(checkpoint);
        Ok(())
    }

    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let threads = self.threads.read().map_err(|_| Self::poisoned())?;
        Ok(threads.get(thread_id).and_then(|h| h.last().cloned()))
    }

    async fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>, CheckpointError> {
        let threads = self.threads.read().map_err(|_| Self::poisoned())?;
        Ok(threads.get(thread_id).cloned().unwrap_or_default())
    }

    async fn list_threads(&self) -> Result<Vec<String>, CheckpointError> {
        let threads = self.threads.read().map_err(|_| Self::poisoned())?;
        Ok(threads.keys().cloned().collect())
    }

    async fn delete(&self, thread_id: &str) -> Result<(), CheckpointError> {
        let mut threads = self.threads.write().map_err(|_| Self::poisoned())?;
        threads.remove(thread_id);
        Ok(())
    }

    fn lease(&self, thread_id: &str) -> Result<ThreadLease, EngineError> {
        Ok(self.locks.try_acquire(thread_id)?)
    }
}
