// SPDX-License-Identifier: MIT

//! JSON-file checkpoint storage
//!
//! Layout: `<root>/<thread_id>/<step:010>.json`. Each checkpoint is written to
//! a temporary file, fsynced, renamed into place, and the directory is
//! fsynced after the rename, so a reader never sees a partial checkpoint and
//! a returned `put` survives a crash.
//!
//! Leases are OS file locks on `<root>/.locks/<thread_id>.lock`, so several
//! processes can share one root with a single writer per thread.

use async_trait::async_trait;
use fs4::fs_std::FileExt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{check_order, Checkpoint, Checkpointer, ThreadLease, ThreadLocks};
use crate::underwrite::engine::error::{CheckpointError, EngineError, ProtocolViolation};

const EXTENSION: &str = "json";
const LOCK_DIR: &str = ".locks";

pub struct FileCheckpointer {
    root: PathBuf,
    locks: ThreadLocks,
}

impl FileCheckpointer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: ThreadLocks::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn thread_dir(&self, thread_id: &str) -> Result<PathBuf, CheckpointError> {
        validate_thread_id(thread_id)?;
        Ok(self.root.join(thread_id))
    }

    /// Step numbers stored for a thread, ascending
    async fn steps(&self, dir: &Path) -> Result<Vec<u64>, CheckpointError> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut steps = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(step) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                steps.push(step);
            }
        }
        steps.sort_unstable();
        Ok(steps)
    }

    async fn read(&self, dir: &Path, step: u64) -> Result<Checkpoint, CheckpointError> {
        let bytes = fs::read(checkpoint_path(dir, step)).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Open and exclusively lock the thread's lock file without waiting
    fn lock_file(&self, thread_id: &str) -> Result<Option<std::fs::File>, CheckpointError> {
        let dir = self.root.join(LOCK_DIR);
        std::fs::create_dir_all(&dir)?;
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(format!("{}.lock", thread_id)))?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(file)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Flush a directory entry change (create, rename) to disk
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> Result<(), CheckpointError> {
    fs::File::open(dir).await?.sync_all().await?;
    Ok(())
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> Result<(), CheckpointError> {
    Ok(())
}

fn checkpoint_path(dir: &Path, step: u64) -> PathBuf {
    dir.join(format!("{:010}.{}", step, EXTENSION))
}

/// Thread ids become directory names, so only a safe alphabet is accepted
fn validate_thread_id(thread_id: &str) -> Result<(), CheckpointError> {
    let valid = !thread_id.is_empty()
        && thread_id.len() <= 128
        && thread_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CheckpointError::InvalidThreadId(thread_id.to_string()))
    }
}

#[async_trait]
impl Checkpointer for FileCheckpointer {
    async fn put(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError> {
        let dir = self.thread_dir(&checkpoint.thread_id)?;
        if !fs::try_exists(&dir).await? {
            fs::create_dir_all(&dir).await?;
            sync_dir(&self.root).await?;
        }
        check_order(&checkpoint, self.steps(&dir).await?.last().copied())?;

        let body = serde_json::to_vec_pretty(&checkpoint)?;
        let target = checkpoint_path(&dir, checkpoint.step);
        let tmp = dir.join(format!(".{:010}.tmp", checkpoint.step));

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, &target).await?;
        sync_dir(&dir).await?;

        log::debug!(
            "Checkpoint {} written for thread '{}' ({})",
            checkpoint.step,
            checkpoint.thread_id,
            checkpoint.status
        );
        Ok(())
    }

    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let dir = self.thread_dir(thread_id)?;
        match self.steps(&dir).await?.last() {
            Some(&step) => Ok(Some(self.read(&dir, step).await?)),
            None => Ok(None),
        }
    }

    async fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>, CheckpointError> {
        let dir = self.thread_dir(thread_id)?;
        let mut history = Vec::new();
        for step in self.steps(&dir).await? {
            history.push(self.read(&dir, step).await?);
        }
        Ok(history)
    }

    async fn list_threads(&self) -> Result<Vec<String>, CheckpointError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut threads = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_thread_id(name).is_ok() {
                    threads.push(name.to_string());
                }
            }
        }
        threads.sort();
        Ok(threads)
    }

    async fn delete(&self, thread_id: &str) -> Result<(), CheckpointError> {
        let dir = self.thread_dir(thread_id)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn lease(&self, thread_id: &str) -> Result<ThreadLease, EngineError> {
        validate_thread_id(thread_id)?;
        let lease = self.locks.try_acquire(thread_id)?;

        match self.lock_file(thread_id)? {
            Some(file) => Ok(lease.with_file_lock(file)),
            None => {
                log::warn!("Thread '{}' is locked by another process", thread_id);
                Err(ProtocolViolation::ThreadBusy {
                    thread_id: thread_id.to_string(),
                }
                .into())
            }
        }
    }
}
