// SPDX-License-Identifier: MIT

//! Engine error taxonomy
//!
//! - [`GraphError`]: malformed graph definition, raised once at build time
//! - [`StateError`]: an update that does not fit the state schema
//! - [`StepError`]: a step fault, fatal to the current call
//! - [`ProtocolViolation`]: the caller used `start`/`resume`/`retry` out of order
//! - [`CheckpointError`]: the persistence backend failed
//!
//! Collaborator failures are not errors at this level; steps fold them into
//! the `error` state field.

use thiserror::Error;

use super::checkpoint::ThreadStatus;
use super::state::FieldType;

/// Construction-time validation failures of a graph definition
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    #[error("step '{0}' is registered more than once")]
    DuplicateStep(String),

    #[error("step '{0}' is referenced but not registered")]
    UnknownStep(String),

    #[error("graph has no entry step")]
    MissingEntry,

    #[error("graph declares more than one fork: '{first}' and '{second}'")]
    MultipleForks { first: String, second: String },

    #[error("step '{0}' declares more than one outgoing edge")]
    ConflictingEdges(String),

    #[error("fork at '{step}' is invalid: {reason}")]
    InvalidFork { step: String, reason: String },

    #[error("step '{0}' has no outgoing edge")]
    DanglingStep(String),

    #[error("interrupt before '{step}' is invalid: {reason}")]
    InvalidInterrupt { step: String, reason: String },

    #[error("cycle detected: {0:?}")]
    Cycle(Vec<String>),

    #[error("step '{0}' is not reachable from the entry step")]
    UnreachableStep(String),
}

/// An update that does not fit the declared state fields
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StateError {
    #[error("unknown state field '{0}'")]
    UnknownField(String),

    #[error("state field '{field}' expects {expected:?}, got {found}")]
    TypeMismatch {
        field: String,
        expected: FieldType,
        found: String,
    },
}

/// Faults raised by a step's own logic
#[derive(Debug, Error)]
pub enum StepError {
    /// Unexpected internal failure
    #[error("{0}")]
    Fault(String),

    /// A required input is missing and the pipeline is configured to abort
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// The step produced an update the schema rejects
    #[error(transparent)]
    InvalidUpdate(#[from] StateError),
}

impl StepError {
    pub fn fault(message: impl Into<String>) -> Self {
        Self::Fault(message.into())
    }
}

/// Misuse of the engine's call sequence. Never retried, never mutates state.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolViolation {
    #[error("cannot {operation} thread '{thread_id}' while it is {status}")]
    InvalidStateTransition {
        thread_id: String,
        operation: &'static str,
        status: ThreadStatus,
    },

    #[error("thread '{thread_id}' is already being driven by another call")]
    ThreadBusy { thread_id: String },
}

/// Persistence backend failures
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("invalid thread id '{0}'")]
    InvalidThreadId(String),

    #[error("stale checkpoint for thread '{thread_id}': step {step} is not after {latest}")]
    Stale {
        thread_id: String,
        step: u64,
        latest: u64,
    },

    #[error("checkpoint backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl CheckpointError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

/// Errors surfaced by [`super::Engine`] calls
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    #[error("step '{step}' faulted on thread '{thread_id}': {message}")]
    StepFault {
        thread_id: String,
        step: String,
        message: String,
    },

    #[error("invalid input: {0}")]
    InvalidInput(#[from] StateError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

impl EngineError {
    /// True for misuse of the call sequence; retrying the same call will not help
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}
