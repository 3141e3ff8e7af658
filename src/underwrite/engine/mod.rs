// SPDX-License-Identifier: MIT

//! Resumable step-graph engine
//!
//! The engine sequences named [`Step`]s over a shared [`StateStore`],
//! persists a [`Checkpoint`] after every step, and can stop before an
//! interrupt point so a human can supply input before it is resumed.

pub mod checkpoint;
pub mod error;
pub mod graph;
pub mod router;
pub mod state;
pub mod step;

pub use checkpoint::{
    Checkpoint, Checkpointer, FileCheckpointer, InMemoryCheckpointer, ThreadLease, ThreadStatus,
};
pub use error::{CheckpointError, EngineError, GraphError, ProtocolViolation, StateError, StepError};
pub use graph::{
    Engine, GraphBuilder, GraphDefinition, NextStep, RunOutcome, StepEvent, ThreadSnapshot,
};
pub use router::{FnRouter, Router};
pub use state::{FieldType, StateSchema, StateStore, StateUpdate};
pub use step::{FnStep, Step};
