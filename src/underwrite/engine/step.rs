// SPDX-License-Identifier: MIT

//! The unit of work the engine sequences

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;

use super::error::StepError;
use super::state::{StateStore, StateUpdate};

/// A named step of a pipeline graph.
///
/// A step reads the thread's state and returns the partial update to merge.
/// Collaborator failures belong in the update's `error` field; a returned
/// `StepError` (or a panic) is a fault that fails the current call.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, state: &StateStore) -> Result<StateUpdate, StepError>;
}

type StepFuture = Pin<Box<dyn Future<Output = Result<StateUpdate, StepError>> + Send>>;

/// A step backed by a closure over an owned copy of the state
pub struct FnStep {
    name: String,
    func: Box<dyn Fn(StateStore) -> StepFuture + Send + Sync>,
}

impl FnStep {
    pub fn new<F, Fut>(name: &str, func: F) -> Self
    where
        F: Fn(StateStore) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StateUpdate, StepError>> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            func: Box::new(move |state| Box::pin(func(state))),
        }
    }
}

#[async_trait]
impl Step for FnStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, state: &StateStore) -> Result<StateUpdate, StepError> {
        (self.func)(state.clone()).await
    }
}
