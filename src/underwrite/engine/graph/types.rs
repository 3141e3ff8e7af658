// SPDX-License-Identifier: MIT

//! Graph definition types
//!
//! A [`GraphDefinition`] is built once by [`super::GraphBuilder`], validated,
//! and then shared read-only between every thread the engine drives.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::underwrite::engine::router::Router;
use crate::underwrite::engine::state::{StateSchema, StateStore};
use crate::underwrite::engine::step::Step;

/// Execution cursor: the step to run next, or the terminal marker
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextStep {
    Step(String),
    End,
}

impl NextStep {
    pub fn step(name: &str) -> Self {
        NextStep::Step(name.to_string())
    }

    /// Step name, `None` for the terminal marker
    pub fn as_step(&self) -> Option<&str> {
        match self {
            NextStep::Step(name) => Some(name),
            NextStep::End => None,
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, NextStep::End)
    }
}

impl fmt::Display for NextStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NextStep::Step(name) => f.write_str(name),
            NextStep::End => f.write_str("END"),
        }
    }
}

/// A point where the engine stops before running `step`.
///
/// With `only_from` set, the pause applies only when `step` is entered from
/// that predecessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterruptPoint {
    pub step: String,
    pub only_from: Option<String>,
}

impl InterruptPoint {
    pub fn applies(&self, step: &str, from: Option<&str>) -> bool {
        self.step == step
            && match &self.only_from {
                None => true,
                Some(pred) => from == Some(pred.as_str()),
            }
    }
}

/// The single conditional branch of a graph
pub struct Fork {
    pub step: String,
    pub router: Arc<dyn Router>,
}

/// Immutable, validated graph of steps
pub struct GraphDefinition {
    pub(super) name: String,
    pub(super) entry: String,
    pub(super) order: Vec<String>,
    pub(super) steps: HashMap<String, Arc<dyn Step>>,
    pub(super) edges: HashMap<String, NextStep>,
    pub(super) fork: Option<Fork>,
    pub(super) interrupts: Vec<InterruptPoint>,
    pub(super) schema: StateSchema,
}

impl GraphDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Step names in registration order
    pub fn step_names(&self) -> &[String] {
        &self.order
    }

    pub fn step(&self, name: &str) -> Option<&Arc<dyn Step>> {
        self.steps.get(name)
    }

    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    pub fn interrupts(&self) -> &[InterruptPoint] {
        &self.interrupts
    }

    /// Linear successor of a step; `None` for the fork step
    pub fn successor(&self, step: &str) -> Option<&NextStep> {
        self.edges.get(step)
    }

    /// The step after `step`, consulting the router at the fork.
    /// Errors when the router picks a step outside its declared targets.
    pub fn next_after(&self, step: &str, state: &StateStore) -> Result<NextStep, String> {
        if let Some(next) = self.edges.get(step) {
            return Ok(next.clone());
        }

        match &self.fork {
            Some(fork) if fork.step == step => {
                let target = fork.router.route(state);
                if fork.router.targets().iter().any(|t| *t == target) {
                    Ok(NextStep::Step(target))
                } else {
                    Err(format!(
                        "router at '{}' returned '{}', expected one of {:?}",
                        step,
                        target,
                        fork.router.targets()
                    ))
                }
            }
            _ => Err(format!("step '{}' has no outgoing edge", step)),
        }
    }

    /// Whether the engine must pause before entering `step` from `from`
    pub fn pauses_before(&self, step: &str, from: Option<&str>) -> bool {
        self.interrupts.iter().any(|i| i.applies(step, from))
    }
}

impl fmt::Debug for GraphDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphDefinition")
            .field("name", &self.name)
            .field("entry", &self.entry)
            .field("steps", &self.order)
            .field("edges", &self.edges)
            .field("fork", &self.fork.as_ref().map(|f| &f.step))
            .field("interrupts", &self.interrupts)
            .finish()
    }
}
