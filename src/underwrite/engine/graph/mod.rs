// SPDX-License-Identifier: MIT

//! Step graphs: definition, construction and execution

mod builder;
mod executor;
mod types;

pub use builder::GraphBuilder;
pub use executor::{Engine, RunOutcome, StepEvent, ThreadSnapshot};
pub use types::{Fork, GraphDefinition, InterruptPoint, NextStep};
