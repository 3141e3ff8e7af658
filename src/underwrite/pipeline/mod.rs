// SPDX-License-Identifier: MIT

//! Professional-indemnity underwriting pipeline built on the engine
//!
//! - [`graph`]: the seven steps and how they connect
//! - [`service`]: start, inspect, answer and retry runs
//! - [`progress`]: status lines for each finished step
//! - [`bootstrap`]: wiring from [`config::PipelineConfig`]

pub mod bootstrap;
pub mod config;
pub mod documents;
pub mod fields;
pub mod graph;
pub mod progress;
pub mod router;
pub mod service;
pub mod steps;

pub use bootstrap::build_service;
pub use config::{ConfigLoader, PipelineConfig};
pub use documents::{scan_folder, DocumentScan};
pub use graph::{build_graph, Collaborators};
pub use router::CompletenessRouter;
pub use service::{new_thread_id, PipelineService, RunStatus};
