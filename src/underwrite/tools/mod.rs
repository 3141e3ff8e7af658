// SPDX-License-Identifier: MIT

//! Collaborators the underwriting steps call through the [`crate::adk::tool::Tool`] seam

pub mod ocr;
pub mod registry;
pub mod tavily;
pub mod vertex_search;

pub use ocr::GeminiOcrTool;
pub use registry::ToolRegistry;
pub use tavily::TavilySearchTool;
pub use vertex_search::{DatastoreLocation, VertexSearchTool};
