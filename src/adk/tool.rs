// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde_json::Value;
use std::error::Error;

/// Trait for external collaborators invoked by pipeline steps.
///
/// A collaborator takes a JSON record and either returns a success payload or
/// fails with a reason. Steps decide how a failure is folded into state; the
/// engine never calls a tool directly.
///
/// # Optimization Notes
/// - `name()` and `description()` return `&str` to avoid allocation on every call
/// - `schema()` returns `&Value` to avoid cloning the schema on every access
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the tool name (must be unique within a registry)
    fn name(&self) -> &str;

    /// Returns a human-readable description of what the tool does
    fn description(&self) -> &str;

    /// Returns the JSON schema for the tool's input record
    fn schema(&self) -> &Value;

    /// Execute the tool with the given input and return the result
    async fn execute(&self, input: Value) -> Result<Value, Box<dyn Error + Send + Sync>>;
}
