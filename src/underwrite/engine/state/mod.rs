// SPDX-License-Identifier: MIT

//! State management for pipeline threads
//!
//! This module provides:
//! - `StateSchema` - declares the fixed set of fields and their types
//! - `StateStore` - the ordered, merge-only state of one thread
//! - `StateUpdate` - the partial mapping a step or caller writes

mod schema;
mod store;

pub use schema::{FieldType, StateFieldDef, StateSchema};
pub use store::{StateStore, StateUpdate};
