// SPDX-License-Identifier: MIT

//! Collaborator kit: the model and tool seams steps call through, plus the
//! crate's top-level error type.

pub mod error;
pub mod model;
pub mod tool;
