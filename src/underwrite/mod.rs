// SPDX-License-Identifier: MIT

pub mod engine;
pub mod pipeline;
pub mod server;
pub mod tools;
