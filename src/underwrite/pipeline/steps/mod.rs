// SPDX-License-Identifier: MIT

//! The seven steps of the underwriting graph
//!
//! Collaborator failures are folded into the `error` field and never fault
//! the thread. Only a broken precondition (see
//! [`crate::underwrite::pipeline::config::EmptyExtractionPolicy`]) returns
//! a [`StepError`](crate::underwrite::engine::error::StepError).

pub mod case_study_search;
pub mod check_completeness;
pub mod extract_text;
pub mod gather_info;
pub mod generate_decision;
pub mod user_prompt;
pub mod web_search;

pub use case_study_search::CaseStudySearchStep;
pub use check_completeness::CheckCompletenessStep;
pub use extract_text::ExtractTextStep;
pub use gather_info::GatherInfoStep;
pub use generate_decision::GenerateDecisionStep;
pub use user_prompt::UserPromptStep;
pub use web_search::WebSearchStep;

/// The first `max` characters of `text`, never splitting a UTF-8 sequence
pub(crate) fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}
