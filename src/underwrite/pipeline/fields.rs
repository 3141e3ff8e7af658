// SPDX-License-Identifier: MIT

//! State fields of the underwriting graph

use crate::underwrite::engine::state::{FieldType, StateSchema};

pub const DOCUMENT_PATHS: &str = "document_paths";
pub const EXTRACTED_TEXT: &str = "extracted_text";
pub const GUIDELINES: &str = "guidelines";
pub const MISSING_FIELDS: &str = "missing_fields";
pub const EXTRACTED_INFORMATION: &str = "extracted_information";
pub const USER_PROMPT_MESSAGE: &str = "user_prompt_message";
pub const USER_INPUT: &str = "user_input";
pub const GATHERED_CONTEXT: &str = "gathered_context";
pub const TAVILY_RESULTS: &str = "tavily_results";
pub const CASE_STUDY_RESULTS: &str = "case_study_results";
pub const UNDERWRITING_DECISION: &str = "underwriting_decision";
pub const RATE_CARD: &str = "rate_card";
pub const REASONING: &str = "reasoning";
pub const OUTPUT: &str = "output";
pub const ERROR: &str = "error";

/// Step names
pub const EXTRACT_TEXT: &str = "extract_text";
pub const CHECK_COMPLETENESS: &str = "check_completeness";
pub const USER_PROMPT: &str = "user_prompt";
pub const GATHER_INFO: &str = "gather_info";
pub const WEB_SEARCH: &str = "web_search";
pub const CASE_STUDY_SEARCH: &str = "case_study_search";
pub const GENERATE_DECISION: &str = "generate_decision";

pub fn schema() -> StateSchema {
    StateSchema::new()
        .field(DOCUMENT_PATHS, FieldType::Array, "Paths of the page images to process")
        .field(EXTRACTED_TEXT, FieldType::String, "OCR text of all documents")
        .field(GUIDELINES, FieldType::String, "Underwriting guideline text")
        .field(MISSING_FIELDS, FieldType::Any, "Required fields not found in the documents")
        .field(EXTRACTED_INFORMATION, FieldType::String, "Structured summary of the documents")
        .field(USER_PROMPT_MESSAGE, FieldType::String, "Request shown to the human")
        .field(USER_INPUT, FieldType::String, "The human's reply, or SKIP")
        .field(GATHERED_CONTEXT, FieldType::String, "Consolidated context for the decision")
        .field(TAVILY_RESULTS, FieldType::String, "Formatted web search results")
        .field(CASE_STUDY_RESULTS, FieldType::String, "Formatted case studies")
        .field(UNDERWRITING_DECISION, FieldType::String, "Approve, decline or refer")
        .field(RATE_CARD, FieldType::Object, "Pricing information")
        .field(REASONING, FieldType::String, "Explanation of the decision")
        .field(OUTPUT, FieldType::String, "Final model output")
        .field(ERROR, FieldType::String, "Last collaborator error")
}
