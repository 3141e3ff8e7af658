// SPDX-License-Identifier: MIT

//! Wiring of the underwriting graph

use std::sync::Arc;

use super::config::PipelineConfig;
use super::fields;
use super::router::CompletenessRouter;
use super::steps::{
    CaseStudySearchStep, CheckCompletenessStep, ExtractTextStep, GatherInfoStep,
    GenerateDecisionStep, UserPromptStep, WebSearchStep,
};
use crate::adk::model::Model;
use crate::underwrite::engine::error::GraphError;
use crate::underwrite::engine::graph::{GraphBuilder, GraphDefinition};
use crate::underwrite::tools::ToolRegistry;

pub const GRAPH_NAME: &str = "pi_underwriting";

/// External collaborators the steps call through
#[derive(Clone, Default)]
pub struct Collaborators {
    /// Used by `check_completeness`; `None` skips the check
    pub completeness_model: Option<Arc<dyn Model>>,
    /// Used by `generate_decision`; `None` writes a placeholder decision
    pub decision_model: Option<Arc<dyn Model>>,
    /// OCR, web search and case-study search tools
    pub tools: ToolRegistry,
}

/// Build the seven-step graph:
///
/// ```text
/// extract_text -> check_completeness -> {user_prompt | gather_info}
/// user_prompt -> || gather_info -> web_search -> case_study_search -> generate_decision -> END
/// ```
///
/// `||` marks the pause: a thread routed through `user_prompt` stops before
/// `gather_info` until input is supplied.
pub fn build_graph(
    config: &PipelineConfig,
    collaborators: &Collaborators,
) -> Result<GraphDefinition, GraphError> {
    let settings = &config.pipeline;

    GraphBuilder::new(GRAPH_NAME)
        .schema(fields::schema())
        .add_step(Arc::new(ExtractTextStep::new(collaborators.tools.clone())))
        .add_step(Arc::new(CheckCompletenessStep::new(
            collaborators.completeness_model.clone(),
            settings.required_fields.clone(),
            settings.on_empty_extraction,
        )))
        .add_step(Arc::new(UserPromptStep))
        .add_step(Arc::new(GatherInfoStep::new(settings.guidelines_path.clone())))
        .add_step(Arc::new(WebSearchStep::new(
            collaborators.tools.clone(),
            config.search.web_max_results,
        )))
        .add_step(Arc::new(CaseStudySearchStep::new(
            collaborators.tools.clone(),
            config.search.case_study_page_size,
        )))
        .add_step(Arc::new(GenerateDecisionStep::new(
            collaborators.decision_model.clone(),
            settings.prompt_template_path.clone(),
        )))
        .set_entry(fields::EXTRACT_TEXT)
        .add_edge(fields::EXTRACT_TEXT, fields::CHECK_COMPLETENESS)
        .add_fork(
            fields::CHECK_COMPLETENESS,
            Arc::new(CompletenessRouter::new(config.routing.clone())),
        )
        .add_edge(fields::USER_PROMPT, fields::GATHER_INFO)
        .add_edge(fields::GATHER_INFO, fields::WEB_SEARCH)
        .add_edge(fields::WEB_SEARCH, fields::CASE_STUDY_SEARCH)
        .add_edge(fields::CASE_STUDY_SEARCH, fields::GENERATE_DECISION)
        .add_end(fields::GENERATE_DECISION)
        .interrupt_before_from(fields::GATHER_INFO, fields::USER_PROMPT)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::underwrite::engine::graph::NextStep;
    use crate::underwrite::engine::state::{StateStore, StateUpdate};
    use serde_json::json;

    fn graph() -> GraphDefinition {
        build_graph(&PipelineConfig::default(), &Collaborators::default()).unwrap()
    }

    #[test]
    fn test_graph_shape() {
        let graph = graph();
        assert_eq!(graph.name(), GRAPH_NAME);
        assert_eq!(graph.entry(), fields::EXTRACT_TEXT);
        assert_eq!(graph.step_names().len(), 7);
        assert_eq!(
            graph.successor(fields::GENERATE_DECISION),
            Some(&NextStep::End)
        );
        assert_eq!(
            graph.successor(fields::USER_PROMPT),
            Some(&NextStep::step(fields::GATHER_INFO))
        );
    }

    #[test]
    fn test_pause_only_after_user_prompt() {
        let graph = graph();
        assert!(graph.pauses_before(fields::GATHER_INFO, Some(fields::USER_PROMPT)));
        assert!(!graph.pauses_before(fields::GATHER_INFO, Some(fields::CHECK_COMPLETENESS)));
        assert!(!graph.pauses_before(fields::EXTRACT_TEXT, None));
    }

    #[test]
    fn test_fork_routes_on_missing_fields() {
        let graph = graph();

        let mut complete = StateStore::new();
        complete.merge(StateUpdate::new().with(fields::MISSING_FIELDS, json!([])));
        assert_eq!(
            graph.next_after(fields::CHECK_COMPLETENESS, &complete),
            Ok(NextStep::step(fields::GATHER_INFO))
        );

        let mut incomplete = StateStore::new();
        incomplete.merge(StateUpdate::new().with(fields::MISSING_FIELDS, json!(["Financials"])));
        assert_eq!(
            graph.next_after(fields::CHECK_COMPLETENESS, &incomplete),
            Ok(NextStep::step(fields::USER_PROMPT))
        );
    }
}
