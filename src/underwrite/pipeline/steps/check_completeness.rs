// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::adk::model::{Content, GenerationConfig, Model};
use crate::underwrite::engine::error::StepError;
use crate::underwrite::engine::state::{StateStore, StateUpdate};
use crate::underwrite::engine::step::Step;
use crate::underwrite::pipeline::config::EmptyExtractionPolicy;
use crate::underwrite::pipeline::fields;

const TEMPERATURE: f32 = 0.1;

const EXTRACTION_PROMPT: &str = r#"
You are an expert business analyst tasked with extracting and organizing key information from a detailed business description. Your goal is to provide a structured summary of the business based on specific categories.

Here is the business description you need to analyze:

<business_description>
{text}
</business_description>

Your task is to carefully read through this description and extract relevant information for the following categories:

{categories}

Instructions:
1. Analyze the text thoroughly, identifying information relevant to each category.
2. Extract and organize the information into bullet points under each category heading.
3. If specific information for a category or subcategory is not present in the text, write "Information not provided" for that item.
4. After completing the extraction, create a list of any fields or subcategories for which information was not available in the text.

Before providing your final output, break down your thought process for each category inside <information_breakdown> tags. In your breakdown:
1. List all the categories and potential subcategories you need to look for.
2. For each category quote relevant text from the business description, identify ambiguities, and note relevant subcategories that are not mentioned.

After your breakdown, provide your extracted information in the following format:

<extracted_information>
1. {first_category}:
   • [Extracted information]
   ...

[Continue with remaining categories]
</extracted_information>

<missing_fields>
[List any fields or subcategories for which information was not provided, one per line. Write "None" if nothing is missing.]
</missing_fields>

Be thorough in your extraction. If you encounter ambiguous information, include it and note the ambiguity. Do not add any information that is not explicitly stated or directly implied in the given business description.
"#;

/// Lines the model uses to say "nothing is missing"
const NOTHING_MISSING: [&str; 9] = [
    "none",
    "n/a",
    "na",
    "nil",
    "nothing",
    "no missing fields",
    "none missing",
    "all fields provided",
    "all information provided",
];

/// Asks the model to summarise the documents per required category and to
/// list the categories it could not find
pub struct CheckCompletenessStep {
    model: Option<Arc<dyn Model>>,
    required_fields: Vec<String>,
    on_empty: EmptyExtractionPolicy,
}

impl CheckCompletenessStep {
    pub fn new(
        model: Option<Arc<dyn Model>>,
        required_fields: Vec<String>,
        on_empty: EmptyExtractionPolicy,
    ) -> Self {
        Self {
            model,
            required_fields,
            on_empty,
        }
    }

    fn prompt(&self, text: &str) -> String {
        let categories = self
            .required_fields
            .iter()
            .enumerate()
            .map(|(i, f)| format!("{}. {}", i + 1, f))
            .collect::<Vec<_>>()
            .join("\n");
        EXTRACTION_PROMPT
            .replace("{categories}", &categories)
            .replace("{first_category}", &self.required_fields[0])
            .replace("{text}", text)
    }

    fn all_missing(&self) -> Value {
        json!(self.required_fields)
    }
}

/// Text between the last `<tag>` and the following `</tag>`.
/// Without an opening tag the whole response is used.
pub fn tagged_section<'a>(response: &'a str, tag: &str) -> &'a str {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let after = match response.rfind(&open) {
        Some(i) => &response[i + open.len()..],
        None => response,
    };
    match after.find(&close) {
        Some(i) => &after[..i],
        None => after,
    }
}

/// Turn the model's `<missing_fields>` text into a list of field names
pub fn parse_missing_fields(section: &str) -> Vec<String> {
    section
        .lines()
        .map(strip_list_marker)
        .filter(|line| !line.is_empty())
        .filter(|line| {
            let normalized = line.trim_end_matches('.').to_ascii_lowercase();
            !NOTHING_MISSING.contains(&normalized.as_str())
        })
        .map(str::to_string)
        .collect()
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    let line = line
        .strip_prefix(['-', '*', '•'])
        .map(str::trim_start)
        .unwrap_or(line);

    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix(['.', ')']) {
            return rest.trim_start();
        }
    }
    line
}

#[async_trait]
impl Step for CheckCompletenessStep {
    fn name(&self) -> &str {
        fields::CHECK_COMPLETENESS
    }

    async fn run(&self, state: &StateStore) -> Result<StateUpdate, StepError> {
        let Some(text) = state.non_empty_str(fields::EXTRACTED_TEXT) else {
            log::warn!("Extracted text is empty, cannot perform completeness check");
            if self.on_empty == EmptyExtractionPolicy::Abort {
                return Err(StepError::Precondition(
                    "extracted text is empty".to_string(),
                ));
            }
            return Ok(StateUpdate::new()
                .with(fields::MISSING_FIELDS, self.all_missing())
                .with(fields::EXTRACTED_INFORMATION, json!(""))
                .with(fields::ERROR, json!("Extracted text was empty.")));
        };

        if self.required_fields.is_empty() {
            log::warn!("No required fields configured, skipping completeness check");
            return Ok(StateUpdate::new()
                .with(fields::MISSING_FIELDS, json!([]))
                .with(fields::EXTRACTED_INFORMATION, json!(text))
                .with(fields::ERROR, Value::Null));
        }

        let Some(model) = &self.model else {
            log::warn!("No model configured, skipping completeness check");
            return Ok(StateUpdate::new()
                .with(fields::MISSING_FIELDS, json!([]))
                .with(fields::EXTRACTED_INFORMATION, json!(text))
                .with(
                    fields::ERROR,
                    json!("Skipped completeness check: no model configured."),
                ));
        };

        let request = [Content::user_text(self.prompt(text))];
        let config = GenerationConfig::with_temperature(TEMPERATURE);
        let response = match model.generate_content(&request, Some(&config)).await {
            Ok(content) => content.text(),
            Err(e) => {
                log::error!("Completeness check failed: {}", e);
                return Ok(StateUpdate::new()
                    .with(fields::MISSING_FIELDS, self.all_missing())
                    .with(fields::EXTRACTED_INFORMATION, json!(text))
                    .with(fields::ERROR, json!(format!("Completeness check failed: {}", e))));
            }
        };

        let extracted = tagged_section(&response, "extracted_information").trim();
        let missing = parse_missing_fields(tagged_section(&response, "missing_fields"));
        log::info!("Completeness check found {} missing field(s)", missing.len());

        Ok(StateUpdate::new()
            .with(fields::MISSING_FIELDS, json!(missing))
            .with(fields::EXTRACTED_INFORMATION, json!(extracted))
            .with(fields::ERROR, Value::Null))
    }
}
