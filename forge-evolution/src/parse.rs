//! Extraction of a candidate tool from a model answer.

use forge_primitives::ToolName;
use forge_sandbox::CandidateTool;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{GenerationError, GenerationResult};

const DEFAULT_CATEGORY: &str = "generated";

static FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)```")
        .unwrap_or_else(|err| panic!("fence pattern must compile: {err}"))
});

/// Returns the JSON text of an answer: the first fenced block if any,
/// otherwise the span from the first `{` to the last `}`.
#[must_use]
pub fn extract_json(answer: &str) -> Option<&str> {
    if let Some(captures) = FENCE.captures(answer) {
        if let Some(body) = captures.get(1) {
            let body = body.as_str().trim();
            if !body.is_empty() {
                return Some(body);
            }
        }
    }

    let start = answer.find('{')?;
    let end = answer.rfind('}')?;
    (end > start).then(|| &answer[start..=end])
}

/// Parses a model answer into a candidate named `tool_name`.
///
/// The answer's own `name` must be present but is replaced by `tool_name`.
///
/// # Errors
///
/// Returns [`GenerationError::Parse`] when no JSON object can be read and
/// [`GenerationError::MissingField`] when a required field is absent.
pub fn parse_candidate(answer: &str, tool_name: &ToolName) -> GenerationResult<CandidateTool> {
    let json = extract_json(answer).ok_or_else(|| GenerationError::parse("no JSON object found"))?;
    let value: Value =
        serde_json::from_str(json).map_err(|err| GenerationError::parse(err.to_string()))?;
    let Value::Object(object) = value else {
        return Err(GenerationError::parse("answer is not a JSON object"));
    };

    non_empty_str(&object, &["name"]).ok_or(GenerationError::MissingField { field: "name" })?;
    let description = non_empty_str(&object, &["description"])
        .ok_or(GenerationError::MissingField { field: "description" })?;
    let input_schema = field(&object, &["inputSchema", "input_schema"])
        .filter(|schema| schema.is_object())
        .cloned()
        .ok_or(GenerationError::MissingField {
            field: "inputSchema",
        })?;
    let handler_code = non_empty_str(&object, &["handlerCode", "handler_code"])
        .ok_or(GenerationError::MissingField {
            field: "handlerCode",
        })?;
    let category = non_empty_str(&object, &["category"]).unwrap_or(DEFAULT_CATEGORY);

    Ok(CandidateTool {
        name: tool_name.to_string(),
        description: description.to_owned(),
        category: category.to_owned(),
        input_schema,
        handler_code: handler_code.to_owned(),
    })
}

fn field<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| object.get(*key))
}

fn non_empty_str<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    field(object, keys)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name() -> ToolName {
        ToolName::new("uuid_gen").unwrap()
    }

    const BODY: &str = r#"{"name":"UUID Gen","description":"Makes ids","inputSchema":{"type":"object"},"handlerCode":"function() end"}"#;

    #[test]
    fn prefers_fenced_block() {
        let answer = format!("Here you go:\n```json\n{BODY}\n```\nthanks {{not json}}");
        assert_eq!(extract_json(&answer), Some(BODY));
    }

    #[test]
    fn falls_back_to_outer_braces() {
        let answer = format!("Sure! {BODY} Hope that helps.");
        assert_eq!(extract_json(&answer), Some(BODY));
        assert_eq!(extract_json("no braces here"), None);
    }

    #[test]
    fn forces_sanitized_name_and_default_category() {
        let tool = parse_candidate(BODY, &name()).unwrap();
        assert_eq!(tool.name, "uuid_gen");
        assert_eq!(tool.category, "generated");
        assert_eq!(tool.description, "Makes ids");
    }

    #[test]
    fn reports_missing_fields() {
        let answer = r#"{"name":"x","description":"d","inputSchema":{"type":"object"},"handlerCode":"  "}"#;
        let err = parse_candidate(answer, &name()).unwrap_err();
        assert!(matches!(err, GenerationError::MissingField { field: "handlerCode" }));

        let answer = r#"{"name":"x","description":"d","inputSchema":"object","handlerCode":"f"}"#;
        let err = parse_candidate(answer, &name()).unwrap_err();
        assert!(matches!(err, GenerationError::MissingField { field: "inputSchema" }));
    }

    #[test]
    fn rejects_non_json() {
        let err = parse_candidate("{ definitely not json }", &name()).unwrap_err();
        assert!(matches!(err, GenerationError::Parse { .. }));
    }
}
