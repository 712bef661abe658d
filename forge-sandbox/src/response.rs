use serde_json::Value;

use crate::error::{SandboxError, SandboxResult};

/// Checks that `value` is a tool response.
///
/// A response is an object whose `content` array holds at least one item with
/// `type == "text"` and a string `text`.
///
/// # Errors
///
/// Returns [`SandboxError::InvalidOutput`] describing the first problem found.
pub fn validate_response(value: &Value) -> SandboxResult<()> {
    let invalid = |reason: &str| SandboxError::InvalidOutput {
        reason: reason.to_owned(),
    };

    let object = value
        .as_object()
        .ok_or_else(|| invalid("handler must return an object"))?;
    let content = object
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("`content` must be an array"))?;

    let has_text = content.iter().any(|item| {
        item.get("type").and_then(Value::as_str) == Some("text")
            && item.get("text").is_some_and(Value::is_string)
    });
    if has_text {
        Ok(())
    } else {
        Err(invalid("`content` needs an item with type \"text\" and a string `text`"))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn accepts_text_content() {
        let value = json!({ "content": [{ "type": "text", "text": "ok" }] });
        assert!(validate_response(&value).is_ok());
    }

    #[test]
    fn rejects_malformed_responses() {
        for value in [
            json!("plain string"),
            json!({}),
            json!({ "content": [] }),
            json!({ "content": [{ "type": "image", "data": "x" }] }),
            json!({ "content": [{ "type": "text", "text": 5 }] }),
        ] {
            let err = validate_response(&value).unwrap_err();
            assert!(err.to_string().starts_with("invalid response format"));
        }
    }
}
