//! Utility tools compiled into the binary.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{SecondsFormat, Utc};
use forge_primitives::ToolName;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::{RegistryError, RegistryResult, ToolError, ToolResult};
use crate::registry::ToolRegistry;
use crate::types::ToolDefinition;

const MAX_UUIDS: u64 = 100;
const MAX_INDENT: u64 = 8;

/// Registers `echo`, `base64_encode`, `base64_decode`, `current_time`,
/// `generate_uuid` and `json_format`.
///
/// # Errors
///
/// Returns [`RegistryError::Duplicate`] if any of the names is taken.
pub fn register_builtins(registry: &ToolRegistry) -> RegistryResult<()> {
    registry.register_builtin(
        definition(
            "echo",
            "Returns the given message unchanged",
            "utility",
            json!({
                "type": "object",
                "properties": { "message": { "type": "string", "description": "Text to echo" } },
                "required": ["message"]
            }),
        )?,
        |input: Value| async move { echo(&input) },
    )?;

    registry.register_builtin(
        definition(
            "base64_encode",
            "Encodes UTF-8 text as standard base64",
            "encoding",
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }),
        )?,
        |input: Value| async move { base64_encode(&input) },
    )?;

    registry.register_builtin(
        definition(
            "base64_decode",
            "Decodes standard base64 into UTF-8 text",
            "encoding",
            json!({
                "type": "object",
                "properties": { "data": { "type": "string" } },
                "required": ["data"]
            }),
        )?,
        |input: Value| async move { base64_decode(&input) },
    )?;

    registry.register_builtin(
        definition(
            "current_time",
            "Returns the current UTC time",
            "time",
            json!({
                "type": "object",
                "properties": {
                    "format": { "type": "string", "enum": ["rfc3339", "unix", "unix_ms"], "default": "rfc3339" }
                }
            }),
        )?,
        |input: Value| async move { current_time(&input) },
    )?;

    registry.register_builtin(
        definition(
            "generate_uuid",
            "Generates random version 4 UUIDs, one per line",
            "utility",
            json!({
                "type": "object",
                "properties": {
                    "count": { "type": "integer", "minimum": 1, "maximum": MAX_UUIDS, "default": 1 }
                }
            }),
        )?,
        |input: Value| async move { generate_uuids(&input) },
    )?;

    registry.register_builtin(
        definition(
            "json_format",
            "Pretty-prints or minifies a JSON document",
            "data",
            json!({
                "type": "object",
                "properties": {
                    "json": { "type": "string" },
                    "indent": { "type": "integer", "minimum": 0, "maximum": MAX_INDENT, "default": 2 }
                },
                "required": ["json"]
            }),
        )?,
        |input: Value| async move { json_format(&input) },
    )?;

    Ok(())
}

fn definition(
    name: &str,
    description: &str,
    category: &str,
    schema: Value,
) -> RegistryResult<ToolDefinition> {
    let name = ToolName::new(name).map_err(|err| RegistryError::validation(err.to_string()))?;
    Ok(ToolDefinition::builtin(name, description, category, schema))
}

fn required_str<'a>(input: &'a Value, key: &str) -> ToolResult<&'a str> {
    input
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::invalid_arguments(format!("`{key}` must be a string")))
}

fn optional_u64(input: &Value, key: &str, default: u64, max: u64) -> ToolResult<u64> {
    match input.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value
            .as_u64()
            .filter(|n| *n <= max)
            .ok_or_else(|| {
                ToolError::invalid_arguments(format!("`{key}` must be an integer between 0 and {max}"))
            }),
    }
}

fn echo(input: &Value) -> ToolResult<Value> {
    required_str(input, "message").map(|message| Value::String(message.to_owned()))
}

fn base64_encode(input: &Value) -> ToolResult<Value> {
    required_str(input, "text").map(|text| Value::String(STANDARD.encode(text)))
}

fn base64_decode(input: &Value) -> ToolResult<Value> {
    let data = required_str(input, "data")?;
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|err| ToolError::invalid_arguments(format!("invalid base64: {err}")))?;
    let text = String::from_utf8(bytes)
        .map_err(|_| ToolError::execution("decoded bytes are not valid UTF-8"))?;
    Ok(Value::String(text))
}

fn current_time(input: &Value) -> ToolResult<Value> {
    let now = Utc::now();
    let format = input.get("format").and_then(Value::as_str).unwrap_or("rfc3339");
    match format {
        "rfc3339" => Ok(Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true))),
        "unix" => Ok(Value::String(now.timestamp().to_string())),
        "unix_ms" => Ok(Value::String(now.timestamp_millis().to_string())),
        other => Err(ToolError::invalid_arguments(format!(
            "unknown format `{other}`"
        ))),
    }
}

fn generate_uuids(input: &Value) -> ToolResult<Value> {
    let count = optional_u64(input, "count", 1, MAX_UUIDS)?;
    if count == 0 {
        return Err(ToolError::invalid_arguments("`count` must be at least 1"));
    }
    let ids: Vec<String> = (0..count).map(|_| Uuid::new_v4().to_string()).collect();
    Ok(Value::String(ids.join("\n")))
}

fn json_format(input: &Value) -> ToolResult<Value> {
    let raw = required_str(input, "json")?;
    let indent = optional_u64(input, "indent", 2, MAX_INDENT)?;
    let document: Value = serde_json::from_str(raw)
        .map_err(|err| ToolError::invalid_arguments(format!("invalid JSON: {err}")))?;

    if indent == 0 {
        return Ok(Value::String(document.to_string()));
    }

    let pad = " ".repeat(usize::try_from(indent).unwrap_or(2));
    let mut out = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(pad.as_bytes()));
    document
        .serialize(&mut serializer)
        .map_err(|err| ToolError::execution(err.to_string()))?;
    String::from_utf8(out)
        .map(Value::String)
        .map_err(|err| ToolError::execution(err.to_string()))
}
