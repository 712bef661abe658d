//! JSON-RPC 2.0 envelope types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use toolforge::tools::RegistryError;

/// Protocol version string carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Malformed JSON.
pub const PARSE_ERROR: i64 = -32_700;
/// Valid JSON that is not a request object.
pub const INVALID_REQUEST: i64 = -32_600;
/// Unknown method.
pub const METHOD_NOT_FOUND: i64 = -32_601;
/// Bad parameters, including registry validation failures.
pub const INVALID_PARAMS: i64 = -32_602;
/// Anything else.
pub const INTERNAL_ERROR: i64 = -32_603;
/// Tool does not exist and was not evolved.
pub const TOOL_NOT_FOUND: i64 = -32_004;

/// Incoming request or notification.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcRequest {
    /// Must equal [`JSONRPC_VERSION`].
    pub jsonrpc: String,
    /// Absent for notifications.
    #[serde(default)]
    pub id: Option<Value>,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

/// Error object of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,
    /// Short description.
    pub message: String,
    /// Structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Creates an error without data.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl From<&RegistryError> for RpcError {
    fn from(err: &RegistryError) -> Self {
        let code = match err.status_code() {
            400 => INVALID_PARAMS,
            404 => TOOL_NOT_FOUND,
            _ => INTERNAL_ERROR,
        };
        Self::new(code, err.to_string())
    }
}

/// Outgoing response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Always [`JSONRPC_VERSION`].
    pub jsonrpc: String,
    /// Echo of the request id; `null` when it could not be read.
    pub id: Value,
    /// Success payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    /// Successful response.
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Failed response.
    #[must_use]
    pub fn failure(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Parses one line into a request.
///
/// # Errors
///
/// Returns the error response to send back: `-32700` for malformed JSON,
/// `-32600` for JSON that is not a version 2.0 request.
pub fn parse_request(line: &str) -> Result<RpcRequest, RpcResponse> {
    let value: Value = serde_json::from_str(line).map_err(|err| {
        RpcResponse::failure(Value::Null, RpcError::new(PARSE_ERROR, format!("parse error: {err}")))
    })?;
    let id = value.get("id").cloned().unwrap_or(Value::Null);
    let request: RpcRequest = serde_json::from_value(value).map_err(|err| {
        RpcResponse::failure(
            id.clone(),
            RpcError::new(INVALID_REQUEST, format!("invalid request: {err}")),
        )
    })?;
    if request.jsonrpc != JSONRPC_VERSION {
        return Err(RpcResponse::failure(
            id,
            RpcError::new(INVALID_REQUEST, "invalid request: jsonrpc must be \"2.0\""),
        ));
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_requests_and_notifications() {
        let request =
            parse_request(r#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#).unwrap();
        assert_eq!(request.id, Some(json!(7)));
        assert_eq!(request.params, Value::Null);

        let notification =
            parse_request(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(notification.id.is_none());
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let response = parse_request("{not json").unwrap_err();
        assert_eq!(response.id, Value::Null);
        assert_eq!(response.error.unwrap().code, PARSE_ERROR);
    }

    #[test]
    fn non_requests_are_invalid() {
        let response = parse_request(r#"{"jsonrpc":"2.0","id":"a"}"#).unwrap_err();
        assert_eq!(response.id, json!("a"));
        assert_eq!(response.error.unwrap().code, INVALID_REQUEST);

        let response = parse_request(r#"{"jsonrpc":"1.0","id":1,"method":"x"}"#).unwrap_err();
        assert_eq!(response.error.unwrap().code, INVALID_REQUEST);

        let response = parse_request("[1,2]").unwrap_err();
        assert_eq!(response.error.unwrap().code, INVALID_REQUEST);
    }

    #[test]
    fn registry_errors_map_to_codes() {
        let not_found = RegistryError::NotFound { name: "x".into() };
        assert_eq!(RpcError::from(&not_found).code, TOOL_NOT_FOUND);
        let invalid = RegistryError::validation("bad");
        assert_eq!(RpcError::from(&invalid).code, INVALID_PARAMS);
        let duplicate = RegistryError::Duplicate { name: "x".into() };
        assert_eq!(RpcError::from(&duplicate).code, INTERNAL_ERROR);
    }

    #[test]
    fn responses_omit_empty_members() {
        let ok = serde_json::to_value(RpcResponse::success(json!(1), json!({}))).unwrap();
        assert!(ok.get("error").is_none());
        let err = serde_json::to_value(RpcResponse::failure(
            json!(1),
            RpcError::new(METHOD_NOT_FOUND, "nope"),
        ))
        .unwrap();
        assert!(err.get("result").is_none());
        assert!(err["error"].get("data").is_none());
    }
}
