//! Newline-delimited JSON-RPC 2.0 control plane.

pub mod methods;
pub mod server;

pub use methods::ControlMethods;
pub use server::{ControlServer, MAX_LINE_BYTES};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use crate::models::{CoreError, CoreErrorKind};

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Clone, Debug, PartialEq)]
pub struct MethodError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl MethodError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<CoreError> for MethodError {
    fn from(error: CoreError) -> Self {
        let code = match error.kind {
            CoreErrorKind::InvalidInput | CoreErrorKind::ParseFailure => INVALID_PARAMS,
            _ => INTERNAL_ERROR,
        };
        Self::new(code, error.message)
    }
}

pub type MethodResult = Result<Value, MethodError>;

pub fn success_response(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "result": result, "id": id })
}

pub fn error_response(id: Value, error: &MethodError) -> Value {
    let mut body = Map::new();
    body.insert("code".to_string(), json!(error.code));
    body.insert("message".to_string(), json!(error.message));
    if let Some(data) = &error.data {
        body.insert("data".to_string(), data.clone());
    }
    json!({ "jsonrpc": "2.0", "error": Value::Object(body), "id": id })
}

/// Parses one request line and produces exactly one response value.
/// Protocol failures never reach the method set.
pub async fn handle_line(
    methods: &ControlMethods,
    line: &str,
    cancellation: &CancellationToken,
) -> Value {
    let request: Value = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(error) => {
            return error_response(
                Value::Null,
                &MethodError::new(PARSE_ERROR, format!("parse error: {error}")),
            );
        }
    };

    let Value::Object(mut request) = request else {
        return error_response(
            Value::Null,
            &MethodError::new(INVALID_REQUEST, "invalid request: expected an object"),
        );
    };
    let id = request.remove("id").unwrap_or(Value::Null);

    if request.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return error_response(
            id,
            &MethodError::new(INVALID_REQUEST, "invalid request: jsonrpc must be \"2.0\""),
        );
    }
    let method = match request.get("method").and_then(Value::as_str) {
        Some(method) if !method.is_empty() => method.to_string(),
        _ => {
            return error_response(
                id,
                &MethodError::new(INVALID_REQUEST, "invalid request: missing method"),
            );
        }
    };
    let params = request.remove("params").filter(|params| !params.is_null());

    match methods.dispatch(&method, params, cancellation).await {
        Ok(result) => success_response(id, result),
        Err(error) => {
            tracing::debug!(method = %method, code = error.code, error = %error.message, "request failed");
            error_response(id, &error)
        }
    }
}

/// Decodes method params, treating absent params as `{}`.
pub fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, MethodError> {
    serde_json::from_value(params.unwrap_or_else(|| Value::Object(Map::new())))
        .map_err(|error| MethodError::invalid_params(format!("invalid params: {error}")))
}
