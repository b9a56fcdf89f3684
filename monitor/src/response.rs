//! The minimal qmp-shaped wire types this workspace's monitor transport
//! speaks: a tagged request, a `return`/`error`-shaped response, and the
//! `query-version` payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A structured monitor request: `{"execute": ..., "arguments": ...}`.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub execute: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Request {
    pub fn new(execute: impl Into<String>, arguments: Option<Value>) -> Self {
        Request {
            execute: execute.into(),
            arguments,
            id: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorPayload {
    pub class: String,
    #[serde(default)]
    pub desc: String,
}

/// The `return`/`error` envelope every monitor response arrives in.
/// Equivalent in shape to `machine_manager::qmp::Response`: a single
/// constructor for a successful payload, and one for an empty success.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    #[serde(rename = "return")]
    pub result: Option<Value>,
    pub error: Option<ErrorPayload>,
    #[serde(default)]
    pub id: Option<String>,
}

impl Response {
    pub fn create_response(result: Value, id: Option<String>) -> Self {
        Response {
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn create_empty_response() -> Self {
        Response {
            result: Some(Value::Object(Default::default())),
            error: None,
            id: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
}

impl Version {
    pub fn new(major: u32, minor: u32, micro: u32) -> Self {
        Version { major, minor, micro }
    }
}
