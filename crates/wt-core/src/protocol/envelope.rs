//! Request/response envelope and protocol error codes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A single method call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,
    pub method: String,
    /// `null` and a missing field are both treated as `{}` by the dispatcher.
    #[serde(default)]
    pub params: Value,
    pub id: Uuid,
}

impl Request {
    /// Request for `method` with a fresh id.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: None,
            method: method.into(),
            params,
            id: Uuid::new_v4(),
        }
    }
}

/// Final line written back for a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    #[serde(flatten)]
    pub body: ResponseBody,
    pub id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseBody {
    Result(Value),
    Error(ErrorObject),
}

impl Response {
    /// Successful response to request `id`.
    pub const fn success(id: Uuid, result: Value) -> Self {
        Self {
            body: ResponseBody::Result(result),
            id,
        }
    }

    /// Error response to request `id`.
    pub const fn failure(id: Uuid, error: ErrorObject) -> Self {
        Self {
            body: ResponseBody::Error(error),
            id,
        }
    }

    /// The error, if this response failed.
    pub const fn error(&self) -> Option<&ErrorObject> {
        match &self.body {
            ResponseBody::Error(e) => Some(e),
            ResponseBody::Result(_) => None,
        }
    }

    /// Consume the response into its result or error.
    pub fn into_result(self) -> Result<Value, ErrorObject> {
        match self.body {
            ResponseBody::Result(v) => Ok(v),
            ResponseBody::Error(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

impl ErrorObject {
    /// Error with `code`, `message` and no data.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: Value::Null,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Protocol error codes, JSON-RPC compatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    WorktreeNotFound,
    GitstatusdError,
}

impl ErrorCode {
    /// Numeric code sent on the wire.
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::WorktreeNotFound => -32001,
            Self::GitstatusdError => -32002,
        }
    }

    /// The known code for `code`, if any.
    pub const fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::InternalError,
            -32001 => Self::WorktreeNotFound,
            -32002 => Self::GitstatusdError,
            _ => return None,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn success_serializes_result_and_id() {
        let id = Uuid::nil();
        let resp = Response::success(id, json!("ok"));
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            value,
            json!({"result": "ok", "id": "00000000-0000-0000-0000-000000000000"})
        );
    }

    #[test]
    fn failure_serializes_error_object() {
        let resp = Response::failure(
            Uuid::nil(),
            ErrorObject::new(ErrorCode::MethodNotFound, "no such method: nope"),
        );
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["error"]["code"], -32601);
        assert_eq!(value["error"]["data"], Value::Null);
        assert!(value.get("result").is_none());
    }

    #[test]
    fn request_without_params_defaults_to_null() {
        let req: Request = serde_json::from_str(
            r#"{"method": "ping", "id": "6f1c2a8e-0b7d-4d0e-9a69-0a4e5b0c9f11"}"#,
        )
        .unwrap();
        assert_eq!(req.method, "ping");
        assert!(req.params.is_null());
    }

    #[test]
    fn response_parses_back_into_result() {
        let line = r#"{"error": {"code": -32001, "message": "gone"}, "id": "00000000-0000-0000-0000-000000000000"}"#;
        let resp: Response = serde_json::from_str(line).unwrap();
        let err = resp.into_result().unwrap_err();
        assert_eq!(ErrorCode::from_code(err.code), Some(ErrorCode::WorktreeNotFound));
    }
}
