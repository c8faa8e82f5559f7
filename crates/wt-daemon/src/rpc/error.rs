//! Handler-declared errors and their wire codes.

use serde_json::{Value, json};
use thiserror::Error;
use wt_core::protocol::{ErrorCode, ErrorObject};

use crate::git::GitError;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Worktree not found: {0}")]
    WorktreeNotFound(String),

    #[error("gitstatusd error: {0}")]
    Gitstatusd(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RpcError {
    /// Wire code for this error.
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidParams(_) => ErrorCode::InvalidParams,
            Self::WorktreeNotFound(_) => ErrorCode::WorktreeNotFound,
            Self::Gitstatusd(_) => ErrorCode::GitstatusdError,
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    fn data(&self) -> Value {
        match self {
            Self::WorktreeNotFound(query) => json!({ "query": query }),
            _ => Value::Null,
        }
    }

    /// The error as sent to the client.
    pub fn to_error_object(&self) -> ErrorObject {
        ErrorObject::new(self.code(), self.to_string()).with_data(self.data())
    }
}

impl From<GitError> for RpcError {
    fn from(e: GitError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<wt_core::Error> for RpcError {
    fn from(e: wt_core::Error) -> Self {
        match e {
            wt_core::Error::InvalidWorktreeId(_) => Self::InvalidParams(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}
