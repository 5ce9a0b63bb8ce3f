//! Error taxonomy and the discriminated result returned to callers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Per-field validation messages, keyed by input field name.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Failure of a single remote object-store call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote store unavailable: {0}")]
    Unavailable(String),
    #[error("remote object not found: {0}")]
    NotFound(String),
}

/// Failure of the local relational store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("local store unavailable: {0}")]
    Unavailable(String),
    #[error("unique constraint violated: {0}")]
    Conflict(String),
}

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("authentication required")]
    Unauthorized,
    #[error("you do not have permission to {0}")]
    Forbidden(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("the document service is unavailable")]
    RemoteUnavailable(#[source] RemoteError),
    #[error("invalid input")]
    Validation(FieldErrors),
    #[error("conflicting update")]
    Conflict(String),
    #[error("internal storage error")]
    Internal(#[source] StoreError),
}

pub type Result<T, E = MirrorError> = std::result::Result<T, E>;

/// Stable, user-visible error discriminant.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthorized,
    Forbidden,
    NotFound,
    RemoteUnavailable,
    ValidationError,
    Conflict,
    Internal,
}

impl MirrorError {
    pub fn forbidden(action: impl Into<String>) -> Self {
        MirrorError::Forbidden(action.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        MirrorError::NotFound(what.into())
    }

    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), vec![message.into()]);
        MirrorError::Validation(errors)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MirrorError::Unauthorized => ErrorKind::Unauthorized,
            MirrorError::Forbidden(_) => ErrorKind::Forbidden,
            MirrorError::NotFound(_) => ErrorKind::NotFound,
            MirrorError::RemoteUnavailable(_) => ErrorKind::RemoteUnavailable,
            MirrorError::Validation(_) => ErrorKind::ValidationError,
            MirrorError::Conflict(_) => ErrorKind::Conflict,
            MirrorError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// User-visible body. Remote and store details stay in the logs.
    pub fn body(&self) -> ErrorBody {
        match self {
            MirrorError::Validation(fields) => ErrorBody::Fields(fields.clone()),
            other => ErrorBody::Message(other.to_string()),
        }
    }
}

impl From<RemoteError> for MirrorError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::NotFound(id) => {
                tracing::debug!(%id, "remote object missing");
                MirrorError::NotFound("document".to_string())
            }
            unavailable => MirrorError::RemoteUnavailable(unavailable),
        }
    }
}

impl From<StoreError> for MirrorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(detail) => {
                tracing::error!(%detail, "unexpected unique constraint violation");
                MirrorError::Conflict(detail)
            }
            unavailable => MirrorError::Internal(unavailable),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ErrorBody {
    Message(String),
    Fields(FieldErrors),
}

/// `{"success": true, "data": ..}` or `{"success": false, "kind": .., "error": ..}`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ActionResult<T> {
    Success {
        success: bool,
        data: T,
    },
    Failure {
        success: bool,
        kind: ErrorKind,
        error: ErrorBody,
    },
}

impl<T> ActionResult<T> {
    pub fn ok(data: T) -> Self {
        ActionResult::Success {
            success: true,
            data,
        }
    }

    pub fn err(err: &MirrorError) -> Self {
        ActionResult::Failure {
            success: false,
            kind: err.kind(),
            error: err.body(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ActionResult::Success { .. })
    }
}

impl<T> From<Result<T>> for ActionResult<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => ActionResult::ok(data),
            Err(err) => ActionResult::err(&err),
        }
    }
}
