//! Shared error taxonomy for the core's external interface.
//!
//! Leaf crates (`lattice-value`, `lattice-chunk`, `lattice-index`, ...) define
//! their own narrow `thiserror` error enums. Only the orchestrator and
//! coordinator, which sit at the external boundary, convert those into the
//! [`ErrorKind`] taxonomy below and wrap it in an [`Envelope`] for callers.

use serde::{Deserialize, Serialize};

/// The error kind taxonomy from spec §7, with its retriability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    InvalidValue,
    InvalidIdentifier,
    EntityNotFound,
    DuplicateEntity,
    BatchSizeExceeded,
    ValidationError,
    QueryFailed,
    Timeout,
    RpcError,
    Internal,
}

impl ErrorKind {
    /// Short identifier used as the envelope `code`.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidValue => "InvalidValue",
            ErrorKind::InvalidIdentifier => "InvalidIdentifier",
            ErrorKind::EntityNotFound => "EntityNotFound",
            ErrorKind::DuplicateEntity => "DuplicateEntity",
            ErrorKind::BatchSizeExceeded => "BatchSizeExceeded",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::QueryFailed => "QueryFailed",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::RpcError => "RpcError",
            ErrorKind::Internal => "Internal",
        }
    }

    /// Whether a caller may usefully retry an operation that failed with
    /// this kind. `QueryFailed` is "usually" retriable per spec §7; we treat
    /// it as retriable by default and let callers override per-case.
    pub fn default_retriable(&self) -> bool {
        matches!(self, ErrorKind::QueryFailed | ErrorKind::Timeout | ErrorKind::RpcError)
    }
}

/// A typed core error: a kind, a human-readable message, and optional
/// structured details. This is what leaf errors are converted *into* at the
/// orchestrator/coordinator boundary; it is not constructed by leaf crates.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), details: None }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn retriable(&self) -> bool {
        self.kind.default_retriable()
    }

    /// Wrap this error in the wire envelope of spec §6, tagging it with the
    /// caller's request id if one was supplied.
    pub fn into_envelope(self, request_id: Option<String>) -> Envelope {
        Envelope {
            r#type: "error",
            code: self.kind.code(),
            message: self.message,
            details: self.details,
            request_id,
        }
    }
}

/// The `{type: "error", code, message, details?, requestId?}` wire envelope
/// of spec §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub r#type: &'static str,
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_omits_absent_fields() {
        let err = CoreError::new(ErrorKind::EntityNotFound, "no such entity");
        let envelope = err.into_envelope(None);
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["code"], "EntityNotFound");
        assert!(json.get("requestId").is_none());
        assert!(json.get("details").is_none());
    }

    #[test]
    fn retriability_matches_table() {
        assert!(!ErrorKind::InvalidValue.default_retriable());
        assert!(ErrorKind::Timeout.default_retriable());
        assert!(ErrorKind::QueryFailed.default_retriable());
        assert!(!ErrorKind::BatchSizeExceeded.default_retriable());
    }
}
