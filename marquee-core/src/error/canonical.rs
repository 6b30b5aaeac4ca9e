//! The canonical error value
//!
//! Every failure that crosses a service boundary is eventually expressed as a
//! [`CanonicalError`]. It carries both an HTTP and a gRPC wire code so the same
//! failure renders identically no matter which protocol carries it.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tonic::Code;

/// A single field-level problem attached to a canonical error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    /// Path of the offending field (e.g. `release_year`)
    pub field: String,
    /// Human readable description of what is wrong with it
    pub description: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            description: description.into(),
        }
    }
}

/// Immutable description of a failure, keyed by its symbolic `code`
///
/// Instances are built once at startup and shared as `Arc<CanonicalError>`.
/// Equality compares every public field, so two values decoded from the wire
/// compare equal to the registered instance.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalError {
    code: String,
    http_code: u16,
    grpc_code: Code,
    message: String,
    data: Option<serde_json::Value>,
    errors: Vec<FieldViolation>,
}

impl CanonicalError {
    /// Create a canonical error with no payload and no sub-errors
    pub fn new(
        code: impl Into<String>,
        http_code: u16,
        grpc_code: Code,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            http_code,
            grpc_code,
            message: message.into(),
            data: None,
            errors: Vec::new(),
        }
    }

    /// Attach a structured payload
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Attach field-level sub-errors, keeping their order
    pub fn with_errors(mut self, errors: impl IntoIterator<Item = FieldViolation>) -> Self {
        self.errors = errors.into_iter().collect();
        self
    }

    /// Replace the user-facing message, keeping the identity
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn http_code(&self) -> u16 {
        self.http_code
    }

    pub fn grpc_code(&self) -> Code {
        self.grpc_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn data(&self) -> Option<&serde_json::Value> {
        self.data.as_ref()
    }

    pub fn errors(&self) -> &[FieldViolation] {
        &self.errors
    }

    /// HTTP status for the response renderer; 500 when `http_code` is not a
    /// valid status
    pub fn http_status(&self) -> http::StatusCode {
        http::StatusCode::from_u16(self.http_code)
            .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Same code, HTTP code, gRPC code and message
    pub fn same_identity(&self, other: &CanonicalError) -> bool {
        self.code == other.code
            && self.http_code == other.http_code
            && self.grpc_code == other.grpc_code
            && self.message == other.message
    }

    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }

    pub fn into_shared(self) -> Arc<CanonicalError> {
        Arc::new(self)
    }
}

impl fmt::Display for CanonicalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for CanonicalError {}
