//! Built-in canonical errors shared by every Marquee service
//!
//! Service crates register their own domain errors next to these at startup;
//! the entries here cover transport, policy and generic request failures.

use std::sync::Arc;

use once_cell::sync::Lazy;
use tonic::Code;

use super::canonical::CanonicalError;

/// Symbolic codes of the built-in catalog
pub mod codes {
    pub const INTERNAL: &str = "INTERNAL";
    pub const INVALID_ARGUMENT: &str = "INVALID_ARGUMENT";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const ALREADY_EXISTS: &str = "ALREADY_EXISTS";
    pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
    pub const UNAUTHENTICATED: &str = "UNAUTHENTICATED";
    pub const FAILED_PRECONDITION: &str = "FAILED_PRECONDITION";
    pub const UNIMPLEMENTED: &str = "UNIMPLEMENTED";
    pub const UNAVAILABLE: &str = "UNAVAILABLE";
    pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
    pub const DEADLINE_EXCEEDED: &str = "DEADLINE_EXCEEDED";
    pub const RESOURCE_EXHAUSTED: &str = "RESOURCE_EXHAUSTED";
    pub const CIRCUIT_OPEN: &str = "CIRCUIT_OPEN";
    pub const CANCELED: &str = "CANCELED";
}

/// Codes that describe a transient condition of the callee
pub const TRANSIENT_CODES: [&str; 4] = [
    codes::UNAVAILABLE,
    codes::DEADLINE_EXCEEDED,
    codes::RESOURCE_EXHAUSTED,
    codes::SERVICE_UNAVAILABLE,
];

/// Whether `error` is one of [`TRANSIENT_CODES`]
pub fn is_transient(error: &CanonicalError) -> bool {
    TRANSIENT_CODES.iter().any(|code| *code == error.code())
}

macro_rules! canonical {
    ($name:ident, $code:expr, $http:expr, $grpc:expr, $message:expr) => {
        static $name: Lazy<Arc<CanonicalError>> =
            Lazy::new(|| Arc::new(CanonicalError::new($code, $http, $grpc, $message)));
    };
}

canonical!(INTERNAL, codes::INTERNAL, 500, Code::Internal, "internal server error");
canonical!(INVALID_ARGUMENT, codes::INVALID_ARGUMENT, 400, Code::InvalidArgument, "invalid argument");
canonical!(NOT_FOUND, codes::NOT_FOUND, 404, Code::NotFound, "resource not found");
canonical!(ALREADY_EXISTS, codes::ALREADY_EXISTS, 409, Code::AlreadyExists, "resource already exists");
canonical!(PERMISSION_DENIED, codes::PERMISSION_DENIED, 403, Code::PermissionDenied, "permission denied");
canonical!(UNAUTHENTICATED, codes::UNAUTHENTICATED, 401, Code::Unauthenticated, "authentication required");
canonical!(FAILED_PRECONDITION, codes::FAILED_PRECONDITION, 412, Code::FailedPrecondition, "precondition failed");
canonical!(UNIMPLEMENTED, codes::UNIMPLEMENTED, 501, Code::Unimplemented, "not implemented");
canonical!(UNAVAILABLE, codes::UNAVAILABLE, 503, Code::Unavailable, "dependency unavailable");
canonical!(SERVICE_UNAVAILABLE, codes::SERVICE_UNAVAILABLE, 503, Code::Unavailable, "service temporarily unavailable");
canonical!(DEADLINE_EXCEEDED, codes::DEADLINE_EXCEEDED, 504, Code::DeadlineExceeded, "deadline exceeded");
canonical!(RESOURCE_EXHAUSTED, codes::RESOURCE_EXHAUSTED, 429, Code::ResourceExhausted, "resource exhausted");
canonical!(CIRCUIT_OPEN, codes::CIRCUIT_OPEN, 503, Code::Unavailable, "dependency circuit breaker is open");
canonical!(CANCELED, codes::CANCELED, 499, Code::Cancelled, "request canceled");

pub fn internal() -> Arc<CanonicalError> {
    INTERNAL.clone()
}

pub fn invalid_argument() -> Arc<CanonicalError> {
    INVALID_ARGUMENT.clone()
}

pub fn not_found() -> Arc<CanonicalError> {
    NOT_FOUND.clone()
}

pub fn already_exists() -> Arc<CanonicalError> {
    ALREADY_EXISTS.clone()
}

pub fn permission_denied() -> Arc<CanonicalError> {
    PERMISSION_DENIED.clone()
}

pub fn unauthenticated() -> Arc<CanonicalError> {
    UNAUTHENTICATED.clone()
}

pub fn failed_precondition() -> Arc<CanonicalError> {
    FAILED_PRECONDITION.clone()
}

pub fn unimplemented() -> Arc<CanonicalError> {
    UNIMPLEMENTED.clone()
}

pub fn unavailable() -> Arc<CanonicalError> {
    UNAVAILABLE.clone()
}

pub fn service_unavailable() -> Arc<CanonicalError> {
    SERVICE_UNAVAILABLE.clone()
}

pub fn deadline_exceeded() -> Arc<CanonicalError> {
    DEADLINE_EXCEEDED.clone()
}

pub fn resource_exhausted() -> Arc<CanonicalError> {
    RESOURCE_EXHAUSTED.clone()
}

pub fn circuit_open() -> Arc<CanonicalError> {
    CIRCUIT_OPEN.clone()
}

pub fn canceled() -> Arc<CanonicalError> {
    CANCELED.clone()
}

/// Every built-in entry, in registration order
pub fn all() -> Vec<Arc<CanonicalError>> {
    vec![
        internal(),
        invalid_argument(),
        not_found(),
        already_exists(),
        permission_denied(),
        unauthenticated(),
        failed_precondition(),
        unimplemented(),
        unavailable(),
        service_unavailable(),
        deadline_exceeded(),
        resource_exhausted(),
        circuit_open(),
        canceled(),
    ]
}

/// Catalog entry standing in for a bare gRPC status that carried no detail
///
/// Only transport-level codes keep their meaning; everything else collapses
/// into the default error.
pub fn for_bare_grpc_code(code: Code) -> Option<Arc<CanonicalError>> {
    match code {
        Code::Unavailable => Some(unavailable()),
        Code::DeadlineExceeded => Some(deadline_exceeded()),
        Code::ResourceExhausted => Some(resource_exhausted()),
        Code::Cancelled => Some(canceled()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_codes_are_unique() {
        let all = all();
        let unique: HashSet<&str> = all.iter().map(|e| e.code()).collect();
        assert_eq!(unique.len(), all.len());
    }

    #[test]
    fn test_catalog_entries_are_shared_instances() {
        assert!(Arc::ptr_eq(&not_found(), &not_found()));
    }

    #[test]
    fn test_circuit_open_is_distinct_from_unavailable_despite_grpc_code() {
        assert_eq!(circuit_open().grpc_code(), unavailable().grpc_code());
        assert_ne!(circuit_open().code(), unavailable().code());
    }

    #[test]
    fn test_transient_codes() {
        assert!(is_transient(&unavailable()));
        assert!(is_transient(&service_unavailable()));
        assert!(!is_transient(&circuit_open()));
        assert!(!is_transient(&not_found()));
    }

    #[test]
    fn test_bare_code_mapping() {
        assert_eq!(
            for_bare_grpc_code(Code::Unavailable).map(|e| e.code().to_string()),
            Some(codes::UNAVAILABLE.to_string())
        );
        assert!(for_bare_grpc_code(Code::NotFound).is_none());
    }
}
