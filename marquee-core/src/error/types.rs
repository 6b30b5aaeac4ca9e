//! The failure type that flows into classification
//!
//! [`ServiceError`] is a closed set of shapes a failure can take before the
//! mapper reduces it to a [`CanonicalError`]. Classification matches on it
//! exhaustively instead of probing for types at runtime.

use std::sync::Arc;

use thiserror::Error;

use super::canonical::CanonicalError;
use super::mapper::ErrorMapper;

/// Any failure observed by service code
#[derive(Error, Debug)]
pub enum ServiceError {
    /// A canonical error raised locally
    #[error(transparent)]
    Canonical(Arc<CanonicalError>),

    /// A canonical error with log-only context attached on the way up
    #[error("{context}: {canonical}")]
    Wrapped {
        context: String,
        #[source]
        canonical: Arc<CanonicalError>,
    },

    /// A status returned by a remote gRPC peer
    #[error("rpc failed: {0}")]
    Rpc(#[from] tonic::Status),

    /// Anything else; its cause chain is searched during classification
    #[error(transparent)]
    Opaque(Box<dyn std::error::Error + Send + Sync>),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    /// Wrap an arbitrary error, e.g. an `anyhow::Error` or a driver error
    pub fn opaque(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        ServiceError::Opaque(error.into())
    }

    pub fn wrapped(context: impl Into<String>, canonical: Arc<CanonicalError>) -> Self {
        ServiceError::Wrapped {
            context: context.into(),
            canonical,
        }
    }

    /// The canonical error carried directly by this value, without decoding
    pub fn as_canonical(&self) -> Option<&Arc<CanonicalError>> {
        match self {
            ServiceError::Canonical(canonical) | ServiceError::Wrapped { canonical, .. } => {
                Some(canonical)
            }
            ServiceError::Rpc(_) | ServiceError::Opaque(_) => None,
        }
    }

    /// Status to return from a gRPC handler
    ///
    /// Only the canonical message and detail cross the wire; wrapped context
    /// and opaque sources stay in the logs.
    pub fn into_status(self, mapper: &ErrorMapper) -> tonic::Status {
        mapper.to_wire_grpc(&self)
    }
}

impl From<Arc<CanonicalError>> for ServiceError {
    fn from(canonical: Arc<CanonicalError>) -> Self {
        ServiceError::Canonical(canonical)
    }
}

impl From<CanonicalError> for ServiceError {
    fn from(canonical: CanonicalError) -> Self {
        ServiceError::Canonical(Arc::new(canonical))
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(error: anyhow::Error) -> Self {
        ServiceError::Opaque(error.into())
    }
}

/// Attach log-only context to a canonical failure
pub trait ErrorContext<T> {
    fn with_context<F>(self, f: F) -> ServiceResult<T>
    where
        F: FnOnce() -> String;

    fn context(self, msg: &'static str) -> ServiceResult<T>;
}

impl<T> ErrorContext<T> for Result<T, Arc<CanonicalError>> {
    fn with_context<F>(self, f: F) -> ServiceResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|canonical| ServiceError::wrapped(f(), canonical))
    }

    fn context(self, msg: &'static str) -> ServiceResult<T> {
        self.with_context(|| msg.to_string())
    }
}
