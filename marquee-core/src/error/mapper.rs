//! Classification of arbitrary failures into canonical errors
//!
//! Classification happens where an error is first observed. The result is
//! either the canonical error found in the failure (known) or the registry
//! default (unknown); unknown failures are logged in full so operators keep
//! the diagnostics that callers never see.

use std::sync::Arc;

use tonic::Status;
use tracing::{error, warn};

use super::canonical::CanonicalError;
use super::grpc;
use super::registry::ErrorRegistry;
use super::types::ServiceError;

/// Translates failures to and from canonical errors using one registry
#[derive(Debug, Clone)]
pub struct ErrorMapper {
    registry: Arc<ErrorRegistry>,
}

impl ErrorMapper {
    pub fn new(registry: Arc<ErrorRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ErrorRegistry> {
        &self.registry
    }

    /// Classify an optional failure; `None` is a success and is always known
    pub fn classify_error(
        &self,
        err: Option<&ServiceError>,
    ) -> (Option<Arc<CanonicalError>>, bool) {
        match err {
            None => (None, true),
            Some(err) => {
                let (canonical, known) = self.classify(err);
                (Some(canonical), known)
            }
        }
    }

    /// Reduce `err` to a canonical error
    pub fn classify(&self, err: &ServiceError) -> (Arc<CanonicalError>, bool) {
        match err {
            ServiceError::Canonical(canonical) | ServiceError::Wrapped { canonical, .. } => {
                (Arc::clone(canonical), true)
            }
            ServiceError::Rpc(status) => self.from_wire_grpc(status),
            ServiceError::Opaque(source) => {
                if let Some(found) = self.search_chain(source.as_ref()) {
                    return found;
                }
                warn!(error = %err, debug = ?err, "Unclassified error, reporting default");
                (self.registry.default(), false)
            }
        }
    }

    /// Decode a status received from a peer
    ///
    /// Checks the in-process source first, then the structured detail, and
    /// finally falls back to the bare gRPC code.
    ///
    /// The bare fallback is not always the default error: `Unavailable`,
    /// `DeadlineExceeded`, `ResourceExhausted` and `Cancelled` map to their
    /// catalog entries so transport failures stay retry-worthy. The result is
    /// still reported as unknown and logged at `error`.
    pub fn from_wire_grpc(&self, status: &Status) -> (Arc<CanonicalError>, bool) {
        if let Some(local) = grpc::local_canonical(status) {
            return (self.canonicalize(local), true);
        }

        if let Some(detail) = grpc::decode_detail(status) {
            let decoded = Arc::new(detail.to_canonical());
            return (self.canonicalize(decoded), true);
        }

        let fallback = self.registry.for_bare_grpc_code(status.code());
        error!(
            grpc_code = ?status.code(),
            grpc_message = status.message(),
            fallback = fallback.code(),
            "Remote error carried no canonical detail"
        );
        (fallback, false)
    }

    /// Status to send for `err`, classifying it first
    pub fn to_wire_grpc(&self, err: &ServiceError) -> Status {
        let (canonical, _) = self.classify(err);
        grpc::to_wire_grpc(&canonical)
    }

    /// Prefer the registered instance when it describes the same error
    fn canonicalize(&self, candidate: Arc<CanonicalError>) -> Arc<CanonicalError> {
        match self.registry.get(candidate.code()) {
            Some(registered) if registered.same_identity(&candidate) => registered,
            _ => candidate,
        }
    }

    fn search_chain(
        &self,
        root: &(dyn std::error::Error + 'static),
    ) -> Option<(Arc<CanonicalError>, bool)> {
        let mut current = Some(root);
        while let Some(err) = current {
            if let Some(canonical) = err.downcast_ref::<CanonicalError>() {
                return Some((self.canonicalize(Arc::new(canonical.clone())), true));
            }
            if let Some(service) = err.downcast_ref::<ServiceError>() {
                return Some(self.classify(service));
            }
            if let Some(status) = err.downcast_ref::<Status>() {
                return Some(self.from_wire_grpc(status));
            }
            current = err.source();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::catalog::{self, codes};
    use tonic::Code;
    use tracing_test::traced_test;

    fn mapper() -> ErrorMapper {
        ErrorMapper::new(Arc::new(ErrorRegistry::with_catalog()))
    }

    #[derive(Debug, thiserror::Error)]
    #[error("repository call failed")]
    struct RepositoryError {
        #[source]
        cause: CanonicalError,
    }

    #[test]
    fn test_none_is_known_success() {
        let (canonical, known) = mapper().classify_error(None);
        assert!(canonical.is_none());
        assert!(known);
    }

    #[test]
    fn test_canonical_passes_through_unchanged() {
        let not_found = catalog::not_found();
        let err = ServiceError::Canonical(Arc::clone(&not_found));

        let (canonical, known) = mapper().classify(&err);
        assert!(known);
        assert!(Arc::ptr_eq(&canonical, &not_found));
    }

    #[test]
    fn test_cause_chain_is_searched() {
        let err = ServiceError::opaque(RepositoryError {
            cause: catalog::permission_denied().as_ref().clone(),
        });

        let (canonical, known) = mapper().classify(&err);
        assert!(known);
        assert_eq!(canonical.code(), codes::PERMISSION_DENIED);
        assert!(Arc::ptr_eq(&canonical, &catalog::permission_denied()));
    }

    #[test]
    #[traced_test]
    fn test_opaque_error_is_default_and_logged() {
        let err = ServiceError::opaque(std::io::Error::new(
            std::io::ErrorKind::Other,
            "socket closed",
        ));

        let (canonical, known) = mapper().classify(&err);
        assert!(!known);
        assert_eq!(canonical.code(), codes::INTERNAL);
        assert!(logs_contain("Unclassified error"));
        assert!(logs_contain("socket closed"));
    }

    #[test]
    fn test_unregistered_remote_code_is_rebuilt() {
        let remote = Arc::new(CanonicalError::new(
            "SHOWTIME_SOLD_OUT",
            409,
            Code::FailedPrecondition,
            "showtime is sold out",
        ));
        let status = grpc::strip_local_source(&grpc::to_wire_grpc(&remote));

        let (canonical, known) = mapper().from_wire_grpc(&status);
        assert!(known);
        assert!(canonical.same_identity(&remote));
    }

    #[test]
    #[traced_test]
    fn test_bare_status_falls_back() {
        let (canonical, known) = mapper().from_wire_grpc(&Status::unavailable("connection refused"));
        assert!(!known);
        assert_eq!(canonical.code(), codes::UNAVAILABLE);
        assert!(logs_contain("Remote error carried no canonical detail"));

        let (canonical, known) = mapper().from_wire_grpc(&Status::data_loss("torn page"));
        assert!(!known);
        assert_eq!(canonical.code(), codes::INTERNAL);
    }

    #[test]
    fn test_status_wrapped_in_opaque_is_decoded() {
        let status = grpc::strip_local_source(&grpc::to_wire_grpc(&catalog::not_found()));
        let err = ServiceError::opaque(status);

        let (canonical, known) = mapper().classify(&err);
        assert!(known);
        assert_eq!(canonical.code(), codes::NOT_FOUND);
    }

    #[test]
    fn test_to_wire_grpc_classifies_first() {
        let err = ServiceError::wrapped("fetching user", catalog::unauthenticated());
        let status = mapper().to_wire_grpc(&err);

        assert_eq!(status.code(), Code::Unauthenticated);
        assert_eq!(status.message(), "authentication required");
        assert!(!status.message().contains("fetching user"));
    }
}
