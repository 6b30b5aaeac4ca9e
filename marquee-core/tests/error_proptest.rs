// Property-based tests for the error registry and the gRPC wire mapping

use std::sync::Arc;

use marquee_core::error::grpc::{strip_local_source, to_wire_grpc};
use marquee_core::error::{catalog, CanonicalError, ErrorMapper, ErrorRegistry};
use proptest::prelude::*;
use tonic::Code;

fn code_strategy() -> impl Strategy<Value = String> {
    "[A-Z][A-Z_]{0,30}"
}

fn grpc_code_strategy() -> impl Strategy<Value = Code> {
    (0i32..=16).prop_map(Code::from)
}

fn canonical_strategy() -> impl Strategy<Value = CanonicalError> {
    (
        code_strategy(),
        100u16..600,
        grpc_code_strategy(),
        "[a-zA-Z0-9 .,'-]{0,80}",
    )
        .prop_map(|(code, http, grpc, message)| CanonicalError::new(code, http, grpc, message))
}

// Property: identity survives a hop over the wire, with or without the local source
proptest! {
    #[test]
    fn test_wire_round_trip(error in canonical_strategy()) {
        let mapper = ErrorMapper::new(Arc::new(ErrorRegistry::with_catalog()));
        let error = Arc::new(error);
        let status = to_wire_grpc(&error);

        prop_assert_eq!(status.code(), error.grpc_code());
        prop_assert_eq!(status.message(), error.message());

        let (local, known) = mapper.from_wire_grpc(&status);
        prop_assert!(known);
        prop_assert!(local.same_identity(&error));

        let (remote, known) = mapper.from_wire_grpc(&strip_local_source(&status));
        prop_assert!(known);
        prop_assert!(remote.same_identity(&error));
        prop_assert_eq!(remote.http_code(), error.http_code());
    }
}

// Property: registering twice changes nothing and the first entry wins
proptest! {
    #[test]
    fn test_register_is_idempotent(errors in prop::collection::vec(canonical_strategy(), 0..20)) {
        let registry = ErrorRegistry::with_catalog();
        let errors: Vec<_> = errors.into_iter().map(Arc::new).collect();

        registry.register(errors.clone());
        let len = registry.len();
        let snapshot: Vec<_> = errors.iter().map(|e| registry.get(e.code())).collect();

        registry.register(errors.iter().cloned());
        prop_assert_eq!(registry.len(), len);
        for (err, before) in errors.iter().zip(snapshot) {
            let after = registry.get(err.code());
            match (before, after) {
                (Some(before), Some(after)) => prop_assert!(Arc::ptr_eq(&before, &after)),
                _ => prop_assert!(false, "{} missing from registry", err.code()),
            }
        }
    }
}

// Property: classify_by_code never panics and falls back to the default
proptest! {
    #[test]
    fn test_unknown_code_falls_back(code in "[a-z0-9]{1,20}") {
        let registry = ErrorRegistry::with_catalog();
        let (error, known) = registry.classify_by_code(&code);
        prop_assert!(!known);
        prop_assert!(Arc::ptr_eq(&error, &catalog::internal()));
    }
}
