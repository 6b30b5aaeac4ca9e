//! Process-wide lookup of canonical errors by symbolic code
//!
//! The registry is built once during startup and then only read. It is an
//! explicit value handed to whoever needs it rather than a global, so tests
//! can build their own.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tonic::Code;
use tracing::debug;

use super::canonical::CanonicalError;
use super::catalog;

/// Code → canonical error map with a configured default
#[derive(Debug)]
pub struct ErrorRegistry {
    entries: RwLock<HashMap<String, Arc<CanonicalError>>>,
    default: Arc<CanonicalError>,
}

impl ErrorRegistry {
    /// Empty registry that falls back to `default` for unknown codes
    ///
    /// The default itself is registered so it can be looked up by code.
    pub fn new(default: Arc<CanonicalError>) -> Self {
        let registry = Self {
            entries: RwLock::new(HashMap::new()),
            default: Arc::clone(&default),
        };
        registry.register([default]);
        registry
    }

    /// Registry preloaded with the built-in catalog, defaulting to `INTERNAL`
    pub fn with_catalog() -> Self {
        let registry = Self::new(catalog::internal());
        registry.register(catalog::all());
        registry
    }

    /// Insert each error under its code
    ///
    /// Entries with an empty code are skipped. A code that is already present
    /// keeps its first registration.
    pub fn register<I>(&self, errors: I)
    where
        I: IntoIterator<Item = Arc<CanonicalError>>,
    {
        let mut entries = self.entries.write();
        for error in errors {
            if error.code().is_empty() {
                debug!("Skipping canonical error with empty code: {}", error.message());
                continue;
            }
            if entries.contains_key(error.code()) {
                debug!(code = error.code(), "Canonical error already registered");
                continue;
            }
            entries.insert(error.code().to_string(), error);
        }
    }

    /// Look up `code`; unknown codes yield the default with `found == false`
    pub fn classify_by_code(&self, code: &str) -> (Arc<CanonicalError>, bool) {
        match self.entries.read().get(code) {
            Some(error) => (Arc::clone(error), true),
            None => (self.default(), false),
        }
    }

    pub fn get(&self, code: &str) -> Option<Arc<CanonicalError>> {
        self.entries.read().get(code).cloned()
    }

    pub fn contains(&self, code: &str) -> bool {
        self.entries.read().contains_key(code)
    }

    pub fn default(&self) -> Arc<CanonicalError> {
        Arc::clone(&self.default)
    }

    /// Best-effort canonical error for a status that carried no detail
    pub(crate) fn for_bare_grpc_code(&self, code: Code) -> Arc<CanonicalError> {
        catalog::for_bare_grpc_code(code)
            .and_then(|fallback| self.get(fallback.code()))
            .unwrap_or_else(|| self.default())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for ErrorRegistry {
    fn default() -> Self {
        Self::with_catalog()
    }
}
