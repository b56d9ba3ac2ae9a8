//! Per-scope operator registry
//!
//! Guarantees at most one operator deployment per `(scope, kind)`. The map is
//! owned by the [`Stack`](crate::Stack) it serves; nothing here is global.
//!
//! The first caller's configuration wins. A later caller that passes a
//! different configuration for an already-registered key gets the cached
//! operator unchanged; the registry logs a warning for that case because the
//! later caller's settings are silently dropped.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::{OperatorHandle, Result};

#[derive(Debug)]
struct RegistryEntry {
    handle: Arc<OperatorHandle>,
    config: serde_json::Value,
}

/// Cache of operator handles keyed by `"<scope>/<kind>"`
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Stable registry key for a scope and operator kind
    pub fn key(scope: &str, kind: &str) -> String {
        format!("{scope}/{kind}")
    }

    /// Look up a registered operator
    pub fn get(&self, scope: &str, kind: &str) -> Option<Arc<OperatorHandle>> {
        self.entries
            .get(&Self::key(scope, kind))
            .map(|e| Arc::clone(&e.handle))
    }

    /// Return the registered operator, or build and register one
    ///
    /// `build` runs only when the key is absent. If it fails the error is
    /// returned and nothing is cached.
    pub fn get_or_create<F>(
        &mut self,
        scope: &str,
        kind: &str,
        config: serde_json::Value,
        build: F,
    ) -> Result<Arc<OperatorHandle>>
    where
        F: FnOnce() -> Result<OperatorHandle>,
    {
        let key = Self::key(scope, kind);

        if let Some(entry) = self.entries.get(&key) {
            if entry.config != config {
                warn!(
                    key = %key,
                    "operator already registered with different configuration; keeping the first"
                );
            } else {
                debug!(key = %key, "reusing registered operator");
            }
            return Ok(Arc::clone(&entry.handle));
        }

        let handle = Arc::new(build()?);
        debug!(key = %key, "registered operator");
        self.entries.insert(
            key,
            RegistryEntry {
                handle: Arc::clone(&handle),
                config,
            },
        );
        Ok(handle)
    }

    /// Number of registered operators
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no operator is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered keys, in order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
