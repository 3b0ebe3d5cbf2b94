//! Symbol Availability Resolver
//!
//! Maps each requested symbol either to itself, when the durable store holds
//! any history for it, or to a single configured fallback symbol. The mapping
//! is computed once from a snapshot of the store and never changes afterward.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::application::ports::{BarStore, StoreError};

/// Frozen requested → resolved symbol mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolResolver {
    /// Requested symbols in the order they were given.
    requested: Vec<String>,
    mapping: HashMap<String, String>,
    fallback: String,
}

impl SymbolResolver {
    /// Build a resolver by querying the store for symbols with history.
    ///
    /// # Errors
    ///
    /// Returns the store error when the availability query fails.
    pub async fn build(
        requested: &[String],
        store: &dyn BarStore,
        fallback: &str,
    ) -> Result<Self, StoreError> {
        let available = store.symbols_with_history().await?;
        Ok(Self::from_available(requested, &available, fallback))
    }

    /// Build a resolver from an already-known availability set.
    #[must_use]
    pub fn from_available(requested: &[String], available: &HashSet<String>, fallback: &str) -> Self {
        let mut ordered = Vec::with_capacity(requested.len());
        let mut mapping = HashMap::with_capacity(requested.len());

        for symbol in requested {
            if mapping.contains_key(symbol) {
                continue;
            }
            let resolved = if available.contains(symbol) {
                symbol.clone()
            } else {
                tracing::warn!(
                    requested = %symbol,
                    fallback = %fallback,
                    "No stored history for symbol, serving fallback"
                );
                fallback.to_string()
            };
            ordered.push(symbol.clone());
            mapping.insert(symbol.clone(), resolved);
        }

        Self {
            requested: ordered,
            mapping,
            fallback: fallback.to_string(),
        }
    }

    /// Symbol whose history serves `symbol`, if it was requested.
    #[must_use]
    pub fn resolve(&self, symbol: &str) -> Option<&str> {
        self.mapping.get(symbol).map(String::as_str)
    }

    /// The full mapping.
    #[must_use]
    pub const fn mapping(&self) -> &HashMap<String, String> {
        &self.mapping
    }

    /// (requested, resolved) pairs in requested order.
    #[must_use]
    pub fn lanes(&self) -> Vec<(String, String)> {
        self.requested
            .iter()
            .filter_map(|s| self.mapping.get(s).map(|r| (s.clone(), r.clone())))
            .collect()
    }

    /// Distinct resolved symbols, sorted.
    #[must_use]
    pub fn distinct_resolved(&self) -> BTreeSet<String> {
        self.mapping.values().cloned().collect()
    }

    /// Configured fallback symbol.
    #[must_use]
    pub fn fallback(&self) -> &str {
        &self.fallback
    }
}
