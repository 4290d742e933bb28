//! State types a [`Store`](super::Store) can hold.
//!
//! A store never mutates its state in place. Each update merges a patch into
//! the current state and produces a new value, which becomes the snapshot
//! handed to readers and kept in history.

use indexmap::IndexMap;
use serde_json::Value;

/// A record-like state that accepts shallow partial updates.
///
/// ```rust
/// use ripple_core::store::StoreState;
///
/// #[derive(Clone, Debug, PartialEq)]
/// struct Filters {
///     query: String,
///     page: u32,
/// }
///
/// #[derive(Default)]
/// struct FiltersPatch {
///     query: Option<String>,
///     page: Option<u32>,
/// }
///
/// impl StoreState for Filters {
///     type Patch = FiltersPatch;
///
///     fn merge(&self, patch: FiltersPatch) -> Self {
///         Self {
///             query: patch.query.unwrap_or_else(|| self.query.clone()),
///             page: patch.page.unwrap_or(self.page),
///         }
///     }
/// }
/// ```
pub trait StoreState: Send + Sync + 'static {
    /// A partial update: the fields to overwrite.
    type Patch;

    /// Produce a new state with `patch` shallow-merged over `self`.
    fn merge(&self, patch: Self::Patch) -> Self;
}

/// Objects merge key by key; any other patch replaces the state.
impl StoreState for Value {
    type Patch = Value;

    fn merge(&self, patch: Value) -> Self {
        match (self, patch) {
            (Value::Object(current), Value::Object(patch)) => {
                let mut merged = current.clone();
                for (key, value) in patch {
                    merged.insert(key, value);
                }
                Value::Object(merged)
            }
            (_, patch) => patch,
        }
    }
}

/// Keys in the patch overwrite existing keys in place or append new ones.
impl<V> StoreState for IndexMap<String, V>
where
    V: Clone + Send + Sync + 'static,
{
    type Patch = IndexMap<String, V>;

    fn merge(&self, patch: Self::Patch) -> Self {
        let mut merged = self.clone();
        merged.extend(patch);
        merged
    }
}
