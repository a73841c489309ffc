//! Persistent key/value state (§1 Non-goals): history, learnings, and
//! cross-session resumption metadata, modeled abstractly as a capability
//! trait. No concrete durable backend (database, remote KV) ships in this
//! crate — the `.alphie/decisions.md` and `.alphie/agents/<id>.md` files
//! (§6 Persistent layout) are written directly by the callers that own
//! them, not through this trait.

use std::fmt;

/// Error returned by a [`StateStore`] operation.
#[derive(Debug)]
pub struct StateStoreError {
    /// What operation was being attempted.
    pub operation: &'static str,
    /// Backend-specific diagnostic.
    pub detail: String,
}

impl fmt::Display for StateStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state store '{}' failed: {}", self.operation, self.detail)
    }
}

impl std::error::Error for StateStoreError {}

/// A durable key/value capability for cross-session state (learnings,
/// decisions, resumption metadata).
///
/// Keys are opaque namespaced strings (e.g. `"learnings/<id>"`,
/// `"session/<id>/resume"`); values are caller-serialized bytes. No backend
/// ships with this crate — integrators provide their own (a local sled/KV
/// store, a remote service) by implementing this trait.
pub trait StateStore {
    /// Fetch the bytes stored at `key`, or `None` if unset.
    ///
    /// # Errors
    /// Returns `StateStoreError` on any backend I/O failure.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StateStoreError>;

    /// Store `value` at `key`, replacing any existing value.
    ///
    /// # Errors
    /// Returns `StateStoreError` on any backend I/O failure.
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StateStoreError>;

    /// Remove the value at `key`, if any. Removing an absent key is not an
    /// error.
    ///
    /// # Errors
    /// Returns `StateStoreError` on any backend I/O failure.
    fn delete(&self, key: &str) -> Result<(), StateStoreError>;

    /// List every key under `prefix`.
    ///
    /// # Errors
    /// Returns `StateStoreError` on any backend I/O failure.
    fn list(&self, prefix: &str) -> Result<Vec<String>, StateStoreError>;
}
