//! Error types for rate limiting.

use crate::storage::StorageError;

/// Errors that can occur during rate limiting.
///
/// A denied request is not an error: the admission checks return `false` for
/// that. Errors are reserved for the storage backend failing, and callers
/// must propagate them rather than treat them as an implicit allow or deny.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
