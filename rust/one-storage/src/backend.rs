use async_trait::async_trait;

use crate::{Namespace, OneStorageError};

mod memory;
pub use memory::*;

mod fs;
pub use fs::*;

/// A [`StorageBackend`] is a facade over some storage substrate that keeps
/// named byte sequences per namespace.
///
/// Backends are dumb: uniqueness, appending, encryption and hashing all live
/// in [`crate::HashedStore`]. A backend only has to move bytes and answer
/// directory-style questions.
#[async_trait]
pub trait StorageBackend: Clone + Send + Sync + 'static {
    /// Stores bytes under a name, replacing any previous content.
    async fn put(
        &self,
        namespace: Namespace,
        name: &str,
        bytes: &[u8],
    ) -> Result<(), OneStorageError>;

    /// Retrieves the bytes stored under a name, if any.
    async fn get(
        &self,
        namespace: Namespace,
        name: &str,
    ) -> Result<Option<Vec<u8>>, OneStorageError>;

    /// Removes a record. Returns whether it existed.
    async fn remove(&self, namespace: Namespace, name: &str) -> Result<bool, OneStorageError>;

    /// Whether a record exists.
    async fn contains(&self, namespace: Namespace, name: &str) -> Result<bool, OneStorageError>;

    /// The stored byte size of a record, if it exists.
    async fn size(&self, namespace: Namespace, name: &str)
    -> Result<Option<u64>, OneStorageError>;

    /// The names stored in a namespace, optionally filtered by prefix,
    /// sorted.
    async fn list(
        &self,
        namespace: Namespace,
        prefix: Option<&str>,
    ) -> Result<Vec<String>, OneStorageError>;

    /// Atomically moves a record to a new name within the same namespace.
    async fn rename(
        &self,
        namespace: Namespace,
        from: &str,
        to: &str,
    ) -> Result<(), OneStorageError>;
}
