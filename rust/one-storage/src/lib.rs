#![warn(missing_docs)]

//! The hashed store: write-once records in six namespaces over a pluggable
//! [`StorageBackend`], with optional per-record encryption.
//!
//! The store knows nothing about recipes or channels — it moves named byte
//! sequences. Objects, blobs and clobs are write-once (a second write of the
//! same name is a no-op reported as [`WriteStatus::AlreadyExisted`]); the
//! version-map and reverse-map namespaces additionally support atomic
//! appends and overwrites. When encryption is enabled, every record is
//! sealed with a per-write random nonce and filenames are sealed with a
//! single static nonce (the names are high-entropy hashes already).
//!
//! ```rust
//! use one_storage::{HashedStore, MemoryStorageBackend, Namespace};
//!
//! # async fn example() -> Result<(), one_storage::OneStorageError> {
//! let store = HashedStore::new(MemoryStorageBackend::new());
//! let (hash, _status) = store.write_blob(b"raw bytes").await?;
//! let bytes = store.read(Namespace::Blobs, &hash.to_hex()).await?;
//! # Ok(())
//! # }
//! ```

mod error;
pub use error::*;

mod namespace;
pub use namespace::*;

mod backend;
pub use backend::*;

mod crypto;
pub use crypto::*;

mod keys;
pub use keys::*;

mod store;
pub use store::*;

mod stream;
pub use stream::*;
