use thiserror::Error;

use crate::Namespace;

/// Errors produced by the hashed store and its streams.
#[derive(Error, Debug)]
pub enum OneStorageError {
    /// The named record does not exist.
    #[error("{namespace}/{name} not found")]
    FileNotFound {
        /// The namespace searched.
        namespace: Namespace,
        /// The missing record name.
        name: String,
    },

    /// A unique-write found the record already present with different
    /// content. (Same-content rewrites are reported as a status, not an
    /// error.)
    #[error("{namespace}/{name} already exists with different content")]
    AlreadyExists {
        /// The namespace written to.
        namespace: Namespace,
        /// The colliding record name.
        name: String,
    },

    /// A ranged read reaches outside the record.
    #[error("range {offset}+{length} is outside a record of {actual} characters")]
    OutOfRange {
        /// The requested offset (negative counts from the end).
        offset: i64,
        /// The requested length.
        length: usize,
        /// The record's actual length in characters.
        actual: usize,
    },

    /// A record was consumed with an encoding its kind does not admit, or
    /// is not valid UTF-8 where text was required.
    #[error("{namespace}/{name} cannot be consumed as {requested}")]
    EncodingMismatch {
        /// The namespace of the record.
        namespace: Namespace,
        /// The record name.
        name: String,
        /// The encoding the caller asked for.
        requested: &'static str,
    },

    /// A write stream received a chunk of a different kind than its first
    /// chunk established.
    #[error("chunk of kind {received} in a {established} write stream")]
    ChunkTypeMismatch {
        /// The kind established by the stream's encoding.
        established: &'static str,
        /// The kind of the offending chunk.
        received: &'static str,
    },

    /// The stream was canceled; nothing was written.
    #[error("stream canceled")]
    StreamCanceled,

    /// The stream has already delivered its terminal item.
    #[error("stream already ended")]
    StreamEnded,

    /// The backing store has not been initialized (or is gone).
    #[error("storage not initialized at {context}")]
    StorageNotInitialized {
        /// Which part of the store was missing.
        context: String,
    },

    /// An encrypted namespace was touched on a store without keys.
    #[error("encryption not initialized for {namespace}")]
    EncryptionNotInitialized {
        /// The namespace that requires encryption.
        namespace: Namespace,
    },

    /// Sealed bytes failed to authenticate or decrypt.
    #[error("decryption failed for {namespace}/{name}")]
    DecryptionFailed {
        /// The namespace of the record.
        namespace: Namespace,
        /// The record name.
        name: String,
    },

    /// The stored keys cannot be unwrapped with the supplied secret.
    #[error("secret does not unwrap the stored keys")]
    AuthFailed,

    /// The operation is not defined for this namespace or backend.
    #[error("{operation} is not supported on {namespace}")]
    NotSupportedOnThisBackend {
        /// The rejected operation.
        operation: &'static str,
        /// The namespace it was attempted on.
        namespace: Namespace,
    },

    /// An I/O failure underneath the backend.
    #[error("storage I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

impl OneStorageError {
    /// The stable short code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            OneStorageError::FileNotFound { .. } => "FileNotFound",
            OneStorageError::AlreadyExists { .. } => "AlreadyExists",
            OneStorageError::OutOfRange { .. } => "OutOfRange",
            OneStorageError::EncodingMismatch { .. } => "EncodingMismatch",
            OneStorageError::ChunkTypeMismatch { .. } => "ChunkTypeMismatch",
            OneStorageError::StreamCanceled => "StreamCanceled",
            OneStorageError::StreamEnded => "StreamEnded",
            OneStorageError::StorageNotInitialized { .. } => "StorageNotInitialized",
            OneStorageError::EncryptionNotInitialized { .. } => "EncryptionNotInitialized",
            OneStorageError::DecryptionFailed { .. } => "DecryptionFailed",
            OneStorageError::AuthFailed => "AuthFailed",
            OneStorageError::NotSupportedOnThisBackend { .. } => "NotSupportedOnThisBackend",
            OneStorageError::Io(_) => "StorageNotInitialized",
        }
    }
}
