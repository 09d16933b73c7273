use one_common::Hash;
use one_objects::OneObjectError;
use thiserror::Error;

/// Errors produced by the channel subsystem.
#[derive(Error, Debug)]
pub enum OneChannelError {
    /// A stored record does not have the shape of a channel record.
    #[error("object {hash} is not a valid channel record")]
    MalformedChannelRecord {
        /// The offending object.
        hash: Hash,
    },

    /// A chain yielded entries out of strictly descending key order.
    #[error("entry {entry} violates the chain order invariant")]
    ChainOrderViolation {
        /// The entry whose key is not below its successor's.
        entry: Hash,
    },

    /// The object layer failed underneath.
    #[error(transparent)]
    Object(#[from] OneObjectError),
}

impl OneChannelError {
    /// The stable short code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            OneChannelError::MalformedChannelRecord { .. } => "MicrodataMalformed",
            OneChannelError::ChainOrderViolation { .. } => "MicrodataMalformed",
            OneChannelError::Object(inner) => inner.code(),
        }
    }
}
