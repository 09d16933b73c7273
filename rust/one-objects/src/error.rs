use one_common::Hash;
use one_microdata::OneMicrodataError;
use one_recipes::OneRecipeError;
use one_storage::OneStorageError;
use thiserror::Error;

/// Errors produced by the typed object layer.
#[derive(Error, Debug)]
pub enum OneObjectError {
    /// A reference field points at a record the store does not hold.
    #[error("{referrer_type}.{field} references missing record {target}")]
    BrokenReference {
        /// The type of the referring record.
        referrer_type: String,
        /// The referring field.
        field: String,
        /// The missing target address.
        target: String,
    },

    /// A stored version node does not have the shape of any node variant.
    #[error("object {hash} is not a version node")]
    MalformedVersionNode {
        /// The offending object.
        hash: Hash,
    },

    /// The recipe layer rejected the operation.
    #[error(transparent)]
    Recipe(#[from] OneRecipeError),

    /// The codec rejected the record.
    #[error(transparent)]
    Microdata(#[from] OneMicrodataError),

    /// The hashed store failed.
    #[error(transparent)]
    Storage(#[from] OneStorageError),
}

impl OneObjectError {
    /// The stable short code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            OneObjectError::BrokenReference { .. } => "BrokenReference",
            OneObjectError::MalformedVersionNode { .. } => "MicrodataMalformed",
            OneObjectError::Recipe(inner) => inner.code(),
            OneObjectError::Microdata(inner) => inner.code(),
            OneObjectError::Storage(inner) => inner.code(),
        }
    }
}
