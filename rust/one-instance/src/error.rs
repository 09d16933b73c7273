use one_access::OneAccessError;
use one_channels::OneChannelError;
use one_objects::OneObjectError;
use one_recipes::OneRecipeError;
use one_storage::OneStorageError;
use thiserror::Error;

/// Errors produced while booting or tearing down an instance.
#[derive(Error, Debug)]
pub enum OneInstanceError {
    /// An instance with this identity already exists on disk.
    #[error("instance {name:?} for {email:?} already exists")]
    InstanceExists {
        /// The instance name.
        name: String,
        /// The owning email.
        email: String,
    },

    /// No instance with this identity exists on disk.
    #[error("instance {name:?} for {email:?} does not exist")]
    InstanceNotFound {
        /// The instance name.
        name: String,
        /// The owning email.
        email: String,
    },

    /// Storage initialization exceeded its deadline.
    #[error("storage initialization exceeded {millis} ms")]
    Timeout {
        /// The deadline that was exceeded.
        millis: u64,
    },

    /// The storage layer failed (including `AuthFailed` when the stored
    /// keys do not unwrap with the supplied secret).
    #[error(transparent)]
    Storage(#[from] OneStorageError),

    /// The recipe registry rejected the bootstrap or initial recipes.
    #[error(transparent)]
    Recipe(#[from] OneRecipeError),

    /// The object layer failed during bootstrap.
    #[error(transparent)]
    Object(#[from] OneObjectError),

    /// The channel layer failed during bootstrap.
    #[error(transparent)]
    Channel(#[from] OneChannelError),

    /// The access layer failed during bootstrap.
    #[error(transparent)]
    Access(#[from] OneAccessError),
}

impl OneInstanceError {
    /// The stable short code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            OneInstanceError::InstanceExists { .. } => "InstanceExists",
            OneInstanceError::InstanceNotFound { .. } => "InstanceNotFound",
            OneInstanceError::Timeout { .. } => "Timeout",
            OneInstanceError::Storage(inner) => inner.code(),
            OneInstanceError::Recipe(inner) => inner.code(),
            OneInstanceError::Object(inner) => inner.code(),
            OneInstanceError::Channel(inner) => inner.code(),
            OneInstanceError::Access(inner) => inner.code(),
        }
    }
}
