use one_common::PersonId;
use one_objects::OneObjectError;
use thiserror::Error;

/// Errors produced by the access layer.
#[derive(Error, Debug)]
pub enum OneAccessError {
    /// The person is not in the effective reader set of the target.
    #[error("person {person} may not access {target}")]
    Unauthorized {
        /// The requesting person.
        person: PersonId,
        /// The target's address, rendered as hex.
        target: String,
    },

    /// The object layer failed underneath.
    #[error(transparent)]
    Object(#[from] OneObjectError),
}

impl OneAccessError {
    /// The stable short code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            OneAccessError::Unauthorized { .. } => "Unauthorized",
            OneAccessError::Object(inner) => inner.code(),
        }
    }
}
