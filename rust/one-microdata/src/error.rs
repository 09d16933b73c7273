use one_common::Hash;
use one_recipes::OneRecipeError;
use thiserror::Error;

/// Errors produced by the microdata codec.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OneMicrodataError {
    /// A mandatory field is absent.
    #[error("{type_name}.{itemprop} is mandatory but missing")]
    MissingMandatoryField {
        /// The record type.
        type_name: String,
        /// The missing field.
        itemprop: String,
    },

    /// A value does not have the type its rule demands, or violates the
    /// rule's bounds or uniqueness constraints.
    #[error("{type_name}.{path}: expected {expected}, found {found}")]
    TypeMismatch {
        /// The record type.
        type_name: String,
        /// Dotted path of the offending field.
        path: String,
        /// What the rule demands.
        expected: &'static str,
        /// What was actually there.
        found: String,
    },

    /// A string value does not match its rule's regex.
    #[error("{type_name}.{path}: value does not match /{regex}/")]
    RegexFailed {
        /// The record type.
        type_name: String,
        /// Dotted path of the offending field.
        path: String,
        /// The regex that failed.
        regex: String,
    },

    /// A field name appears that the recipe does not know.
    #[error("{type_name} has no rule for itemprop {itemprop:?}")]
    UnknownItemprop {
        /// The record type.
        type_name: String,
        /// The unexpected field.
        itemprop: String,
    },

    /// The type URI names a recipe that is not registered.
    #[error("unknown record type {name:?}")]
    UnknownType {
        /// The unregistered type name.
        name: String,
    },

    /// The bytes of a record do not hash to the address they were requested
    /// under.
    #[error("content hashes to {actual}, expected {expected}")]
    HashMismatch {
        /// The address the content was requested under.
        expected: Hash,
        /// What the content actually hashes to.
        actual: Hash,
    },

    /// Input continues past the end of the record.
    #[error("trailing input at byte {at}")]
    TrailingInput {
        /// Byte offset of the first trailing character.
        at: usize,
    },

    /// The input is not canonical microdata.
    #[error("malformed microdata at byte {at}: {reason}")]
    MicrodataMalformed {
        /// Byte offset at which parsing failed.
        at: usize,
        /// What was expected there.
        reason: &'static str,
    },

    /// The recipe registry rejected a lookup.
    #[error(transparent)]
    Recipe(#[from] OneRecipeError),
}

impl OneMicrodataError {
    /// The stable short code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            OneMicrodataError::MissingMandatoryField { .. } => "MissingMandatoryField",
            OneMicrodataError::TypeMismatch { .. } => "TypeMismatch",
            OneMicrodataError::RegexFailed { .. } => "RegexFailed",
            OneMicrodataError::UnknownItemprop { .. } => "UnknownItemprop",
            OneMicrodataError::UnknownType { .. } => "TypeMismatch",
            OneMicrodataError::HashMismatch { .. } => "HashMismatch",
            OneMicrodataError::TrailingInput { .. } => "TrailingInput",
            OneMicrodataError::MicrodataMalformed { .. } => "MicrodataMalformed",
            OneMicrodataError::Recipe(inner) => inner.code(),
        }
    }
}
