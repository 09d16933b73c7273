use thiserror::Error;

/// Errors produced when handling raw addresses.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OneAddressError {
    /// The textual form of an address could not be parsed.
    #[error("malformed address {input:?}: expected {expected} lowercase hex characters")]
    MalformedAddress {
        /// The rejected input, truncated for display.
        input: String,
        /// The number of hex characters an address must have.
        expected: usize,
    },
}

impl OneAddressError {
    /// The stable short code for this error, used by UI layers and logs to
    /// route errors without parsing messages.
    pub fn code(&self) -> &'static str {
        match self {
            OneAddressError::MalformedAddress { .. } => "MicrodataMalformed",
        }
    }
}
