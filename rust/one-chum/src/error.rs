use one_access::OneAccessError;
use one_common::{Hash, IdHash};
use one_objects::OneObjectError;
use thiserror::Error;

/// Errors produced by a chum session.
#[derive(Error, Debug)]
pub enum OneChumError {
    /// A request did not complete within its deadline.
    #[error("request {request_id} timed out after {millis} ms")]
    Timeout {
        /// The request that timed out.
        request_id: u64,
        /// The deadline that was exceeded.
        millis: u64,
    },

    /// A frame could not be decoded as this protocol.
    #[error("peer speaks a different protocol: {reason}")]
    ProtocolMismatch {
        /// What failed to decode.
        reason: String,
    },

    /// The transport closed underneath the session.
    #[error("transport closed")]
    TransportClosed,

    /// The peer sent a request this session cannot serve.
    #[error("invalid request: {reason}")]
    InvalidRequest {
        /// What was wrong with it.
        reason: &'static str,
    },

    /// Fetched bytes do not hash to the requested address.
    #[error("content hashes to {actual}, requested {expected}")]
    HashMismatch {
        /// The requested address.
        expected: Hash,
        /// What the bytes actually hash to.
        actual: Hash,
    },

    /// A fetched ID-object frame does not hash to the requested identity.
    #[error("id object hashes to {actual}, requested {expected}")]
    IdHashMismatch {
        /// The requested identity.
        expected: IdHash,
        /// What the frame actually hashes to.
        actual: IdHash,
    },

    /// The peer tried to push an access-bearing record type.
    #[error("inbound {type_name} records are refused")]
    ForbiddenType {
        /// The refused type.
        type_name: String,
    },

    /// The access layer refused a request.
    #[error(transparent)]
    Access(#[from] OneAccessError),

    /// The object layer failed underneath.
    #[error(transparent)]
    Object(#[from] OneObjectError),
}

impl OneChumError {
    /// The stable short code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            OneChumError::Timeout { .. } => "Timeout",
            OneChumError::ProtocolMismatch { .. } => "ProtocolMismatch",
            OneChumError::TransportClosed => "TransportClosed",
            OneChumError::InvalidRequest { .. } => "InvalidRequest",
            OneChumError::HashMismatch { .. } => "HashMismatch",
            OneChumError::IdHashMismatch { .. } => "IdHashMismatch",
            OneChumError::ForbiddenType { .. } => "ForbiddenType",
            OneChumError::Access(inner) => inner.code(),
            OneChumError::Object(inner) => inner.code(),
        }
    }
}
