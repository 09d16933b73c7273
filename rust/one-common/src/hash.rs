use sha2::{Digest, Sha256};

use crate::OneAddressError;

/// The width of every content address in bytes.
///
/// Addresses are SHA-256 digests, rendered as 64 lowercase hex characters.
pub const HASH_SIZE: usize = 32;

macro_rules! address_type {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name([u8; HASH_SIZE]);

        impl $name {
            /// Computes the address of the given bytes.
            pub fn digest(bytes: impl AsRef<[u8]>) -> Self {
                let mut hasher = Sha256::new();
                hasher.update(bytes.as_ref());
                Self(hasher.finalize().into())
            }

            /// Wraps a raw 32-byte digest.
            pub fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
                Self(bytes)
            }

            /// The raw digest bytes.
            pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
                &self.0
            }

            /// Renders the address as 64 lowercase hex characters.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parses the 64-lowercase-hex-character form of an address.
            pub fn from_hex(input: &str) -> Result<Self, OneAddressError> {
                let malformed = || OneAddressError::MalformedAddress {
                    input: input.chars().take(80).collect(),
                    expected: HASH_SIZE * 2,
                };
                if input.len() != HASH_SIZE * 2
                    || !input.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
                {
                    return Err(malformed());
                }
                let mut bytes = [0u8; HASH_SIZE];
                hex::decode_to_slice(input, &mut bytes).map_err(|_| malformed())?;
                Ok(Self(bytes))
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!(stringify!($name), "({}…)"), &self.to_hex()[..8])
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let text = String::deserialize(deserializer)?;
                Self::from_hex(&text).map_err(serde::de::Error::custom)
            }
        }
    };
}

address_type!(
    /// The content address of a record: the SHA-256 digest of its canonical
    /// textual form (or of the raw bytes, for blobs and clobs).
    Hash
);

address_type!(
    /// The identity address of a versioned record: the SHA-256 digest of its
    /// ID-object frame.
    ///
    /// The ID-object frame carries a sentinel attribute that no canonical
    /// record contains, so an [`IdHash`] can never equal the [`Hash`] of any
    /// stored record. The two are distinct types on purpose; converting
    /// between them is always a bug.
    IdHash
);

/// A participant is identified by the identity address of their Person
/// record.
pub type PersonId = IdHash;

/// Incremental SHA-256 over streamed content.
///
/// Used when hashing a blob that arrives in chunks, where the full byte
/// sequence is never materialized at once.
#[derive(Default)]
pub struct ContentHasher(Sha256);

impl ContentHasher {
    /// Creates a fresh hasher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds another chunk into the digest.
    pub fn update(&mut self, bytes: impl AsRef<[u8]>) {
        self.0.update(bytes.as_ref());
    }

    /// Finishes the digest and returns the resulting content address.
    pub fn finalize(self) -> Hash {
        Hash::from_bytes(self.0.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;

    #[test]
    fn it_round_trips_through_hex() -> Result<()> {
        let hash = Hash::digest(b"hello world");
        let parsed = Hash::from_hex(&hash.to_hex())?;
        assert_eq!(hash, parsed);
        Ok(())
    }

    #[test]
    fn it_matches_the_known_sha256_of_the_input() {
        // sha256("abc"), straight from the FIPS 180-2 test vectors.
        let hash = Hash::digest(b"abc");
        assert_eq!(
            hash.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn it_rejects_uppercase_and_short_input() {
        assert!(Hash::from_hex("ABCD").is_err());
        let upper = Hash::digest(b"x").to_hex().to_uppercase();
        assert!(Hash::from_hex(&upper).is_err());
    }

    #[test]
    fn it_hashes_incrementally_the_same_as_at_once() {
        let mut hasher = ContentHasher::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finalize(), Hash::digest(b"hello world"));
    }
}
