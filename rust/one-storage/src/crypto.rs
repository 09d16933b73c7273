use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{Key, KeyInit, XChaCha20Poly1305, XNonce};
use rand::RngCore;

/// Byte length of the per-record random nonce.
pub const NONCE_LEN: usize = 24;
/// Byte length of the AEAD authentication tag.
pub const TAG_LEN: usize = 16;
/// Byte length of symmetric keys.
pub const KEY_LEN: usize = 32;

/// `padding_len(1) || kind(1)` inside the sealed plaintext.
const INNER_HEADER_LEN: usize = 2;
/// The padding byte count is `padding_len >> 3`, so at most this many.
const MAX_PADDING: u64 = (u8::MAX >> 3) as u64;

/// Whether sealed content is raw bytes or UTF-8 text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Raw bytes.
    Binary,
    /// UTF-8 text.
    Text,
}

impl RecordKind {
    fn byte(self) -> u8 {
        match self {
            RecordKind::Binary => 0,
            RecordKind::Text => 1,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(RecordKind::Binary),
            1 => Some(RecordKind::Text),
            _ => None,
        }
    }
}

/// Derives the secret-scoped master key from a user secret and a stored
/// salt. The scrypt parameters are fixed for the life of the instance.
pub fn derive_master_key(secret: &str, salt: &[u8]) -> [u8; KEY_LEN] {
    let params = scrypt::Params::new(15, 8, 1, KEY_LEN).expect("fixed scrypt parameters");
    let mut key = [0u8; KEY_LEN];
    scrypt::scrypt(secret.as_bytes(), salt, &params, &mut key)
        .expect("output length is non-zero");
    key
}

/// Seals plaintext under the given key with a fresh random nonce, producing
/// `nonce(24) || ciphertext`.
pub(crate) fn seal_with(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Vec<u8> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let sealed = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .expect("sealing is infallible for in-memory plaintext");
    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    out
}

/// Opens `nonce(24) || ciphertext`. Returns `None` when authentication
/// fails or the layout is wrong.
pub(crate) fn open_with(key: &[u8; KEY_LEN], bytes: &[u8]) -> Option<Vec<u8>> {
    if bytes.len() < NONCE_LEN + TAG_LEN {
        return None;
    }
    let (nonce, sealed) = bytes.split_at(NONCE_LEN);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    cipher.decrypt(XNonce::from_slice(nonce), sealed).ok()
}

/// The unwrapped key material of an encrypted store: a content key, a
/// filename key and the static filename nonce.
#[derive(Debug, Clone)]
pub struct StoreCrypto {
    storage_key: [u8; KEY_LEN],
    filename_key: [u8; KEY_LEN],
    filename_nonce: [u8; NONCE_LEN],
}

impl StoreCrypto {
    /// Assembles the bundle from unwrapped key material.
    pub fn new(
        storage_key: [u8; KEY_LEN],
        filename_key: [u8; KEY_LEN],
        filename_nonce: [u8; NONCE_LEN],
    ) -> Self {
        Self {
            storage_key,
            filename_key,
            filename_nonce,
        }
    }

    /// Generates a fresh random bundle.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut storage_key = [0u8; KEY_LEN];
        let mut filename_key = [0u8; KEY_LEN];
        let mut filename_nonce = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut storage_key);
        rng.fill_bytes(&mut filename_key);
        rng.fill_bytes(&mut filename_nonce);
        Self::new(storage_key, filename_key, filename_nonce)
    }

    /// The raw key material, in (storage key, filename key, filename nonce)
    /// order. Used when rewrapping under a new secret.
    pub fn material(&self) -> ([u8; KEY_LEN], [u8; KEY_LEN], [u8; NONCE_LEN]) {
        (self.storage_key, self.filename_key, self.filename_nonce)
    }

    /// Seals record content as
    /// `nonce(24) || seal(padding_len(1) || padding || kind(1) || content)`.
    ///
    /// The random padding (0–31 bytes) blurs the exact plaintext length;
    /// [`StoreCrypto::plaintext_size_estimate`] undoes the fixed overhead.
    pub fn seal_record(&self, kind: RecordKind, content: &[u8]) -> Vec<u8> {
        let mut rng = rand::thread_rng();
        let padding_len = {
            let mut byte = [0u8; 1];
            rng.fill_bytes(&mut byte);
            byte[0]
        };
        let padding_count = (padding_len >> 3) as usize;
        let mut inner = Vec::with_capacity(INNER_HEADER_LEN + padding_count + content.len());
        inner.push(padding_len);
        let mut padding = vec![0u8; padding_count];
        rng.fill_bytes(&mut padding);
        inner.extend_from_slice(&padding);
        inner.push(kind.byte());
        inner.extend_from_slice(content);
        seal_with(&self.storage_key, &inner)
    }

    /// Opens a sealed record, returning its kind and content. `None` on any
    /// authentication or layout failure.
    pub fn open_record(&self, bytes: &[u8]) -> Option<(RecordKind, Vec<u8>)> {
        let inner = open_with(&self.storage_key, bytes)?;
        let (&padding_len, rest) = inner.split_first()?;
        let padding_count = (padding_len >> 3) as usize;
        if rest.len() < padding_count + 1 {
            return None;
        }
        let rest = &rest[padding_count..];
        let (&kind_byte, content) = rest.split_first()?;
        let kind = RecordKind::from_byte(kind_byte)?;
        Some((kind, content.to_vec()))
    }

    /// The plaintext size reported for a sealed record: exact up to the
    /// random padding, so within ±16 bytes of the true length.
    pub fn plaintext_size_estimate(stored: u64) -> u64 {
        stored
            .saturating_sub((NONCE_LEN + TAG_LEN + INNER_HEADER_LEN) as u64)
            .saturating_sub(MAX_PADDING / 2)
    }

    /// Seals a record name with the filename key and the static filename
    /// nonce, rendered base64url. Deterministic, so names remain usable as
    /// lookup keys.
    pub fn seal_name(&self, name: &str) -> String {
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&self.filename_key));
        let sealed = cipher
            .encrypt(XNonce::from_slice(&self.filename_nonce), name.as_bytes())
            .expect("sealing is infallible for in-memory plaintext");
        URL_SAFE_NO_PAD.encode(sealed)
    }

    /// Reverses [`StoreCrypto::seal_name`].
    pub fn open_name(&self, sealed: &str) -> Option<String> {
        let bytes = URL_SAFE_NO_PAD.decode(sealed).ok()?;
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&self.filename_key));
        let name = cipher
            .decrypt(XNonce::from_slice(&self.filename_nonce), bytes.as_slice())
            .ok()?;
        String::from_utf8(name).ok()
    }
}
