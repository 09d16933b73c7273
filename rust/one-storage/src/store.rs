use std::sync::Arc;

use futures_util::Stream;
use one_common::{Hash, LockMap};

use crate::{
    Namespace, OneStorageError, RecordKind, StorageBackend, StoreCrypto, WriteStatus,
};

/// The hashed store: namespaced, write-once record storage with optional
/// per-record encryption.
///
/// One instance owns one store. All persistence in the substrate funnels
/// through here; higher layers (objects, channels, sync) never touch a
/// [`StorageBackend`] directly. Map namespaces get one in-flight transaction
/// at a time via a per-namespace lock, which is all the serialization the
/// append operation needs.
pub struct HashedStore<B: StorageBackend> {
    backend: B,
    crypto: Option<Arc<StoreCrypto>>,
    encrypt_all: bool,
    locks: Arc<LockMap>,
}

impl<B: StorageBackend> Clone for HashedStore<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            crypto: self.crypto.clone(),
            encrypt_all: self.encrypt_all,
            locks: Arc::clone(&self.locks),
        }
    }
}

impl<B: StorageBackend> HashedStore<B> {
    /// Creates a plaintext store. The private namespace is unusable until
    /// keys are supplied via [`HashedStore::with_encryption`].
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            crypto: None,
            encrypt_all: false,
            locks: Arc::new(LockMap::new()),
        }
    }

    /// Creates a store with key material. When `encrypt_all` is set every
    /// namespace is sealed; otherwise only the private namespace is.
    pub fn with_encryption(backend: B, crypto: StoreCrypto, encrypt_all: bool) -> Self {
        Self {
            backend,
            crypto: Some(Arc::new(crypto)),
            encrypt_all,
            locks: Arc::new(LockMap::new()),
        }
    }

    /// The underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Whether records in this namespace are sealed.
    fn is_encrypted(&self, namespace: Namespace) -> bool {
        match namespace {
            Namespace::Private => true,
            _ => self.encrypt_all && self.crypto.is_some(),
        }
    }

    fn crypto_for(&self, namespace: Namespace) -> Result<Option<&StoreCrypto>, OneStorageError> {
        if !self.is_encrypted(namespace) {
            return Ok(None);
        }
        match &self.crypto {
            Some(crypto) => Ok(Some(crypto)),
            None => Err(OneStorageError::EncryptionNotInitialized { namespace }),
        }
    }

    /// The on-disk name of a record: sealed when the namespace is encrypted.
    fn stored_name(&self, namespace: Namespace, name: &str) -> Result<String, OneStorageError> {
        Ok(match self.crypto_for(namespace)? {
            Some(crypto) => crypto.seal_name(name),
            None => name.to_owned(),
        })
    }

    fn record_kind(namespace: Namespace) -> RecordKind {
        if namespace.holds_text() {
            RecordKind::Text
        } else {
            RecordKind::Binary
        }
    }

    async fn put_raw(
        &self,
        namespace: Namespace,
        name: &str,
        bytes: &[u8],
        kind: RecordKind,
    ) -> Result<(), OneStorageError> {
        let stored_name = self.stored_name(namespace, name)?;
        let payload = match self.crypto_for(namespace)? {
            Some(crypto) => crypto.seal_record(kind, bytes),
            None => bytes.to_vec(),
        };
        self.backend.put(namespace, &stored_name, &payload).await
    }

    pub(crate) async fn get_raw(
        &self,
        namespace: Namespace,
        name: &str,
    ) -> Result<Option<(RecordKind, Vec<u8>)>, OneStorageError> {
        let stored_name = self.stored_name(namespace, name)?;
        let Some(payload) = self.backend.get(namespace, &stored_name).await? else {
            return Ok(None);
        };
        match self.crypto_for(namespace)? {
            Some(crypto) => {
                let (kind, content) =
                    crypto
                        .open_record(&payload)
                        .ok_or_else(|| OneStorageError::DecryptionFailed {
                            namespace,
                            name: name.to_owned(),
                        })?;
                Ok(Some((kind, content)))
            }
            None => Ok(Some((Self::record_kind(namespace), payload))),
        }
    }

    /// Creates the record if absent; never overwrites. The returned status
    /// distinguishes a fresh write from an already existing record.
    pub async fn write_unique(
        &self,
        namespace: Namespace,
        name: &str,
        bytes: &[u8],
    ) -> Result<WriteStatus, OneStorageError> {
        self.write_unique_kind(namespace, name, bytes, Self::record_kind(namespace))
            .await
    }

    /// [`HashedStore::write_unique`] with an explicit record kind, for the
    /// private namespace where the namespace does not imply one.
    pub async fn write_unique_kind(
        &self,
        namespace: Namespace,
        name: &str,
        bytes: &[u8],
        kind: RecordKind,
    ) -> Result<WriteStatus, OneStorageError> {
        let _guard = self.locks.lock(namespace.dir_name()).await;
        let stored_name = self.stored_name(namespace, name)?;
        if self.backend.contains(namespace, &stored_name).await? {
            return Ok(WriteStatus::AlreadyExisted);
        }
        self.put_raw(namespace, name, bytes, kind).await?;
        Ok(WriteStatus::New)
    }

    /// Replaces a record. Only defined for the map namespaces.
    pub async fn write_overwrite(
        &self,
        namespace: Namespace,
        name: &str,
        bytes: &[u8],
    ) -> Result<(), OneStorageError> {
        if !namespace.is_map() {
            return Err(OneStorageError::NotSupportedOnThisBackend {
                operation: "write_overwrite",
                namespace,
            });
        }
        let _guard = self.locks.lock(namespace.dir_name()).await;
        self.put_raw(namespace, name, bytes, RecordKind::Text).await
    }

    /// Appends bytes to a map record in one transaction, creating it if
    /// absent. The old content is always a byte prefix of the new content.
    pub async fn append(
        &self,
        namespace: Namespace,
        name: &str,
        bytes: &[u8],
    ) -> Result<(), OneStorageError> {
        if !namespace.is_map() {
            return Err(OneStorageError::NotSupportedOnThisBackend {
                operation: "append",
                namespace,
            });
        }
        let _guard = self.locks.lock(namespace.dir_name()).await;
        let mut content = match self.get_raw(namespace, name).await? {
            Some((_, existing)) => existing,
            None => Vec::new(),
        };
        content.extend_from_slice(bytes);
        self.put_raw(namespace, name, &content, RecordKind::Text)
            .await
    }

    /// Reads a record's bytes. Fails with `FileNotFound` if absent.
    pub async fn read(&self, namespace: Namespace, name: &str) -> Result<Vec<u8>, OneStorageError> {
        match self.get_raw(namespace, name).await? {
            Some((_, bytes)) => Ok(bytes),
            None => Err(OneStorageError::FileNotFound {
                namespace,
                name: name.to_owned(),
            }),
        }
    }

    /// Reads a record as text. Fails with `EncodingMismatch` when the record
    /// is binary or not valid UTF-8.
    pub async fn read_text(
        &self,
        namespace: Namespace,
        name: &str,
    ) -> Result<String, OneStorageError> {
        let mismatch = || OneStorageError::EncodingMismatch {
            namespace,
            name: name.to_owned(),
            requested: "utf8",
        };
        match self.get_raw(namespace, name).await? {
            Some((RecordKind::Text, bytes)) => String::from_utf8(bytes).map_err(|_| mismatch()),
            Some((RecordKind::Binary, _)) => Err(mismatch()),
            None => Err(OneStorageError::FileNotFound {
                namespace,
                name: name.to_owned(),
            }),
        }
    }

    /// Reads a character range of a text record. A negative offset counts
    /// from the end; a slice reaching outside the record is `OutOfRange`.
    pub async fn read_range(
        &self,
        namespace: Namespace,
        name: &str,
        offset: i64,
        length: usize,
    ) -> Result<String, OneStorageError> {
        let text = self.read_text(namespace, name).await?;
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();

        let out_of_range = || OneStorageError::OutOfRange {
            offset,
            length,
            actual: total,
        };
        let start = if offset < 0 {
            (total as i64 + offset).try_into().map_err(|_| out_of_range())?
        } else {
            offset as usize
        };
        let end = start.checked_add(length).ok_or_else(out_of_range)?;
        if end > total {
            return Err(out_of_range());
        }
        Ok(chars[start..end].iter().collect())
    }

    /// Whether the record exists.
    pub async fn exists(&self, namespace: Namespace, name: &str) -> Result<bool, OneStorageError> {
        let stored_name = self.stored_name(namespace, name)?;
        self.backend.contains(namespace, &stored_name).await
    }

    /// The record's size in bytes: exact for plaintext records, within ±16
    /// bytes for sealed ones (random padding blurs the exact length).
    pub async fn size(&self, namespace: Namespace, name: &str) -> Result<u64, OneStorageError> {
        let stored_name = self.stored_name(namespace, name)?;
        let stored = self
            .backend
            .size(namespace, &stored_name)
            .await?
            .ok_or_else(|| OneStorageError::FileNotFound {
                namespace,
                name: name.to_owned(),
            })?;
        Ok(if self.is_encrypted(namespace) {
            StoreCrypto::plaintext_size_estimate(stored)
        } else {
            stored
        })
    }

    /// The names in a namespace as a lazy sequence, optionally filtered by
    /// prefix. Sealed names are unsealed before filtering.
    pub fn list<'a>(
        &'a self,
        namespace: Namespace,
        prefix: Option<&'a str>,
    ) -> impl Stream<Item = Result<String, OneStorageError>> + 'a {
        async_stream::try_stream! {
            let encrypted = self.is_encrypted(namespace);
            // With sealed names the prefix can only be applied after
            // unsealing.
            let stored_prefix = if encrypted { None } else { prefix };
            let names = self.backend.list(namespace, stored_prefix).await?;
            for stored_name in names {
                let name = if encrypted {
                    let crypto = self.crypto_for(namespace)?.expect("encrypted namespaces have keys");
                    match crypto.open_name(&stored_name) {
                        Some(name) => name,
                        // Bootstrap key records carry literal names.
                        None => continue,
                    }
                } else {
                    stored_name
                };
                if prefix.is_some_and(|prefix| !name.starts_with(prefix)) {
                    continue;
                }
                yield name;
            }
        }
    }

    /// Removes a record. A no-op if it does not exist.
    pub async fn delete(&self, namespace: Namespace, name: &str) -> Result<bool, OneStorageError> {
        let stored_name = self.stored_name(namespace, name)?;
        self.backend.remove(namespace, &stored_name).await
    }

    /// Writes canonical record text under its content address.
    pub async fn write_object_text(
        &self,
        text: &str,
    ) -> Result<(Hash, WriteStatus), OneStorageError> {
        let hash = Hash::digest(text);
        let status = self
            .write_unique(Namespace::Objects, &hash.to_hex(), text.as_bytes())
            .await?;
        Ok((hash, status))
    }

    /// Writes a binary blob under its content address.
    pub async fn write_blob(&self, bytes: &[u8]) -> Result<(Hash, WriteStatus), OneStorageError> {
        let hash = Hash::digest(bytes);
        let status = self
            .write_unique(Namespace::Blobs, &hash.to_hex(), bytes)
            .await?;
        Ok((hash, status))
    }

    /// Writes a UTF-8 clob under its content address.
    pub async fn write_clob(&self, text: &str) -> Result<(Hash, WriteStatus), OneStorageError> {
        let hash = Hash::digest(text);
        let status = self
            .write_unique(Namespace::Clobs, &hash.to_hex(), text.as_bytes())
            .await?;
        Ok((hash, status))
    }

    /// Reads the canonical text of an object by content address.
    pub async fn read_object_text(&self, hash: Hash) -> Result<String, OneStorageError> {
        self.read_text(Namespace::Objects, &hash.to_hex()).await
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use futures_util::TryStreamExt;

    use super::*;
    use crate::{FileSystemStorageBackend, MemoryStorageBackend, init_keys};

    #[tokio::test]
    async fn it_keeps_unique_writes_write_once() -> Result<()> {
        let store = HashedStore::new(MemoryStorageBackend::new());
        let (hash, status) = store.write_blob(b"payload").await?;
        assert_eq!(status, WriteStatus::New);
        let (again, status) = store.write_blob(b"payload").await?;
        assert_eq!(status, WriteStatus::AlreadyExisted);
        assert_eq!(hash, again);
        assert_eq!(store.read(Namespace::Blobs, &hash.to_hex()).await?, b"payload");
        Ok(())
    }

    #[tokio::test]
    async fn it_appends_monotonically() -> Result<()> {
        let store = HashedStore::new(MemoryStorageBackend::new());
        store
            .append(Namespace::VersionMaps, "map", b"line one\n")
            .await?;
        let before = store.read(Namespace::VersionMaps, "map").await?;
        store
            .append(Namespace::VersionMaps, "map", b"line two\n")
            .await?;
        let after = store.read(Namespace::VersionMaps, "map").await?;
        assert!(after.starts_with(&before));
        assert_eq!(after, b"line one\nline two\n");
        Ok(())
    }

    #[tokio::test]
    async fn it_refuses_append_outside_map_namespaces() -> Result<()> {
        let store = HashedStore::new(MemoryStorageBackend::new());
        let error = store
            .append(Namespace::Objects, "x", b"nope")
            .await
            .unwrap_err();
        assert_eq!(error.code(), "NotSupportedOnThisBackend");
        Ok(())
    }

    #[tokio::test]
    async fn it_reads_character_ranges_with_negative_offsets() -> Result<()> {
        let store = HashedStore::new(MemoryStorageBackend::new());
        let (hash, _) = store.write_clob("héllo wörld").await?;
        let name = hash.to_hex();

        assert_eq!(store.read_range(Namespace::Clobs, &name, 0, 5).await?, "héllo");
        assert_eq!(store.read_range(Namespace::Clobs, &name, -5, 5).await?, "wörld");
        let error = store
            .read_range(Namespace::Clobs, &name, 8, 10)
            .await
            .unwrap_err();
        assert_eq!(error.code(), "OutOfRange");
        Ok(())
    }

    #[tokio::test]
    async fn it_lists_with_prefix_filters() -> Result<()> {
        let store = HashedStore::new(MemoryStorageBackend::new());
        store
            .write_unique(Namespace::ReverseMaps, "aa.ReverseMap.Access.object", b"x\n")
            .await?;
        store
            .write_unique(Namespace::ReverseMaps, "ab.ReverseMap.Access.object", b"y\n")
            .await?;
        let names: Vec<String> = store
            .list(Namespace::ReverseMaps, Some("aa."))
            .try_collect()
            .await?;
        assert_eq!(names, vec!["aa.ReverseMap.Access.object".to_owned()]);
        Ok(())
    }

    #[tokio::test]
    async fn it_round_trips_encrypted_records_on_disk() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let backend = FileSystemStorageBackend::create(dir.path()).await?;
        let crypto = init_keys(&backend, "secret").await?;
        let store = HashedStore::with_encryption(backend.clone(), crypto, true);

        let blob = vec![42u8; 1 << 20];
        let (hash, _) = store.write_blob(&blob).await?;

        // Reopen with freshly unwrapped keys, as a restart would.
        let crypto = init_keys(&backend, "secret").await?;
        let store = HashedStore::with_encryption(backend, crypto, true);
        assert_eq!(store.read(Namespace::Blobs, &hash.to_hex()).await?, blob);

        let size = store.size(Namespace::Blobs, &hash.to_hex()).await?;
        assert!(size.abs_diff(blob.len() as u64) <= 16);
        Ok(())
    }

    #[tokio::test]
    async fn it_guards_the_private_namespace_without_keys() -> Result<()> {
        let store = HashedStore::new(MemoryStorageBackend::new());
        let error = store
            .write_unique(Namespace::Private, "note", b"x")
            .await
            .unwrap_err();
        assert_eq!(error.code(), "EncryptionNotInitialized");
        Ok(())
    }
}
