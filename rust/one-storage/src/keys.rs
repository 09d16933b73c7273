use crate::{
    KEY_LEN, NONCE_LEN, Namespace, OneStorageError, StorageBackend, StoreCrypto,
    derive_master_key, open_with, seal_with,
};

/// Well-known private-namespace name of the plaintext scrypt salt.
pub const SECRET_SALT_NAME: &str = "SN";
/// Well-known private-namespace name of the wrapped storage key.
pub const STORAGE_KEY_NAME: &str = "SK";
/// Well-known private-namespace name of the wrapped filename key.
pub const FILENAME_KEY_NAME: &str = "FK";
/// Well-known private-namespace name of the wrapped filename nonce.
pub const FILENAME_NONCE_NAME: &str = "FN";

const SALT_LEN: usize = 32;

/// Unwraps (or, for a fresh instance, creates) the store's key material.
///
/// The salt is stored in plaintext under `SN`; the storage key, filename key
/// and filename nonce are stored wrapped with the secret-derived master key
/// under `SK`, `FK` and `FN`. `SN` is written last on creation, so a crash
/// mid-bootstrap leaves the instance looking fresh rather than corrupt.
///
/// Fails with `AuthFailed` when the names exist but the supplied secret does
/// not unwrap them.
pub async fn init_keys<B: StorageBackend>(
    backend: &B,
    secret: &str,
) -> Result<StoreCrypto, OneStorageError> {
    match backend.get(Namespace::Private, SECRET_SALT_NAME).await? {
        Some(salt) => unwrap_keys(backend, secret, &salt).await,
        None => create_keys(backend, secret).await,
    }
}

async fn create_keys<B: StorageBackend>(
    backend: &B,
    secret: &str,
) -> Result<StoreCrypto, OneStorageError> {
    use rand::RngCore;
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let master = derive_master_key(secret, &salt);

    let crypto = StoreCrypto::generate();
    let (storage_key, filename_key, filename_nonce) = crypto.material();
    backend
        .put(
            Namespace::Private,
            STORAGE_KEY_NAME,
            &seal_with(&master, &storage_key),
        )
        .await?;
    backend
        .put(
            Namespace::Private,
            FILENAME_KEY_NAME,
            &seal_with(&master, &filename_key),
        )
        .await?;
    backend
        .put(
            Namespace::Private,
            FILENAME_NONCE_NAME,
            &seal_with(&master, &filename_nonce),
        )
        .await?;
    backend
        .put(Namespace::Private, SECRET_SALT_NAME, &salt)
        .await?;
    Ok(crypto)
}

async fn unwrap_keys<B: StorageBackend>(
    backend: &B,
    secret: &str,
    salt: &[u8],
) -> Result<StoreCrypto, OneStorageError> {
    let master = derive_master_key(secret, salt);

    let mut unwrap = async |name: &str| -> Result<Vec<u8>, OneStorageError> {
        let wrapped = backend.get(Namespace::Private, name).await?.ok_or_else(|| {
            OneStorageError::StorageNotInitialized {
                context: format!("private/{name}"),
            }
        })?;
        open_with(&master, &wrapped).ok_or(OneStorageError::AuthFailed)
    };

    let storage_key: [u8; KEY_LEN] = unwrap(STORAGE_KEY_NAME)
        .await?
        .try_into()
        .map_err(|_| OneStorageError::AuthFailed)?;
    let filename_key: [u8; KEY_LEN] = unwrap(FILENAME_KEY_NAME)
        .await?
        .try_into()
        .map_err(|_| OneStorageError::AuthFailed)?;
    let filename_nonce: [u8; NONCE_LEN] = unwrap(FILENAME_NONCE_NAME)
        .await?
        .try_into()
        .map_err(|_| OneStorageError::AuthFailed)?;
    Ok(StoreCrypto::new(storage_key, filename_key, filename_nonce))
}

/// Rewraps the stored key material under a new secret.
///
/// The derived values themselves do not change, so existing records stay
/// readable. The new wraps are staged under temporary names and committed
/// by rename, the salt last.
pub async fn change_storage_password<B: StorageBackend>(
    backend: &B,
    old_secret: &str,
    new_secret: &str,
) -> Result<(), OneStorageError> {
    let salt = backend
        .get(Namespace::Private, SECRET_SALT_NAME)
        .await?
        .ok_or_else(|| OneStorageError::StorageNotInitialized {
            context: format!("private/{SECRET_SALT_NAME}"),
        })?;
    let crypto = unwrap_keys(backend, old_secret, &salt).await?;

    use rand::RngCore;
    let mut new_salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut new_salt);
    let master = derive_master_key(new_secret, &new_salt);
    let (storage_key, filename_key, filename_nonce) = crypto.material();

    let staged = [
        (STORAGE_KEY_NAME, seal_with(&master, &storage_key)),
        (FILENAME_KEY_NAME, seal_with(&master, &filename_key)),
        (FILENAME_NONCE_NAME, seal_with(&master, &filename_nonce)),
        (SECRET_SALT_NAME, new_salt.to_vec()),
    ];
    for (name, bytes) in &staged {
        backend
            .put(Namespace::Private, &format!("{name}.staged"), bytes)
            .await?;
    }
    for (name, _) in &staged {
        backend
            .rename(Namespace::Private, &format!("{name}.staged"), name)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;
    use crate::{MemoryStorageBackend, RecordKind};

    #[tokio::test]
    async fn it_creates_keys_once_and_unwraps_them_again() -> Result<()> {
        let backend = MemoryStorageBackend::new();
        let first = init_keys(&backend, "hunter2").await?;
        let second = init_keys(&backend, "hunter2").await?;
        assert_eq!(first.material().0, second.material().0);

        let sealed = first.seal_record(RecordKind::Text, b"payload");
        let (_, content) = second.open_record(&sealed).unwrap();
        assert_eq!(content, b"payload");
        Ok(())
    }

    #[tokio::test]
    async fn it_rejects_the_wrong_secret() -> Result<()> {
        let backend = MemoryStorageBackend::new();
        init_keys(&backend, "right").await?;
        let error = init_keys(&backend, "wrong").await.unwrap_err();
        assert_eq!(error.code(), "AuthFailed");
        Ok(())
    }

    #[tokio::test]
    async fn it_changes_the_password_without_changing_the_keys() -> Result<()> {
        let backend = MemoryStorageBackend::new();
        let before = init_keys(&backend, "old").await?;
        change_storage_password(&backend, "old", "new").await?;

        let after = init_keys(&backend, "new").await?;
        assert_eq!(before.material().0, after.material().0);
        assert_eq!(
            init_keys(&backend, "old").await.unwrap_err().code(),
            "AuthFailed"
        );
        Ok(())
    }
}
