use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rand::Rng;

use crate::{Namespace, OneStorageError, StorageBackend};

/// The filesystem [`StorageBackend`]: one directory per namespace inside an
/// instance root, one file per record.
///
/// Writes go through a temp file in the same directory followed by an atomic
/// rename, so readers never observe a half-written record.
#[derive(Clone)]
pub struct FileSystemStorageBackend {
    root: PathBuf,
}

impl FileSystemStorageBackend {
    /// Creates the namespace directories under `root` (if missing) and
    /// returns the backend.
    pub async fn create(root: impl AsRef<Path>) -> Result<Self, OneStorageError> {
        let root = root.as_ref().to_owned();
        for namespace in Namespace::ALL {
            tokio::fs::create_dir_all(root.join(namespace.dir_name())).await?;
        }
        Ok(Self { root })
    }

    /// Opens an existing instance root, failing if it was never initialized.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, OneStorageError> {
        let root = root.as_ref().to_owned();
        for namespace in Namespace::ALL {
            let dir = root.join(namespace.dir_name());
            if !tokio::fs::try_exists(&dir).await? {
                return Err(OneStorageError::StorageNotInitialized {
                    context: dir.display().to_string(),
                });
            }
        }
        Ok(Self { root })
    }

    /// The instance root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, namespace: Namespace, name: &str) -> PathBuf {
        self.root.join(namespace.dir_name()).join(name)
    }
}

#[async_trait]
impl StorageBackend for FileSystemStorageBackend {
    async fn put(
        &self,
        namespace: Namespace,
        name: &str,
        bytes: &[u8],
    ) -> Result<(), OneStorageError> {
        let path = self.path(namespace, name);
        let suffix: u64 = rand::thread_rng().r#gen();
        let temp = self.path(namespace, &format!("{name}.{suffix:016x}.tmp"));
        tokio::fs::write(&temp, bytes).await?;
        tokio::fs::rename(&temp, &path).await?;
        Ok(())
    }

    async fn get(
        &self,
        namespace: Namespace,
        name: &str,
    ) -> Result<Option<Vec<u8>>, OneStorageError> {
        match tokio::fs::read(self.path(namespace, name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn remove(&self, namespace: Namespace, name: &str) -> Result<bool, OneStorageError> {
        match tokio::fs::remove_file(self.path(namespace, name)).await {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error.into()),
        }
    }

    async fn contains(&self, namespace: Namespace, name: &str) -> Result<bool, OneStorageError> {
        Ok(tokio::fs::try_exists(self.path(namespace, name)).await?)
    }

    async fn size(
        &self,
        namespace: Namespace,
        name: &str,
    ) -> Result<Option<u64>, OneStorageError> {
        match tokio::fs::metadata(self.path(namespace, name)).await {
            Ok(metadata) => Ok(Some(metadata.len())),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn list(
        &self,
        namespace: Namespace,
        prefix: Option<&str>,
    ) -> Result<Vec<String>, OneStorageError> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(self.root.join(namespace.dir_name())).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".tmp") {
                continue;
            }
            if prefix.is_none_or(|prefix| name.starts_with(prefix)) {
                names.push(name);
            }
        }
        names.sort_unstable();
        Ok(names)
    }

    async fn rename(
        &self,
        namespace: Namespace,
        from: &str,
        to: &str,
    ) -> Result<(), OneStorageError> {
        match tokio::fs::rename(self.path(namespace, from), self.path(namespace, to)).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(OneStorageError::FileNotFound {
                    namespace,
                    name: from.to_owned(),
                })
            }
            Err(error) => Err(error.into()),
        }
    }
}
