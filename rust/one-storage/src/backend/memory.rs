use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{Namespace, OneStorageError, StorageBackend};

/// An in-memory [`StorageBackend`] with the same observable semantics as the
/// filesystem backend. Used by tests and short-lived tooling.
#[derive(Clone, Default)]
pub struct MemoryStorageBackend {
    records: Arc<RwLock<BTreeMap<(Namespace, String), Vec<u8>>>>,
}

impl MemoryStorageBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorageBackend {
    async fn put(
        &self,
        namespace: Namespace,
        name: &str,
        bytes: &[u8],
    ) -> Result<(), OneStorageError> {
        self.records
            .write()
            .insert((namespace, name.to_owned()), bytes.to_vec());
        Ok(())
    }

    async fn get(
        &self,
        namespace: Namespace,
        name: &str,
    ) -> Result<Option<Vec<u8>>, OneStorageError> {
        Ok(self.records.read().get(&(namespace, name.to_owned())).cloned())
    }

    async fn remove(&self, namespace: Namespace, name: &str) -> Result<bool, OneStorageError> {
        Ok(self
            .records
            .write()
            .remove(&(namespace, name.to_owned()))
            .is_some())
    }

    async fn contains(&self, namespace: Namespace, name: &str) -> Result<bool, OneStorageError> {
        Ok(self
            .records
            .read()
            .contains_key(&(namespace, name.to_owned())))
    }

    async fn size(
        &self,
        namespace: Namespace,
        name: &str,
    ) -> Result<Option<u64>, OneStorageError> {
        Ok(self
            .records
            .read()
            .get(&(namespace, name.to_owned()))
            .map(|bytes| bytes.len() as u64))
    }

    async fn list(
        &self,
        namespace: Namespace,
        prefix: Option<&str>,
    ) -> Result<Vec<String>, OneStorageError> {
        Ok(self
            .records
            .read()
            .keys()
            .filter(|(ns, name)| {
                *ns == namespace && prefix.is_none_or(|prefix| name.starts_with(prefix))
            })
            .map(|(_, name)| name.clone())
            .collect())
    }

    async fn rename(
        &self,
        namespace: Namespace,
        from: &str,
        to: &str,
    ) -> Result<(), OneStorageError> {
        let mut records = self.records.write();
        let Some(bytes) = records.remove(&(namespace, from.to_owned())) else {
            return Err(OneStorageError::FileNotFound {
                namespace,
                name: from.to_owned(),
            });
        };
        records.insert((namespace, to.to_owned()), bytes);
        Ok(())
    }
}
