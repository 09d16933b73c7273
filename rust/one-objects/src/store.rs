use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use one_common::{Hash, IdHash, LockMap, Timestamp};
use one_events::{Dispatcher, StoreEvent};
use one_microdata::{OneObject, Reference};
use one_recipes::RecipeRegistry;
use one_storage::{HashedStore, Namespace, StorageBackend, WriteStatus};
use parking_lot::{Mutex, RwLock};
use sieve_cache::SieveCache;

use crate::{
    OneObjectError, ReverseMapConfig, VersionNode, id_reverse_map_name, reverse_map_name,
};

const CURRENT_CACHE_SIZE: usize = 1024;

/// The outcome of committing a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    /// The record's content address.
    pub hash: Hash,
    /// Whether this commit created the record.
    pub status: WriteStatus,
    /// The record's type.
    pub type_name: String,
    /// The record's identity, for versioned types.
    pub id_hash: Option<IdHash>,
    /// The commit's write timestamp.
    pub timestamp: Timestamp,
}

/// One line of a version map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionMapEntry {
    /// The version node written at this point.
    pub node: Hash,
    /// When it was written.
    pub timestamp: Timestamp,
}

/// The resolved current version of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentVersion {
    /// The top of the version DAG.
    pub node: Hash,
    /// The payload version the top wraps.
    pub data: Hash,
}

/// Chooses the merged payload when an identity has concurrent heads.
///
/// Implementations may write new records through `objects.store()` (raw
/// content-addressed writes) but must not commit versions of the identity
/// being merged — the caller wraps the returned payload in the `Merge` node
/// itself.
#[async_trait]
pub trait CrdtResolver<B: StorageBackend>: Send + Sync {
    /// Produces the merged payload for the given concurrent head payloads,
    /// ordered as they appear in the version map.
    async fn merge(
        &self,
        objects: &ObjectStore<B>,
        id_hash: IdHash,
        heads: &[Hash],
    ) -> Result<Hash, OneObjectError>;
}

/// Typed, versioned object storage over the hashed store.
pub struct ObjectStore<B: StorageBackend> {
    store: HashedStore<B>,
    registry: Arc<RecipeRegistry>,
    dispatcher: Arc<Dispatcher>,
    reverse_maps: ReverseMapConfig,
    crdts: RwLock<HashMap<String, Arc<dyn CrdtResolver<B>>>>,
    version_locks: LockMap,
    current_cache: Mutex<SieveCache<String, CurrentVersion>>,
}

impl<B: StorageBackend> ObjectStore<B> {
    /// Wires the object layer over a store, recipe registry and dispatcher.
    pub fn new(
        store: HashedStore<B>,
        registry: Arc<RecipeRegistry>,
        dispatcher: Arc<Dispatcher>,
        reverse_maps: ReverseMapConfig,
    ) -> Self {
        Self {
            store,
            registry,
            dispatcher,
            reverse_maps,
            crdts: RwLock::new(HashMap::new()),
            version_locks: LockMap::new(),
            current_cache: Mutex::new(
                SieveCache::new(CURRENT_CACHE_SIZE).expect("cache capacity is non-zero"),
            ),
        }
    }

    /// The underlying hashed store.
    pub fn store(&self) -> &HashedStore<B> {
        &self.store
    }

    /// The recipe registry in effect.
    pub fn registry(&self) -> &Arc<RecipeRegistry> {
        &self.registry
    }

    /// The event dispatcher commits publish on.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Registers the merge algorithm for a versioned type.
    pub fn register_crdt(&self, type_name: impl Into<String>, resolver: Arc<dyn CrdtResolver<B>>) {
        self.crdts.write().insert(type_name.into(), resolver);
    }

    /// Validates and commits an in-memory record.
    pub async fn commit_object(&self, object: &OneObject) -> Result<Committed, OneObjectError> {
        let text = one_microdata::serialize(object, &self.registry)?;
        self.commit_parsed(object, &text, VersionLineage::Local)
            .await
    }

    /// Validates and commits canonical text produced locally.
    pub async fn commit_text(&self, text: &str) -> Result<Committed, OneObjectError> {
        let object = one_microdata::parse(text, &self.registry)?;
        self.commit_parsed(&object, text, VersionLineage::Local)
            .await
    }

    /// Commits canonical text received from a peer.
    ///
    /// A remote version has no known local predecessor, so a versioned
    /// record enters the graph as a concurrent root; the next
    /// [`ObjectStore::current_version`] merges it with whatever this
    /// replica already has.
    pub async fn commit_remote_text(&self, text: &str) -> Result<Committed, OneObjectError> {
        let object = one_microdata::parse(text, &self.registry)?;
        self.commit_parsed(&object, text, VersionLineage::Remote)
            .await
    }

    async fn commit_parsed(
        &self,
        object: &OneObject,
        text: &str,
        lineage: VersionLineage,
    ) -> Result<Committed, OneObjectError> {
        self.check_references(object).await?;
        match one_microdata::extract_id_object(text, &self.registry)? {
            None => self.commit_unversioned(object, text).await,
            Some(id_text) => {
                self.commit_versioned(object, text, &id_text, lineage)
                    .await
            }
        }
    }

    async fn commit_unversioned(
        &self,
        object: &OneObject,
        text: &str,
    ) -> Result<Committed, OneObjectError> {
        let (hash, status) = self.store.write_object_text(text).await?;
        if status == WriteStatus::New {
            self.index_references(object, hash).await?;
            self.dispatcher.publish(StoreEvent::NewUnversionedObject {
                hash,
                type_name: object.type_name.clone(),
                payload: text.to_owned(),
            });
        }
        Ok(Committed {
            hash,
            status,
            type_name: object.type_name.clone(),
            id_hash: None,
            timestamp: Timestamp::now(),
        })
    }

    #[tracing::instrument(level = "debug", skip_all, fields(type_name = %object.type_name))]
    async fn commit_versioned(
        &self,
        object: &OneObject,
        text: &str,
        id_text: &str,
        lineage: VersionLineage,
    ) -> Result<Committed, OneObjectError> {
        let id_hash = IdHash::digest(id_text);
        let _guard = self.version_locks.lock(&id_hash.to_hex()).await;

        let (hash, status) = self.store.write_object_text(text).await?;
        let timestamp = Timestamp::now();
        if status == WriteStatus::New {
            let entries = self.version_map(id_hash).await?;
            let first_version = entries.is_empty();

            let node = match (lineage, entries.last()) {
                (VersionLineage::Local, Some(last)) => {
                    let prev = self.read_version_node(last.node).await?;
                    VersionNode::Change {
                        data: hash,
                        prev: last.node,
                        depth: prev.depth() + 1,
                        creation_time: timestamp,
                    }
                }
                _ => VersionNode::Edge {
                    data: hash,
                    creation_time: timestamp,
                },
            };
            let node_hash = self.write_version_node(&node).await?;
            self.append_version_map(id_hash, &object.type_name, node_hash, timestamp)
                .await?;
            self.index_references(object, hash).await?;
            self.invalidate_current(id_hash);

            if first_version {
                self.dispatcher.publish(StoreEvent::NewIdObject {
                    id_hash,
                    type_name: object.type_name.clone(),
                });
            }
            self.dispatcher.publish(StoreEvent::NewVersion {
                id_hash,
                hash,
                type_name: object.type_name.clone(),
                payload: text.to_owned(),
            });
        }
        Ok(Committed {
            hash,
            status,
            type_name: object.type_name.clone(),
            id_hash: Some(id_hash),
            timestamp,
        })
    }

    /// Reads and verifies an object by content address.
    pub async fn read_object(&self, hash: Hash) -> Result<OneObject, OneObjectError> {
        let text = self.store.read_object_text(hash).await?;
        Ok(one_microdata::parse_verified(&text, hash, &self.registry)?)
    }

    /// Reads an object's canonical text by content address.
    pub async fn read_object_text(&self, hash: Hash) -> Result<String, OneObjectError> {
        Ok(self.store.read_object_text(hash).await?)
    }

    /// The outbound references of a stored object.
    pub async fn children(&self, hash: Hash) -> Result<Vec<(String, Reference)>, OneObjectError> {
        Ok(self.read_object(hash).await?.references())
    }

    /// The version map of an identity, in write order. Empty when the
    /// identity is unknown.
    pub async fn version_map(
        &self,
        id_hash: IdHash,
    ) -> Result<Vec<VersionMapEntry>, OneObjectError> {
        let Some(name) = self.version_map_name(id_hash).await? else {
            return Ok(Vec::new());
        };
        let text = self.store.read_text(Namespace::VersionMaps, &name).await?;
        let mut entries = Vec::new();
        for line in text.lines() {
            let Some((hash, timestamp)) = line.split_once(' ') else {
                continue;
            };
            let (Ok(node), Ok(millis)) = (Hash::from_hex(hash), timestamp.parse::<u64>()) else {
                continue;
            };
            entries.push(VersionMapEntry {
                node,
                timestamp: Timestamp::from_millis(millis),
            });
        }
        Ok(entries)
    }

    /// The versioned identities this instance knows, with their type and
    /// the timestamp of their newest version.
    pub async fn identities(
        &self,
    ) -> Result<Vec<(IdHash, String, Timestamp)>, OneObjectError> {
        let names: Vec<String> = self
            .store
            .list(Namespace::VersionMaps, None)
            .try_collect()
            .await?;
        let mut identities = Vec::new();
        for name in names {
            let mut parts = name.splitn(3, '.');
            let (Some(hex), Some("Object"), Some(type_name)) =
                (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            let Ok(id_hash) = IdHash::from_hex(hex) else {
                continue;
            };
            let entries = self.version_map(id_hash).await?;
            if let Some(last) = entries.last() {
                identities.push((id_hash, type_name.to_owned(), last.timestamp));
            }
        }
        Ok(identities)
    }

    /// The current version of an identity: the single head of its version
    /// DAG, or a fresh `Merge` over concurrent heads with the payload chosen
    /// by the type's registered [`CrdtResolver`] (newest head by map order
    /// when none is registered).
    pub async fn current_version(
        &self,
        id_hash: IdHash,
    ) -> Result<Option<CurrentVersion>, OneObjectError> {
        let _guard = self.version_locks.lock(&id_hash.to_hex()).await;
        if let Some(hit) = self.current_cache.lock().get(&id_hash.to_hex()) {
            return Ok(Some(*hit));
        }

        let entries = self.version_map(id_hash).await?;
        if entries.is_empty() {
            return Ok(None);
        }

        let mut nodes: HashMap<Hash, VersionNode> = HashMap::new();
        for entry in &entries {
            if !nodes.contains_key(&entry.node) {
                let node = self.read_version_node(entry.node).await?;
                nodes.insert(entry.node, node);
            }
        }
        let referenced: HashSet<Hash> = nodes
            .values()
            .flat_map(|node| node.predecessors())
            .collect();
        let mut heads: Vec<Hash> = Vec::new();
        for entry in &entries {
            if !referenced.contains(&entry.node) && !heads.contains(&entry.node) {
                heads.push(entry.node);
            }
        }

        let current = if let [single] = heads.as_slice() {
            CurrentVersion {
                node: *single,
                data: nodes[single].data(),
            }
        } else {
            self.merge_heads(id_hash, &heads, &nodes).await?
        };
        self.current_cache
            .lock()
            .insert(id_hash.to_hex(), current);
        Ok(Some(current))
    }

    async fn merge_heads(
        &self,
        id_hash: IdHash,
        heads: &[Hash],
        nodes: &HashMap<Hash, VersionNode>,
    ) -> Result<CurrentVersion, OneObjectError> {
        let head_datas: Vec<Hash> = heads.iter().map(|head| nodes[head].data()).collect();
        let type_name = self.read_object(head_datas[0]).await?.type_name;
        tracing::debug!(%id_hash, heads = heads.len(), %type_name, "merging concurrent heads");

        let resolver = self.crdts.read().get(&type_name).cloned();
        let merged_data = match resolver {
            Some(resolver) => resolver.merge(self, id_hash, &head_datas).await?,
            None => *head_datas.last().expect("at least two heads"),
        };

        let depth = heads.iter().map(|head| nodes[head].depth()).max().unwrap_or(0) + 1;
        let timestamp = Timestamp::now();
        let node = VersionNode::Merge {
            data: merged_data,
            nodes: heads.iter().copied().collect(),
            depth,
            creation_time: timestamp,
        };
        let node_hash = self.write_version_node(&node).await?;
        self.append_version_map(id_hash, &type_name, node_hash, timestamp)
            .await?;

        // A resolver may have produced a record this replica never held.
        let payload = self.read_object_text(merged_data).await?;
        if !head_datas.contains(&merged_data) {
            let merged_object = one_microdata::parse(&payload, &self.registry)?;
            self.index_references(&merged_object, merged_data).await?;
        }
        self.dispatcher.publish(StoreEvent::NewVersion {
            id_hash,
            hash: merged_data,
            type_name,
            payload,
        });
        Ok(CurrentVersion {
            node: node_hash,
            data: merged_data,
        })
    }

    /// The canonical ID-object frame of an identity, derived from its
    /// current version. `None` when the identity is unknown.
    pub async fn id_object_text(
        &self,
        id_hash: IdHash,
    ) -> Result<Option<String>, OneObjectError> {
        let Some(current) = self.current_version(id_hash).await? else {
            return Ok(None);
        };
        let text = self.read_object_text(current.data).await?;
        Ok(one_microdata::extract_id_object(&text, &self.registry)?)
    }

    /// The referrers recorded for a concrete target under `(type, field)`.
    pub async fn reverse_map(
        &self,
        target: Hash,
        referrer_type: &str,
        field: &str,
    ) -> Result<Vec<Hash>, OneObjectError> {
        self.read_reverse_lines(&reverse_map_name(target, referrer_type, field))
            .await
    }

    /// The referrers recorded for an identity target under `(type, field)`.
    pub async fn id_reverse_map(
        &self,
        target: IdHash,
        referrer_type: &str,
        field: &str,
    ) -> Result<Vec<Hash>, OneObjectError> {
        self.read_reverse_lines(&id_reverse_map_name(target, referrer_type, field))
            .await
    }

    async fn read_reverse_lines(&self, name: &str) -> Result<Vec<Hash>, OneObjectError> {
        if !self.store.exists(Namespace::ReverseMaps, name).await? {
            return Ok(Vec::new());
        }
        let text = self.store.read_text(Namespace::ReverseMaps, name).await?;
        Ok(text
            .lines()
            .filter_map(|line| Hash::from_hex(line.trim()).ok())
            .collect())
    }

    async fn version_map_name(&self, id_hash: IdHash) -> Result<Option<String>, OneObjectError> {
        let prefix = format!("{}.Object.", id_hash.to_hex());
        let names: Vec<String> = self
            .store
            .list(Namespace::VersionMaps, Some(&prefix))
            .try_collect()
            .await?;
        Ok(names.into_iter().next())
    }

    async fn append_version_map(
        &self,
        id_hash: IdHash,
        type_name: &str,
        node: Hash,
        timestamp: Timestamp,
    ) -> Result<(), OneObjectError> {
        let name = format!("{}.Object.{type_name}", id_hash.to_hex());
        let line = format!("{} {}\n", node.to_hex(), timestamp.as_millis());
        self.store
            .append(Namespace::VersionMaps, &name, line.as_bytes())
            .await?;
        Ok(())
    }

    /// Reads a stored version node.
    pub async fn read_version_node(&self, hash: Hash) -> Result<VersionNode, OneObjectError> {
        VersionNode::from_object(&self.read_object(hash).await?, hash)
    }

    async fn write_version_node(&self, node: &VersionNode) -> Result<Hash, OneObjectError> {
        let text = one_microdata::serialize(&node.to_object(), &self.registry)?;
        let (hash, _) = self.store.write_object_text(&text).await?;
        Ok(hash)
    }

    fn invalidate_current(&self, id_hash: IdHash) {
        self.current_cache.lock().remove(&id_hash.to_hex());
    }

    async fn check_references(&self, object: &OneObject) -> Result<(), OneObjectError> {
        for (field, reference) in object.references() {
            let (namespace, target) = match reference {
                Reference::Object(hash) => (Namespace::Objects, hash),
                Reference::Blob(hash) => (Namespace::Blobs, hash),
                Reference::Clob(hash) => (Namespace::Clobs, hash),
                // Identity references may name identities this replica has
                // not learned yet.
                Reference::Id(_) => continue,
            };
            if !self.store.exists(namespace, &target.to_hex()).await? {
                return Err(OneObjectError::BrokenReference {
                    referrer_type: object.type_name.clone(),
                    field,
                    target: target.to_hex(),
                });
            }
        }
        Ok(())
    }

    async fn index_references(
        &self,
        object: &OneObject,
        referrer: Hash,
    ) -> Result<(), OneObjectError> {
        for (field, reference) in object.references() {
            if !self
                .reverse_maps
                .is_enabled(&object.type_name, &field, &reference)
            {
                continue;
            }
            let name = match reference {
                Reference::Object(target) | Reference::Blob(target) | Reference::Clob(target) => {
                    reverse_map_name(target, &object.type_name, &field)
                }
                Reference::Id(target) => {
                    id_reverse_map_name(target, &object.type_name, &field)
                }
            };
            let line = format!("{}\n", referrer.to_hex());
            self.store
                .append(Namespace::ReverseMaps, &name, line.as_bytes())
                .await?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum VersionLineage {
    Local,
    Remote,
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use one_events::EventStream;
    use one_microdata::DataValue;
    use one_recipes::{Recipe, RecipeRule, ReferencedTypes, RuleValue};
    use one_storage::MemoryStorageBackend;

    use super::*;
    use crate::version_recipes;

    fn fixture() -> ObjectStore<MemoryStorageBackend> {
        let registry = Arc::new(RecipeRegistry::new());
        registry.register_all(version_recipes()).unwrap();
        registry
            .register_all(vec![
                Recipe {
                    name: "Person".into(),
                    rules: vec![
                        RecipeRule::new("email", RuleValue::String { regex: None }).id(),
                        RecipeRule::new("name", RuleValue::String { regex: None }).optional(),
                    ],
                },
                Recipe {
                    name: "Note".into(),
                    rules: vec![RecipeRule::new("text", RuleValue::String { regex: None })],
                },
                Recipe {
                    name: "Pin".into(),
                    rules: vec![RecipeRule::new(
                        "target",
                        RuleValue::ReferenceToObject {
                            allowed: ReferencedTypes::of(["Note"]),
                        },
                    )],
                },
            ])
            .unwrap();
        let config = ReverseMapConfig::new().enable("Pin", "target");
        ObjectStore::new(
            HashedStore::new(MemoryStorageBackend::new()),
            registry,
            Arc::new(Dispatcher::new()),
            config,
        )
    }

    fn person(name: &str) -> OneObject {
        OneObject::new("Person")
            .with("email", DataValue::String("a@b".into()))
            .with("name", DataValue::String(name.into()))
    }

    #[tokio::test]
    async fn it_commits_unversioned_objects_once() -> Result<()> {
        let objects = fixture();
        let note = OneObject::new("Note").with("text", DataValue::String("hi".into()));
        let first = objects.commit_object(&note).await?;
        assert_eq!(first.status, WriteStatus::New);
        assert_eq!(first.id_hash, None);

        let second = objects.commit_object(&note).await?;
        assert_eq!(second.status, WriteStatus::AlreadyExisted);
        assert_eq!(first.hash, second.hash);

        assert_eq!(objects.read_object(first.hash).await?, note);
        Ok(())
    }

    #[tokio::test]
    async fn it_builds_a_linear_version_line() -> Result<()> {
        let objects = fixture();
        let first = objects.commit_object(&person("Ada")).await?;
        let id_hash = first.id_hash.unwrap();
        let second = objects.commit_object(&person("Countess Ada")).await?;
        assert_eq!(second.id_hash, Some(id_hash));

        let map = objects.version_map(id_hash).await?;
        assert_eq!(map.len(), 2);
        let root = objects.read_version_node(map[0].node).await?;
        let tip = objects.read_version_node(map[1].node).await?;
        assert_eq!(root.depth(), 0);
        assert_eq!(tip.depth(), 1);
        assert_eq!(tip.predecessors(), vec![map[0].node]);

        let current = objects.current_version(id_hash).await?.unwrap();
        assert_eq!(current.data, second.hash);
        Ok(())
    }

    #[tokio::test]
    async fn it_merges_concurrent_remote_versions_by_map_order() -> Result<()> {
        let objects = fixture();
        let local = objects.commit_object(&person("Ada")).await?;
        let id_hash = local.id_hash.unwrap();

        // A replica wrote a different version of the same identity.
        let remote_registry = objects.registry().clone();
        let remote_text = one_microdata::serialize(&person("Lady Ada"), &remote_registry)?;
        let remote = objects.commit_remote_text(&remote_text).await?;
        assert_eq!(remote.id_hash, Some(id_hash));

        let current = objects.current_version(id_hash).await?.unwrap();
        // No resolver for Person, so the newest map entry wins.
        assert_eq!(current.data, remote.hash);
        let top = objects.read_version_node(current.node).await?;
        assert!(matches!(top, VersionNode::Merge { .. }));
        assert_eq!(top.predecessors().len(), 2);

        // Once merged there is a single head; recomputing is stable.
        let again = objects.current_version(id_hash).await?.unwrap();
        assert_eq!(again, current);
        Ok(())
    }

    #[tokio::test]
    async fn it_indexes_enabled_reverse_maps() -> Result<()> {
        let objects = fixture();
        let note = OneObject::new("Note").with("text", DataValue::String("hi".into()));
        let note_hash = objects.commit_object(&note).await?.hash;

        let pin = OneObject::new("Pin")
            .with("target", DataValue::Reference(Reference::Object(note_hash)));
        let pin_hash = objects.commit_object(&pin).await?.hash;

        let referrers = objects.reverse_map(note_hash, "Pin", "target").await?;
        assert_eq!(referrers, vec![pin_hash]);
        // Note has no enabled reverse maps of its own.
        assert!(objects.reverse_map(pin_hash, "Note", "text").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn it_rejects_broken_references() -> Result<()> {
        let objects = fixture();
        let pin = OneObject::new("Pin").with(
            "target",
            DataValue::Reference(Reference::Object(Hash::digest(b"missing"))),
        );
        let error = objects.commit_object(&pin).await.unwrap_err();
        assert_eq!(error.code(), "BrokenReference");
        Ok(())
    }

    #[tokio::test]
    async fn it_publishes_one_event_per_commit() -> Result<()> {
        let objects = fixture();
        let mut versions = objects
            .dispatcher()
            .subscribe(EventStream::NewVersion, Some("Person"), "test");
        let mut identities = objects
            .dispatcher()
            .subscribe(EventStream::NewIdObject, None, "test");

        objects.commit_object(&person("Ada")).await?;
        // A repeated commit is a no-op and must not publish.
        objects.commit_object(&person("Ada")).await?;
        objects.commit_object(&person("Beta")).await?;

        assert!(identities.try_recv().is_some());
        assert!(identities.try_recv().is_none());
        assert!(versions.try_recv().is_some());
        assert!(versions.try_recv().is_some());
        assert!(versions.try_recv().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn it_lists_known_identities_with_their_newest_timestamp() -> Result<()> {
        let objects = fixture();
        let committed = objects.commit_object(&person("Ada")).await?;
        let identities = objects.identities().await?;
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].0, committed.id_hash.unwrap());
        assert_eq!(identities[0].1, "Person");
        Ok(())
    }
}
