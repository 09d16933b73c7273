use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::Signer;
use one_common::{Hash, IdHash, LockMap, PersonId, Timestamp};
use one_events::EventStream;
use one_microdata::{DataValue, OneObject, Reference};
use one_objects::{Committed, ObjectStore};
use one_storage::StorageBackend;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::{
    CHANNEL_REGISTRY_APP_ID, ChainCursor, ChannelEntry, ChannelId, ChannelInfo,
    ChannelMergeResolver, ChannelSettings, MergeOptions, OneChannelError, SettingsTable,
    channel_id_hash, merge_chains, write_creation_time, write_entry,
};

/// The outcome of a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostResult {
    /// The payload's content address.
    pub payload: Hash,
    /// The new `LinkedListEntry`.
    pub entry: Hash,
    /// The new chain head (the rebuilt top).
    pub head: Hash,
    /// The channel's identity hash.
    pub id_hash: IdHash,
    /// The committed `ChannelInfo` version.
    pub info: Committed,
}

/// An entry reported by a channel update, flagged by where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedEntry {
    /// The entry.
    pub entry: ChannelEntry,
    /// `false` for entries that are new to the channel, `true` for entries
    /// that were already part of its history.
    pub existing: bool,
}

/// A channel-update notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelUpdate {
    /// The channel's identity.
    pub channel: ChannelId,
    /// The channel's identity hash.
    pub id_hash: IdHash,
    /// The head after the update.
    pub head: Option<Hash>,
    /// The entries that differ from the previously known head.
    pub changed: Vec<ChangedEntry>,
    /// The earliest creation time among the changed entries.
    pub earliest_changed: Option<Timestamp>,
}

/// Which entries a channel read should return.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntrySelector {
    /// Only entries strictly after this time.
    pub after: Option<Timestamp>,
    /// Only entries at or before this time.
    pub until: Option<Timestamp>,
    /// At most this many entries (from the head down).
    pub limit: Option<usize>,
}

/// A signing capability supplied by the embedder; the core never holds raw
/// key material of its own.
pub trait SigningCapability: Send + Sync {
    /// Signs a message, returning the detached signature bytes.
    fn sign(&self, message: &[u8]) -> Vec<u8>;
}

/// The obvious [`SigningCapability`] over an Ed25519 key.
pub struct Ed25519Signer {
    key: ed25519_dalek::SigningKey,
}

impl Ed25519Signer {
    /// Builds the signer from raw secret key bytes.
    pub fn from_secret(secret: &[u8; 32]) -> Self {
        Self {
            key: ed25519_dalek::SigningKey::from_bytes(secret),
        }
    }
}

impl SigningCapability for Ed25519Signer {
    fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.key.sign(message).to_bytes().to_vec()
    }
}

struct Author {
    person: PersonId,
    signer: Arc<dyn SigningCapability>,
}

/// The channel manager: posting, reading, merging and watching channels.
///
/// Posts on one channel are serialized by a lock keyed by the channel's
/// identity hash; posts on different channels run in parallel.
/// `post_if_not_exists` is additionally serialized against itself under a
/// separate lock so its scan-then-post is atomic.
pub struct ChannelManager<B: StorageBackend> {
    objects: Arc<ObjectStore<B>>,
    post_locks: LockMap,
    pin_locks: LockMap,
    registry_locks: LockMap,
    settings: SettingsTable,
    known_heads: Mutex<HashMap<String, Option<Hash>>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ChannelUpdate>>>,
    author: RwLock<Option<Author>>,
}

impl<B: StorageBackend> ChannelManager<B> {
    /// Creates the manager and registers the channel CRDT for
    /// `ChannelInfo`.
    pub fn new(objects: Arc<ObjectStore<B>>) -> Arc<Self> {
        let settings: SettingsTable = Arc::new(RwLock::new(HashMap::new()));
        objects.register_crdt(
            "ChannelInfo",
            Arc::new(ChannelMergeResolver::new(Arc::clone(&settings))),
        );
        Arc::new(Self {
            objects,
            post_locks: LockMap::new(),
            pin_locks: LockMap::new(),
            registry_locks: LockMap::new(),
            settings,
            known_heads: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            author: RwLock::new(None),
        })
    }

    /// The object store underneath.
    pub fn objects(&self) -> &Arc<ObjectStore<B>> {
        &self.objects
    }

    /// Sets the author whose signature and profile version are attached to
    /// posts on channels with [`ChannelSettings::author_metadata`].
    pub fn set_author(&self, person: PersonId, signer: Arc<dyn SigningCapability>) {
        *self.author.write() = Some(Author { person, signer });
    }

    /// Overrides the settings of one channel.
    pub fn configure_channel(&self, channel: &ChannelId, settings: ChannelSettings) {
        if let Ok(id_hash) = channel_id_hash(&self.objects, channel) {
            self.settings.write().insert(id_hash.to_hex(), settings);
        }
    }

    /// Subscribes to channel updates.
    pub fn subscribe_updates(&self) -> mpsc::UnboundedReceiver<ChannelUpdate> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.lock().push(sender);
        receiver
    }

    /// Creates a channel if it does not exist and records it in the
    /// channel registry. Idempotent.
    pub async fn create_channel(&self, channel: &ChannelId) -> Result<IdHash, OneChannelError> {
        let id_hash = channel_id_hash(&self.objects, channel)?;
        {
            let _guard = self.post_locks.lock(&id_hash.to_hex()).await;
            if self.objects.current_version(id_hash).await?.is_none() {
                self.objects.commit_object(&channel.info_object(None)).await?;
            }
        }
        self.register_channel(id_hash).await?;
        Ok(id_hash)
    }

    /// The channels recorded in the registry.
    pub async fn channels(&self) -> Result<Vec<ChannelId>, OneChannelError> {
        let mut channels = Vec::new();
        for id_hash in self.registered_channels().await? {
            if let Some(info) = self.channel_info(id_hash).await? {
                channels.push(info.channel);
            }
        }
        Ok(channels)
    }

    /// Posts a payload to a channel at the current time.
    pub async fn post(
        &self,
        channel: &ChannelId,
        payload: &OneObject,
    ) -> Result<PostResult, OneChannelError> {
        self.post_at(channel, payload, Timestamp::now()).await
    }

    /// Posts a payload with an explicit creation time, inserting it at its
    /// ordered position in the chain and rebuilding the prefix above it.
    #[tracing::instrument(level = "debug", skip_all, fields(channel = %channel.id))]
    pub async fn post_at(
        &self,
        channel: &ChannelId,
        payload: &OneObject,
        creation_time: Timestamp,
    ) -> Result<PostResult, OneChannelError> {
        let id_hash = channel_id_hash(&self.objects, channel)?;
        let _guard = self.post_locks.lock(&id_hash.to_hex()).await;

        let payload_hash = self.objects.commit_object(payload).await?.hash;
        let creation_time_hash =
            write_creation_time(&self.objects, creation_time, payload_hash).await?;
        let metadata = self.author_metadata(id_hash, creation_time_hash).await?;

        let old_head = match self.channel_info(id_hash).await? {
            Some(info) => info.head,
            None => None,
        };

        // Walk down to the first entry at or below the new key; everything
        // above it must be rebuilt because its ancestry changes.
        let new_key = (creation_time, creation_time_hash);
        let mut prefix: Vec<ChannelEntry> = Vec::new();
        let mut insertion_point = None;
        let mut cursor = ChainCursor::new(&self.objects, old_head);
        while let Some(entry) = cursor.advance().await? {
            if entry.key() <= new_key {
                insertion_point = Some(entry.entry_hash);
                break;
            }
            prefix.push(entry);
        }

        let entry =
            write_entry(&self.objects, creation_time_hash, &metadata, insertion_point).await?;
        let mut head = entry;
        for above in prefix.iter().rev() {
            head = write_entry(
                &self.objects,
                above.creation_time_hash,
                &above.metadata,
                Some(head),
            )
            .await?;
        }

        let info = self
            .objects
            .commit_object(&channel.info_object(Some(head)))
            .await?;
        self.register_channel(id_hash).await?;
        self.emit_update(channel.clone(), id_hash, old_head, Some(head))
            .await?;

        Ok(PostResult {
            payload: payload_hash,
            entry,
            head,
            id_hash,
            info,
        })
    }

    /// Posts a payload unless an entry with the same payload is already in
    /// the chain. Returns `None` when the post was skipped.
    pub async fn post_if_not_exists(
        &self,
        channel: &ChannelId,
        payload: &OneObject,
    ) -> Result<Option<PostResult>, OneChannelError> {
        self.post_if_not_exists_at(channel, payload, Timestamp::now())
            .await
    }

    /// [`ChannelManager::post_if_not_exists`] with an explicit creation
    /// time.
    pub async fn post_if_not_exists_at(
        &self,
        channel: &ChannelId,
        payload: &OneObject,
        creation_time: Timestamp,
    ) -> Result<Option<PostResult>, OneChannelError> {
        let id_hash = channel_id_hash(&self.objects, channel)?;
        let _guard = self.pin_locks.lock(&id_hash.to_hex()).await;

        let text = one_microdata::serialize(payload, self.objects.registry())
            .map_err(one_objects::OneObjectError::from)?;
        let payload_hash = Hash::digest(&text);

        let head = self.channel_info(id_hash).await?.and_then(|info| info.head);
        let mut cursor = ChainCursor::new(&self.objects, head);
        while let Some(entry) = cursor.advance().await? {
            if entry.payload == payload_hash {
                return Ok(None);
            }
        }
        Ok(Some(self.post_at(channel, payload, creation_time).await?))
    }

    /// Reads a channel's entries from the head down.
    pub async fn entries(
        &self,
        channel: &ChannelId,
        selector: EntrySelector,
    ) -> Result<Vec<ChannelEntry>, OneChannelError> {
        let id_hash = channel_id_hash(&self.objects, channel)?;
        let head = self.channel_info(id_hash).await?.and_then(|info| info.head);

        let mut out = Vec::new();
        let mut cursor = ChainCursor::new(&self.objects, head);
        while let Some(entry) = cursor.advance().await? {
            if let Some(until) = selector.until
                && entry.creation_time > until
            {
                continue;
            }
            if let Some(after) = selector.after
                && entry.creation_time <= after
            {
                break;
            }
            out.push(entry);
            if selector.limit.is_some_and(|limit| out.len() >= limit) {
                break;
            }
        }
        Ok(out)
    }

    /// The channel's current `ChannelInfo`, merging concurrent versions if
    /// replicas raced.
    pub async fn channel_info(
        &self,
        id_hash: IdHash,
    ) -> Result<Option<ChannelInfo>, OneChannelError> {
        let Some(current) = self.objects.current_version(id_hash).await? else {
            return Ok(None);
        };
        let object = self.objects.read_object(current.data).await?;
        Ok(Some(ChannelInfo::from_object(&object, current.data)?))
    }

    /// Recomputes a channel's head (merging concurrent versions) and
    /// notifies subscribers of anything that changed. Called for every new
    /// `ChannelInfo` version, including ones imported by sync.
    pub async fn refresh_channel(&self, id_hash: IdHash) -> Result<Option<Hash>, OneChannelError> {
        let Some(info) = self.channel_info(id_hash).await? else {
            return Ok(None);
        };
        let old_head = self.known_heads.lock().get(&id_hash.to_hex()).copied();
        let old_head = match old_head {
            Some(known) => known,
            None => None,
        };
        if old_head != info.head {
            self.emit_update(info.channel.clone(), id_hash, old_head, info.head)
                .await?;
        }
        Ok(info.head)
    }

    /// Spawns a task that feeds every new `ChannelInfo` version through
    /// [`ChannelManager::refresh_channel`].
    pub fn spawn_update_pump(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let mut events =
            self.objects
                .dispatcher()
                .subscribe(EventStream::NewVersion, Some("ChannelInfo"), "channel-manager");
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let one_events::StoreEvent::NewVersion { id_hash, .. } = event else {
                    continue;
                };
                if let Err(error) = manager.refresh_channel(id_hash).await {
                    tracing::warn!(%id_hash, code = error.code(), "channel refresh failed");
                }
            }
        })
    }

    /// The metadata attached to a new entry: an affirmation signature over
    /// the entry's `CreationTime` hash, plus the author's current profile
    /// version. Participates in the entry's hash, never in its ordering.
    async fn author_metadata(
        &self,
        id_hash: IdHash,
        creation_time_hash: Hash,
    ) -> Result<Vec<Hash>, OneChannelError> {
        let wants_metadata = self
            .settings
            .read()
            .get(&id_hash.to_hex())
            .is_some_and(|settings| settings.author_metadata);
        if !wants_metadata {
            return Ok(Vec::new());
        }
        let (person, signature) = {
            let author = self.author.read();
            let Some(author) = author.as_ref() else {
                return Ok(Vec::new());
            };
            (
                author.person,
                author.signer.sign(creation_time_hash.as_bytes()),
            )
        };

        let record = OneObject::new("Signature")
            .with("data", DataValue::String(STANDARD.encode(signature)))
            .with("signer", DataValue::Reference(Reference::Id(person)));
        let signature_hash = self.objects.commit_object(&record).await?.hash;

        let mut metadata = vec![signature_hash];
        if let Some(profile) = self.objects.current_version(person).await? {
            metadata.push(profile.data);
        }
        Ok(metadata)
    }

    async fn registered_channels(&self) -> Result<BTreeSet<IdHash>, OneChannelError> {
        let registry_id = self.registry_id_hash()?;
        let Some(current) = self.objects.current_version(registry_id).await? else {
            return Ok(BTreeSet::new());
        };
        let record = self.objects.read_object(current.data).await?;
        let mut channels = BTreeSet::new();
        if let Some(DataValue::Collection(items)) = record.field("channels") {
            for item in items {
                if let DataValue::Reference(Reference::Id(id_hash)) = item {
                    channels.insert(*id_hash);
                }
            }
        }
        Ok(channels)
    }

    async fn register_channel(&self, id_hash: IdHash) -> Result<(), OneChannelError> {
        let _guard = self.registry_locks.lock("registry").await;
        let mut channels = self.registered_channels().await?;
        if !channels.insert(id_hash) {
            return Ok(());
        }
        let registry = OneObject::new("ChannelRegistry")
            .with(
                "appId",
                DataValue::String(CHANNEL_REGISTRY_APP_ID.to_owned()),
            )
            .with(
                "channels",
                DataValue::Collection(
                    channels
                        .iter()
                        .map(|channel| DataValue::Reference(Reference::Id(*channel)))
                        .collect(),
                ),
            );
        self.objects.commit_object(&registry).await?;
        Ok(())
    }

    fn registry_id_hash(&self) -> Result<IdHash, OneChannelError> {
        let registry = OneObject::new("ChannelRegistry").with(
            "appId",
            DataValue::String(CHANNEL_REGISTRY_APP_ID.to_owned()),
        );
        let text = one_microdata::serialize(&registry, self.objects.registry())
            .map_err(one_objects::OneObjectError::from)?;
        let id_hash = one_microdata::id_hash_of(&text, self.objects.registry())
            .map_err(one_objects::OneObjectError::from)?
            .expect("ChannelRegistry is a versioned type");
        Ok(id_hash)
    }

    /// Diffs the old and new heads and delivers the result to subscribers.
    async fn emit_update(
        &self,
        channel: ChannelId,
        id_hash: IdHash,
        old_head: Option<Hash>,
        new_head: Option<Hash>,
    ) -> Result<(), OneChannelError> {
        self.known_heads
            .lock()
            .insert(id_hash.to_hex(), new_head);

        let outcome = merge_chains(
            &self.objects,
            &[new_head, old_head],
            MergeOptions {
                only_different_elements: true,
                ..MergeOptions::default()
            },
        )
        .await?;
        let changed: Vec<ChangedEntry> = outcome
            .entries
            .into_iter()
            .map(|merged| ChangedEntry {
                existing: !merged.sources.contains(&0),
                entry: merged.entry,
            })
            .collect();
        if changed.is_empty() {
            return Ok(());
        }
        let earliest_changed = changed
            .iter()
            .map(|changed| changed.entry.creation_time)
            .min();

        let update = ChannelUpdate {
            channel,
            id_hash,
            head: new_head,
            changed,
            earliest_changed,
        };
        self.subscribers
            .lock()
            .retain(|sender| sender.send(update.clone()).is_ok());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use one_events::Dispatcher;
    use one_objects::{ReverseMapConfig, version_recipes};
    use one_recipes::{Recipe, RecipeRegistry, RecipeRule, RuleValue};
    use one_storage::{HashedStore, MemoryStorageBackend};

    use super::*;
    use crate::channel_recipes;

    fn manager() -> Arc<ChannelManager<MemoryStorageBackend>> {
        let registry = Arc::new(RecipeRegistry::new());
        registry
            .register(Recipe {
                name: "Person".into(),
                rules: vec![
                    RecipeRule::new("email", RuleValue::String { regex: None }).id(),
                ],
            })
            .unwrap();
        registry.register_all(version_recipes()).unwrap();
        registry.register_all(channel_recipes()).unwrap();
        registry
            .register(Recipe {
                name: "Ping".into(),
                rules: vec![RecipeRule::new(
                    "n",
                    RuleValue::Integer {
                        min: None,
                        max: None,
                    },
                )],
            })
            .unwrap();

        let objects = Arc::new(ObjectStore::new(
            HashedStore::new(MemoryStorageBackend::new()),
            registry,
            Arc::new(Dispatcher::new()),
            ReverseMapConfig::new(),
        ));
        ChannelManager::new(objects)
    }

    fn ping(n: i64) -> OneObject {
        OneObject::new("Ping").with("n", DataValue::Integer(n))
    }

    async fn owner(manager: &ChannelManager<MemoryStorageBackend>) -> Result<PersonId> {
        let person = OneObject::new("Person")
            .with("email", DataValue::String("owner@x".into()));
        Ok(manager.objects().commit_object(&person).await?.id_hash.unwrap())
    }

    /// Copies one replica's state of a channel into another replica, the
    /// way a sync session would: dependencies first, the `ChannelInfo`
    /// version last, as a concurrent version.
    async fn sync_channel(
        from: &ChannelManager<MemoryStorageBackend>,
        to: &ChannelManager<MemoryStorageBackend>,
        id_hash: IdHash,
    ) -> Result<()> {
        let info = from.channel_info(id_hash).await?.unwrap();
        let mut chain = Vec::new();
        let mut cursor = ChainCursor::new(from.objects(), info.head);
        while let Some(entry) = cursor.advance().await? {
            chain.push(entry);
        }
        for entry in chain.iter().rev() {
            for hash in [entry.payload, entry.creation_time_hash, entry.entry_hash] {
                let text = from.objects().read_object_text(hash).await?;
                to.objects().store().write_object_text(&text).await?;
            }
        }
        let current = from.objects().current_version(id_hash).await?.unwrap();
        let info_text = from.objects().read_object_text(current.data).await?;
        to.objects().commit_remote_text(&info_text).await?;
        Ok(())
    }

    #[tokio::test]
    async fn it_posts_into_an_empty_channel() -> Result<()> {
        let manager = manager();
        let owner = owner(&manager).await?;
        let channel = ChannelId::new("c", Some(owner));
        manager.create_channel(&channel).await?;

        let posted = manager
            .post_at(&channel, &ping(1), Timestamp::from_millis(1000))
            .await?;
        let entries = manager.entries(&channel, EntrySelector::default()).await?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry_hash, posted.head);
        assert_eq!(entries[0].creation_time, Timestamp::from_millis(1000));
        assert_eq!(entries[0].previous, None);
        Ok(())
    }

    #[tokio::test]
    async fn it_inserts_out_of_order_posts_at_their_position() -> Result<()> {
        let manager = manager();
        let channel = ChannelId::new("c", None);
        manager.create_channel(&channel).await?;

        manager
            .post_at(&channel, &ping(1), Timestamp::from_millis(1000))
            .await?;
        manager
            .post_at(&channel, &ping(3), Timestamp::from_millis(3000))
            .await?;
        // A late arrival between the two.
        manager
            .post_at(&channel, &ping(2), Timestamp::from_millis(2000))
            .await?;

        let entries = manager.entries(&channel, EntrySelector::default()).await?;
        let times: Vec<u64> = entries
            .iter()
            .map(|entry| entry.creation_time.as_millis())
            .collect();
        assert_eq!(times, vec![3000, 2000, 1000]);

        // Chain order invariant holds from head to tail.
        for pair in entries.windows(2) {
            assert!(pair[0].key() > pair[1].key());
        }
        Ok(())
    }

    #[tokio::test]
    async fn it_merges_concurrent_replicas_to_identical_heads() -> Result<()> {
        let replica_a = manager();
        let replica_b = manager();
        let channel = ChannelId::new("c", None);
        let id_hash = replica_a.create_channel(&channel).await?;
        replica_b.create_channel(&channel).await?;

        replica_a
            .post_at(&channel, &ping(1), Timestamp::from_millis(1))
            .await?;
        replica_b
            .post_at(&channel, &ping(2), Timestamp::from_millis(2))
            .await?;

        sync_channel(&replica_a, &replica_b, id_hash).await?;
        sync_channel(&replica_b, &replica_a, id_hash).await?;

        let head_a = replica_a.channel_info(id_hash).await?.unwrap().head;
        let head_b = replica_b.channel_info(id_hash).await?.unwrap().head;
        assert_eq!(head_a, head_b);

        let entries = replica_a.entries(&channel, EntrySelector::default()).await?;
        let times: Vec<u64> = entries
            .iter()
            .map(|entry| entry.creation_time.as_millis())
            .collect();
        assert_eq!(times, vec![2, 1]);
        Ok(())
    }

    #[tokio::test]
    async fn it_breaks_time_ties_identically_on_both_replicas() -> Result<()> {
        let replica_a = manager();
        let replica_b = manager();
        let channel = ChannelId::new("c", None);
        let id_hash = replica_a.create_channel(&channel).await?;
        replica_b.create_channel(&channel).await?;

        // Distinct payloads at the same instant; order must come from the
        // creation-time hash alone.
        replica_a
            .post_at(&channel, &ping(10), Timestamp::from_millis(5))
            .await?;
        replica_b
            .post_at(&channel, &ping(20), Timestamp::from_millis(5))
            .await?;

        sync_channel(&replica_a, &replica_b, id_hash).await?;
        sync_channel(&replica_b, &replica_a, id_hash).await?;

        let entries_a = replica_a.entries(&channel, EntrySelector::default()).await?;
        let entries_b = replica_b.entries(&channel, EntrySelector::default()).await?;
        assert_eq!(entries_a, entries_b);
        assert_eq!(entries_a.len(), 2);
        assert!(entries_a[0].creation_time_hash > entries_a[1].creation_time_hash);
        assert_eq!(
            replica_a.channel_info(id_hash).await?.unwrap().head,
            replica_b.channel_info(id_hash).await?.unwrap().head,
        );
        Ok(())
    }

    #[tokio::test]
    async fn it_skips_duplicate_payloads_in_post_if_not_exists() -> Result<()> {
        let manager = manager();
        let channel = ChannelId::new("c", None);
        manager.create_channel(&channel).await?;

        let first = manager
            .post_if_not_exists_at(&channel, &ping(7), Timestamp::from_millis(7000))
            .await?;
        assert!(first.is_some());
        let second = manager
            .post_if_not_exists_at(&channel, &ping(7), Timestamp::from_millis(8000))
            .await?;
        assert!(second.is_none());

        let entries = manager.entries(&channel, EntrySelector::default()).await?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].creation_time, Timestamp::from_millis(7000));
        Ok(())
    }

    #[tokio::test]
    async fn it_notifies_subscribers_with_the_diff() -> Result<()> {
        let manager = manager();
        let channel = ChannelId::new("c", None);
        manager.create_channel(&channel).await?;
        let mut updates = manager.subscribe_updates();

        manager
            .post_at(&channel, &ping(1), Timestamp::from_millis(1000))
            .await?;
        let update = updates.recv().await.unwrap();
        assert_eq!(update.changed.len(), 1);
        assert!(!update.changed[0].existing);
        assert_eq!(update.earliest_changed, Some(Timestamp::from_millis(1000)));

        // The second post only reports the new entry, not the rebuilt top.
        manager
            .post_at(&channel, &ping(2), Timestamp::from_millis(2000))
            .await?;
        let update = updates.recv().await.unwrap();
        assert_eq!(update.changed.len(), 1);
        assert_eq!(
            update.changed[0].entry.creation_time,
            Timestamp::from_millis(2000)
        );
        Ok(())
    }

    #[tokio::test]
    async fn it_truncates_merged_chains_to_max_size() -> Result<()> {
        let replica_a = manager();
        let replica_b = manager();
        let channel = ChannelId::new("c", None);
        let id_hash = replica_a.create_channel(&channel).await?;
        replica_b.create_channel(&channel).await?;
        replica_a.configure_channel(
            &channel,
            ChannelSettings {
                max_size: Some(2),
                author_metadata: false,
            },
        );

        for n in 1..=3 {
            replica_a
                .post_at(&channel, &ping(n), Timestamp::from_millis(n as u64 * 1000))
                .await?;
        }
        replica_b
            .post_at(&channel, &ping(9), Timestamp::from_millis(4000))
            .await?;
        sync_channel(&replica_b, &replica_a, id_hash).await?;

        let entries = replica_a.entries(&channel, EntrySelector::default()).await?;
        let times: Vec<u64> = entries
            .iter()
            .map(|entry| entry.creation_time.as_millis())
            .collect();
        assert_eq!(times, vec![4000, 3000]);
        Ok(())
    }

    #[tokio::test]
    async fn it_records_channels_in_the_registry() -> Result<()> {
        let manager = manager();
        manager.create_channel(&ChannelId::new("alpha", None)).await?;
        manager.create_channel(&ChannelId::new("beta", None)).await?;
        // Idempotent re-creation.
        manager.create_channel(&ChannelId::new("alpha", None)).await?;

        let mut ids: Vec<String> = manager
            .channels()
            .await?
            .into_iter()
            .map(|channel| channel.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["alpha".to_owned(), "beta".to_owned()]);
        Ok(())
    }

    #[tokio::test]
    async fn it_attaches_author_metadata_when_configured() -> Result<()> {
        let manager = manager();
        let owner = owner(&manager).await?;
        let channel = ChannelId::new("signed", None);
        manager.create_channel(&channel).await?;
        manager.configure_channel(
            &channel,
            ChannelSettings {
                max_size: None,
                author_metadata: true,
            },
        );
        manager.set_author(owner, Arc::new(Ed25519Signer::from_secret(&[7u8; 32])));

        manager
            .post_at(&channel, &ping(1), Timestamp::from_millis(1000))
            .await?;
        let entries = manager.entries(&channel, EntrySelector::default()).await?;
        // An affirmation signature plus the author's profile version.
        assert_eq!(entries[0].metadata.len(), 2);
        let signature = manager.objects().read_object(entries[0].metadata[0]).await?;
        assert_eq!(signature.type_name, "Signature");
        Ok(())
    }
}
