use one_common::{Hash, IdHash, PersonId, Timestamp};
use one_microdata::{DataValue, OneObject, Reference};
use one_objects::ObjectStore;
use one_recipes::{Recipe, RecipeRule, ReferencedTypes, RuleValue};
use one_storage::StorageBackend;

use crate::OneChannelError;

/// The fixed application id under which the channel registry singleton is
/// versioned.
pub const CHANNEL_REGISTRY_APP_ID: &str = "one.channels";

/// The recipes of the channel subsystem.
pub fn channel_recipes() -> Vec<Recipe> {
    vec![
        Recipe {
            name: "CreationTime".into(),
            rules: vec![
                RecipeRule::new(
                    "timestamp",
                    RuleValue::Integer {
                        min: Some(0),
                        max: None,
                    },
                ),
                RecipeRule::new(
                    "data",
                    RuleValue::ReferenceToObject {
                        allowed: ReferencedTypes::Any,
                    },
                ),
            ],
        },
        Recipe {
            name: "LinkedListEntry".into(),
            rules: vec![
                RecipeRule::new(
                    "data",
                    RuleValue::ReferenceToObject {
                        allowed: ReferencedTypes::of(["CreationTime"]),
                    },
                ),
                RecipeRule::new(
                    "metadata",
                    RuleValue::Array(Box::new(RuleValue::ReferenceToObject {
                        allowed: ReferencedTypes::Any,
                    })),
                )
                .optional(),
                RecipeRule::new(
                    "previous",
                    RuleValue::ReferenceToObject {
                        allowed: ReferencedTypes::of(["LinkedListEntry"]),
                    },
                )
                .optional(),
            ],
        },
        Recipe {
            name: "ChannelInfo".into(),
            rules: vec![
                RecipeRule::new("id", RuleValue::String { regex: None }).id(),
                RecipeRule::new(
                    "owner",
                    RuleValue::ReferenceToId {
                        allowed: ReferencedTypes::of(["Person"]),
                    },
                )
                .id()
                .optional(),
                RecipeRule::new(
                    "head",
                    RuleValue::ReferenceToObject {
                        allowed: ReferencedTypes::of(["LinkedListEntry"]),
                    },
                )
                .optional(),
            ],
        },
        Recipe {
            name: "ChannelRegistry".into(),
            rules: vec![
                RecipeRule::new("appId", RuleValue::String { regex: None }).id(),
                RecipeRule::new(
                    "channels",
                    RuleValue::Set(Box::new(RuleValue::ReferenceToId {
                        allowed: ReferencedTypes::of(["ChannelInfo"]),
                    })),
                )
                .optional(),
            ],
        },
        Recipe {
            name: "Signature".into(),
            rules: vec![
                RecipeRule::new("data", RuleValue::String { regex: None }),
                RecipeRule::new(
                    "signer",
                    RuleValue::ReferenceToId {
                        allowed: ReferencedTypes::of(["Person"]),
                    },
                ),
            ],
        },
    ]
}

/// A channel's identity: its string id plus an optional owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelId {
    /// The channel's string id.
    pub id: String,
    /// The owning participant, if the channel is per-person.
    pub owner: Option<PersonId>,
}

impl ChannelId {
    /// Builds the channel identity.
    pub fn new(id: impl Into<String>, owner: Option<PersonId>) -> Self {
        Self {
            id: id.into(),
            owner,
        }
    }

    /// The `ChannelInfo` record for this identity with the given head.
    pub fn info_object(&self, head: Option<Hash>) -> OneObject {
        let mut info = OneObject::new("ChannelInfo")
            .with("id", DataValue::String(self.id.clone()));
        if let Some(owner) = self.owner {
            info = info.with("owner", DataValue::Reference(Reference::Id(owner)));
        }
        if let Some(head) = head {
            info = info.with("head", DataValue::Reference(Reference::Object(head)));
        }
        info
    }
}

/// A parsed `ChannelInfo` version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    /// The channel's identity.
    pub channel: ChannelId,
    /// The chain head, or `None` for an empty channel.
    pub head: Option<Hash>,
}

impl ChannelInfo {
    /// Rebuilds a `ChannelInfo` from its stored record form.
    pub fn from_object(object: &OneObject, hash: Hash) -> Result<Self, OneChannelError> {
        let malformed = || OneChannelError::MalformedChannelRecord { hash };
        let Some(DataValue::String(id)) = object.field("id") else {
            return Err(malformed());
        };
        let owner = match object.field("owner") {
            Some(DataValue::Reference(Reference::Id(owner))) => Some(*owner),
            None => None,
            Some(_) => return Err(malformed()),
        };
        let head = match object.field("head") {
            Some(DataValue::Reference(Reference::Object(head))) => Some(*head),
            None => None,
            Some(_) => return Err(malformed()),
        };
        Ok(Self {
            channel: ChannelId::new(id.clone(), owner),
            head,
        })
    }
}

/// One materialized chain entry, carrying everything ordering and merging
/// need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEntry {
    /// The `LinkedListEntry` record's content address.
    pub entry_hash: Hash,
    /// The entry's creation time.
    pub creation_time: Timestamp,
    /// The hash of the entry's `CreationTime` record; the tie-breaker of
    /// the chain order.
    pub creation_time_hash: Hash,
    /// The payload the `CreationTime` record wraps.
    pub payload: Hash,
    /// Attached metadata records (signatures, profile versions).
    pub metadata: Vec<Hash>,
    /// The next entry toward the tail.
    pub previous: Option<Hash>,
}

impl ChannelEntry {
    /// The entry's ordering key, descending along the chain.
    pub fn key(&self) -> (Timestamp, Hash) {
        (self.creation_time, self.creation_time_hash)
    }
}

/// Loads and materializes one chain entry.
pub async fn read_entry<B: StorageBackend>(
    objects: &ObjectStore<B>,
    entry_hash: Hash,
) -> Result<ChannelEntry, OneChannelError> {
    let malformed = || OneChannelError::MalformedChannelRecord { hash: entry_hash };
    let entry = objects.read_object(entry_hash).await?;

    let Some(DataValue::Reference(Reference::Object(creation_time_hash))) = entry.field("data")
    else {
        return Err(malformed());
    };
    let metadata = match entry.field("metadata") {
        Some(DataValue::Collection(items)) => items
            .iter()
            .map(|item| match item {
                DataValue::Reference(Reference::Object(hash)) => Ok(*hash),
                _ => Err(malformed()),
            })
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
        Some(_) => return Err(malformed()),
    };
    let previous = match entry.field("previous") {
        Some(DataValue::Reference(Reference::Object(previous))) => Some(*previous),
        None => None,
        Some(_) => return Err(malformed()),
    };

    let creation_time = objects.read_object(*creation_time_hash).await?;
    let (Some(DataValue::Integer(timestamp)), Some(DataValue::Reference(Reference::Object(payload)))) =
        (creation_time.field("timestamp"), creation_time.field("data"))
    else {
        return Err(malformed());
    };

    Ok(ChannelEntry {
        entry_hash,
        creation_time: Timestamp::from_millis(*timestamp as u64),
        creation_time_hash: *creation_time_hash,
        payload: *payload,
        metadata,
        previous,
    })
}

/// Writes a `LinkedListEntry` record and returns its content address.
pub async fn write_entry<B: StorageBackend>(
    objects: &ObjectStore<B>,
    creation_time_hash: Hash,
    metadata: &[Hash],
    previous: Option<Hash>,
) -> Result<Hash, OneChannelError> {
    let mut entry = OneObject::new("LinkedListEntry").with(
        "data",
        DataValue::Reference(Reference::Object(creation_time_hash)),
    );
    if !metadata.is_empty() {
        entry = entry.with(
            "metadata",
            DataValue::Collection(
                metadata
                    .iter()
                    .map(|hash| DataValue::Reference(Reference::Object(*hash)))
                    .collect(),
            ),
        );
    }
    if let Some(previous) = previous {
        entry = entry.with(
            "previous",
            DataValue::Reference(Reference::Object(previous)),
        );
    }
    Ok(objects.commit_object(&entry).await?.hash)
}

/// Writes a `CreationTime` record and returns its content address.
pub async fn write_creation_time<B: StorageBackend>(
    objects: &ObjectStore<B>,
    timestamp: Timestamp,
    payload: Hash,
) -> Result<Hash, OneChannelError> {
    let record = OneObject::new("CreationTime")
        .with(
            "timestamp",
            DataValue::Integer(timestamp.as_millis() as i64),
        )
        .with("data", DataValue::Reference(Reference::Object(payload)));
    Ok(objects.commit_object(&record).await?.hash)
}

/// The identity hash of a channel, derived from its minimal `ChannelInfo`
/// frame.
pub fn channel_id_hash<B: StorageBackend>(
    objects: &ObjectStore<B>,
    channel: &ChannelId,
) -> Result<IdHash, OneChannelError> {
    let text = one_microdata::serialize(&channel.info_object(None), objects.registry())
        .map_err(one_objects::OneObjectError::from)?;
    let id_hash = one_microdata::id_hash_of(&text, objects.registry())
        .map_err(one_objects::OneObjectError::from)?
        .expect("ChannelInfo is a versioned type");
    Ok(id_hash)
}
