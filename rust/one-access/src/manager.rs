use std::collections::BTreeSet;
use std::sync::Arc;

use one_common::{Hash, IdHash, PersonId, Timestamp};
use one_microdata::{DataValue, OneObject, Reference};
use one_objects::ObjectStore;
use one_storage::StorageBackend;

use crate::OneAccessError;

/// Something a grant can cover: one concrete record, or every version of a
/// versioned identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessTarget {
    /// A concrete record by content address.
    Object(Hash),
    /// A versioned identity, covering past and future versions.
    Id(IdHash),
}

impl AccessTarget {
    /// The target's address, rendered as hex.
    pub fn to_hex(&self) -> String {
        match self {
            AccessTarget::Object(hash) => hash.to_hex(),
            AccessTarget::Id(id_hash) => id_hash.to_hex(),
        }
    }
}

/// Evaluates and records access grants.
pub struct AccessManager<B: StorageBackend> {
    objects: Arc<ObjectStore<B>>,
}

impl<B: StorageBackend> AccessManager<B> {
    /// Creates the manager over the instance's object store.
    pub fn new(objects: Arc<ObjectStore<B>>) -> Self {
        Self { objects }
    }

    /// Grants read access to one concrete record.
    pub async fn grant(
        &self,
        object: Hash,
        persons: &[PersonId],
        groups: &[IdHash],
    ) -> Result<Hash, OneAccessError> {
        let record = grant_record("Access", persons, groups)
            .with("object", DataValue::Reference(Reference::Object(object)));
        Ok(self.objects.commit_object(&record).await?.hash)
    }

    /// Grants read access to all past and future versions of an identity.
    pub async fn grant_id(
        &self,
        id: IdHash,
        persons: &[PersonId],
        groups: &[IdHash],
    ) -> Result<Hash, OneAccessError> {
        let record = grant_record("IdAccess", persons, groups)
            .with("id", DataValue::Reference(Reference::Id(id)));
        Ok(self.objects.commit_object(&record).await?.hash)
    }

    /// The union of direct person grants and the membership of granted
    /// groups, with group membership dereferenced now, not at grant time.
    pub async fn effective_readers(
        &self,
        target: &AccessTarget,
    ) -> Result<BTreeSet<PersonId>, OneAccessError> {
        let grants = match target {
            AccessTarget::Object(hash) => {
                self.objects.reverse_map(*hash, "Access", "object").await?
            }
            AccessTarget::Id(id_hash) => {
                self.objects
                    .id_reverse_map(*id_hash, "IdAccess", "id")
                    .await?
            }
        };
        let mut readers = BTreeSet::new();
        for grant in grants {
            let record = self.objects.read_object(grant).await?;
            readers.extend(id_references(record.field("person")));
            for group in id_references(record.field("group")) {
                readers.extend(self.group_members(group).await?);
            }
        }
        Ok(readers)
    }

    /// Whether the person may read the target. A concrete record is also
    /// readable when its versioned identity carries an `IdAccess` grant.
    pub async fn may_access(
        &self,
        person: PersonId,
        target: &AccessTarget,
    ) -> Result<bool, OneAccessError> {
        if self.effective_readers(target).await?.contains(&person) {
            return Ok(true);
        }
        if let AccessTarget::Object(hash) = target {
            let text = self.objects.read_object_text(*hash).await?;
            if let Some(id_hash) = one_microdata::id_hash_of(&text, self.objects.registry())
                .map_err(one_objects::OneObjectError::from)?
            {
                return Ok(self
                    .effective_readers(&AccessTarget::Id(id_hash))
                    .await?
                    .contains(&person));
            }
        }
        Ok(false)
    }

    /// Like [`AccessManager::may_access`], failing with `Unauthorized`.
    pub async fn ensure_access(
        &self,
        person: PersonId,
        target: &AccessTarget,
    ) -> Result<(), OneAccessError> {
        if self.may_access(person, target).await? {
            Ok(())
        } else {
            Err(OneAccessError::Unauthorized {
                person,
                target: target.to_hex(),
            })
        }
    }

    /// The identities shared with a person whose newest version was written
    /// at or before the cutoff. These are the roots a sync session offers.
    pub async fn accessible_roots(
        &self,
        person: PersonId,
        until: Timestamp,
    ) -> Result<Vec<IdHash>, OneAccessError> {
        let mut roots = Vec::new();
        for (id_hash, _type_name, newest) in self.objects.identities().await? {
            if newest > until {
                continue;
            }
            if self
                .effective_readers(&AccessTarget::Id(id_hash))
                .await?
                .contains(&person)
            {
                roots.push(id_hash);
            }
        }
        Ok(roots)
    }

    /// The membership of a group, read from its latest version.
    async fn group_members(&self, group: IdHash) -> Result<BTreeSet<PersonId>, OneAccessError> {
        let Some(current) = self.objects.current_version(group).await? else {
            return Ok(BTreeSet::new());
        };
        let record = self.objects.read_object(current.data).await?;
        Ok(id_references(record.field("person"))
            .into_iter()
            .collect())
    }
}

fn grant_record(type_name: &str, persons: &[PersonId], groups: &[IdHash]) -> OneObject {
    let mut record = OneObject::new(type_name);
    if !persons.is_empty() {
        record = record.with(
            "person",
            DataValue::Collection(
                persons
                    .iter()
                    .map(|person| DataValue::Reference(Reference::Id(*person)))
                    .collect(),
            ),
        );
    }
    if !groups.is_empty() {
        record = record.with(
            "group",
            DataValue::Collection(
                groups
                    .iter()
                    .map(|group| DataValue::Reference(Reference::Id(*group)))
                    .collect(),
            ),
        );
    }
    record
}

fn id_references(value: Option<&DataValue>) -> Vec<IdHash> {
    let Some(DataValue::Collection(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            DataValue::Reference(Reference::Id(id_hash)) => Some(*id_hash),
            _ => None,
        })
        .collect()
}
