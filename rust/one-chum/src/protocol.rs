use one_common::{Hash, IdHash, PersonId, Timestamp};
use one_microdata::{DataValue, OneObject, Reference};
use one_recipes::{Recipe, RecipeRule, ReferencedTypes, RuleValue};
use serde::{Deserialize, Serialize};

/// One frame on the wire: a request or the response to an earlier request,
/// correlated by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    /// The request id this frame belongs to.
    pub id: u64,
    /// The payload.
    pub body: FrameBody,
}

/// The payload of a [`Frame`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FrameBody {
    /// A request to the peer's exporter.
    Request(ChumRequest),
    /// The response to one of our requests.
    Response(ChumResponse),
    /// This side's importer is finished; sent once, never answered.
    Goodbye,
}

/// The request kinds of the chum protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ChumRequest {
    /// The canonical text of an object.
    GetObject {
        /// The object's content address.
        hash: Hash,
    },
    /// The ID-object frame and current version of an identity.
    GetIdObject {
        /// The identity.
        id_hash: IdHash,
    },
    /// The raw bytes of a blob.
    GetBlob {
        /// The blob's content address.
        hash: Hash,
    },
    /// The text of a clob.
    GetClob {
        /// The clob's content address.
        hash: Hash,
    },
    /// Type and identity information about an object.
    GetMetadata {
        /// The object's content address.
        hash: Hash,
    },
    /// The outbound references of an object. Serving this also authorizes
    /// the requester for the listed targets.
    GetChildren {
        /// The object's content address.
        hash: Hash,
    },
    /// The identities shared with a person, up to a cutoff.
    ListAccessible {
        /// The requesting person.
        person: PersonId,
        /// Only identities whose newest version is at or before this time.
        until: Timestamp,
    },
}

/// A reference as it travels on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "kind", content = "target")]
pub enum WireReference {
    /// A reference to an object.
    Object(Hash),
    /// A reference to a versioned identity.
    Id(IdHash),
    /// A reference to a blob.
    Blob(Hash),
    /// A reference to a clob.
    Clob(Hash),
}

impl From<Reference> for WireReference {
    fn from(reference: Reference) -> Self {
        match reference {
            Reference::Object(hash) => WireReference::Object(hash),
            Reference::Id(id_hash) => WireReference::Id(id_hash),
            Reference::Blob(hash) => WireReference::Blob(hash),
            Reference::Clob(hash) => WireReference::Clob(hash),
        }
    }
}

/// The response kinds of the chum protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ChumResponse {
    /// The canonical text of the requested object.
    Object {
        /// The canonical text.
        text: String,
    },
    /// The ID-object frame of the requested identity.
    IdObject {
        /// The ID-object frame.
        text: String,
        /// The identity's current version.
        current: Hash,
    },
    /// The requested blob.
    Blob {
        /// The bytes, base64-encoded.
        base64: String,
    },
    /// The requested clob.
    Clob {
        /// The text.
        text: String,
    },
    /// Metadata about the requested object.
    Metadata {
        /// The object's type.
        type_name: String,
        /// The object's identity, for versioned types.
        id_hash: Option<IdHash>,
    },
    /// The outbound references of the requested object.
    Children {
        /// The references.
        references: Vec<WireReference>,
    },
    /// The accessible identities.
    Accessible {
        /// The shared identities.
        roots: Vec<IdHash>,
    },
    /// The request failed.
    Error {
        /// The stable short code of the failure.
        code: String,
        /// The address the request named, for the error record.
        target: String,
    },
}

/// Counters of what one direction of a session transferred.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferLedger {
    /// Objects imported.
    pub objects: u64,
    /// ID objects imported.
    pub id_objects: u64,
    /// Blobs imported.
    pub blobs: u64,
    /// Clobs imported.
    pub clobs: u64,
}

impl TransferLedger {
    /// The total number of records transferred.
    pub fn total(&self) -> u64 {
        self.objects + self.id_objects + self.blobs + self.clobs
    }
}

/// One error observed during a session, kept for the `Chum` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChumErrorRecord {
    /// The stable short code.
    pub code: String,
    /// The address involved.
    pub target: String,
}

/// The recipe of the persisted `Chum` session record.
pub fn chum_recipes() -> Vec<Recipe> {
    let counter = |name: &str| {
        RecipeRule::new(
            name,
            RuleValue::Integer {
                min: Some(0),
                max: None,
            },
        )
    };
    vec![Recipe {
        name: "Chum".into(),
        rules: vec![
            RecipeRule::new("name", RuleValue::String { regex: None }).id(),
            RecipeRule::new(
                "instance",
                RuleValue::Array(Box::new(RuleValue::String { regex: None })),
            )
            .id(),
            RecipeRule::new(
                "person",
                RuleValue::Array(Box::new(RuleValue::ReferenceToId {
                    allowed: ReferencedTypes::of(["Person"]),
                })),
            ),
            counter("aToBObjects"),
            counter("aToBIdObjects"),
            counter("aToBBlobs"),
            counter("aToBClobs"),
            counter("bToAObjects"),
            counter("bToAIdObjects"),
            counter("bToABlobs"),
            counter("bToAClobs"),
            counter("bToAExists"),
            RecipeRule::new(
                "errors",
                RuleValue::Array(Box::new(RuleValue::String { regex: None })),
            )
            .optional(),
            counter("startTime"),
            counter("endTime"),
        ],
    }]
}

/// Renders the final `Chum` record of a finished session.
#[allow(clippy::too_many_arguments)]
pub fn chum_record(
    name: &str,
    local_instance: &str,
    remote_instance: &str,
    local_person: PersonId,
    remote_person: PersonId,
    exported: TransferLedger,
    imported: TransferLedger,
    already_existed: u64,
    errors: &[ChumErrorRecord],
    started: Timestamp,
    ended: Timestamp,
) -> OneObject {
    let mut record = OneObject::new("Chum")
        .with("name", DataValue::String(name.to_owned()))
        .with(
            "instance",
            DataValue::Collection(vec![
                DataValue::String(local_instance.to_owned()),
                DataValue::String(remote_instance.to_owned()),
            ]),
        )
        .with(
            "person",
            DataValue::Collection(vec![
                DataValue::Reference(Reference::Id(local_person)),
                DataValue::Reference(Reference::Id(remote_person)),
            ]),
        )
        .with("aToBObjects", DataValue::Integer(exported.objects as i64))
        .with(
            "aToBIdObjects",
            DataValue::Integer(exported.id_objects as i64),
        )
        .with("aToBBlobs", DataValue::Integer(exported.blobs as i64))
        .with("aToBClobs", DataValue::Integer(exported.clobs as i64))
        .with("bToAObjects", DataValue::Integer(imported.objects as i64))
        .with(
            "bToAIdObjects",
            DataValue::Integer(imported.id_objects as i64),
        )
        .with("bToABlobs", DataValue::Integer(imported.blobs as i64))
        .with("bToAClobs", DataValue::Integer(imported.clobs as i64))
        .with("bToAExists", DataValue::Integer(already_existed as i64))
        .with("startTime", DataValue::Integer(started.as_millis() as i64))
        .with("endTime", DataValue::Integer(ended.as_millis() as i64));
    if !errors.is_empty() {
        record = record.with(
            "errors",
            DataValue::Collection(
                errors
                    .iter()
                    .map(|error| {
                        DataValue::String(format!("{} {}", error.code, error.target))
                    })
                    .collect(),
            ),
        );
    }
    record
}
