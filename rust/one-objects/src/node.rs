use std::collections::BTreeSet;

use one_common::{Hash, Timestamp};
use one_microdata::{DataValue, OneObject, Reference};
use one_recipes::{Recipe, RecipeRule, ReferencedTypes, RuleValue};

use crate::OneObjectError;

/// A node in an identity's version DAG.
///
/// `depth` is always `1 + max(depth of each predecessor)`, or 0 for an
/// `Edge` (the root of a version line).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionNode {
    /// The root of a version line; has no predecessor.
    Edge {
        /// The payload version this node wraps.
        data: Hash,
        /// When the version was written, milliseconds since 1970.
        creation_time: Timestamp,
    },
    /// A linear successor of exactly one earlier node.
    Change {
        /// The payload version this node wraps.
        data: Hash,
        /// The predecessor node.
        prev: Hash,
        /// 1 + the predecessor's depth.
        depth: u64,
        /// When the version was written.
        creation_time: Timestamp,
    },
    /// The confluence of two or more concurrent nodes.
    Merge {
        /// The merged payload version.
        data: Hash,
        /// The merged predecessor nodes.
        nodes: BTreeSet<Hash>,
        /// 1 + the deepest predecessor's depth.
        depth: u64,
        /// When the merge was computed.
        creation_time: Timestamp,
    },
}

impl VersionNode {
    /// The payload version the node wraps.
    pub fn data(&self) -> Hash {
        match self {
            VersionNode::Edge { data, .. }
            | VersionNode::Change { data, .. }
            | VersionNode::Merge { data, .. } => *data,
        }
    }

    /// The node's depth in the DAG.
    pub fn depth(&self) -> u64 {
        match self {
            VersionNode::Edge { .. } => 0,
            VersionNode::Change { depth, .. } | VersionNode::Merge { depth, .. } => *depth,
        }
    }

    /// The node's predecessors (empty for an `Edge`).
    pub fn predecessors(&self) -> Vec<Hash> {
        match self {
            VersionNode::Edge { .. } => Vec::new(),
            VersionNode::Change { prev, .. } => vec![*prev],
            VersionNode::Merge { nodes, .. } => nodes.iter().copied().collect(),
        }
    }

    /// The recipe name of this node variant.
    pub fn type_name(&self) -> &'static str {
        match self {
            VersionNode::Edge { .. } => "VersionNodeEdge",
            VersionNode::Change { .. } => "VersionNodeChange",
            VersionNode::Merge { .. } => "VersionNodeMerge",
        }
    }

    /// Renders the node as a storable record.
    pub fn to_object(&self) -> OneObject {
        match self {
            VersionNode::Edge {
                data,
                creation_time,
            } => OneObject::new("VersionNodeEdge")
                .with("data", DataValue::Reference(Reference::Object(*data)))
                .with(
                    "creationTime",
                    DataValue::Integer(creation_time.as_millis() as i64),
                ),
            VersionNode::Change {
                data,
                prev,
                depth,
                creation_time,
            } => OneObject::new("VersionNodeChange")
                .with("data", DataValue::Reference(Reference::Object(*data)))
                .with("prev", DataValue::Reference(Reference::Object(*prev)))
                .with("depth", DataValue::Integer(*depth as i64))
                .with(
                    "creationTime",
                    DataValue::Integer(creation_time.as_millis() as i64),
                ),
            VersionNode::Merge {
                data,
                nodes,
                depth,
                creation_time,
            } => OneObject::new("VersionNodeMerge")
                .with("data", DataValue::Reference(Reference::Object(*data)))
                .with(
                    "nodes",
                    DataValue::Collection(
                        nodes
                            .iter()
                            .map(|node| DataValue::Reference(Reference::Object(*node)))
                            .collect(),
                    ),
                )
                .with("depth", DataValue::Integer(*depth as i64))
                .with(
                    "creationTime",
                    DataValue::Integer(creation_time.as_millis() as i64),
                ),
        }
    }

    /// Rebuilds a node from its stored record form.
    pub fn from_object(object: &OneObject, hash: Hash) -> Result<Self, OneObjectError> {
        let malformed = || OneObjectError::MalformedVersionNode { hash };
        let object_ref = |value: Option<&DataValue>| -> Result<Hash, OneObjectError> {
            match value {
                Some(DataValue::Reference(Reference::Object(hash))) => Ok(*hash),
                _ => Err(malformed()),
            }
        };
        let integer = |value: Option<&DataValue>| -> Result<i64, OneObjectError> {
            match value {
                Some(DataValue::Integer(number)) => Ok(*number),
                _ => Err(malformed()),
            }
        };

        let data = object_ref(object.field("data"))?;
        let creation_time = Timestamp::from_millis(integer(object.field("creationTime"))? as u64);
        match object.type_name.as_str() {
            "VersionNodeEdge" => Ok(VersionNode::Edge {
                data,
                creation_time,
            }),
            "VersionNodeChange" => Ok(VersionNode::Change {
                data,
                prev: object_ref(object.field("prev"))?,
                depth: integer(object.field("depth"))? as u64,
                creation_time,
            }),
            "VersionNodeMerge" => {
                let Some(DataValue::Collection(items)) = object.field("nodes") else {
                    return Err(malformed());
                };
                let mut nodes = BTreeSet::new();
                for item in items {
                    match item {
                        DataValue::Reference(Reference::Object(node)) => {
                            nodes.insert(*node);
                        }
                        _ => return Err(malformed()),
                    }
                }
                Ok(VersionNode::Merge {
                    data,
                    nodes,
                    depth: integer(object.field("depth"))? as u64,
                    creation_time,
                })
            }
            _ => Err(malformed()),
        }
    }
}

/// The recipes of the three version-node variants, registered by every
/// instance at boot.
pub fn version_recipes() -> Vec<Recipe> {
    let data = || {
        RecipeRule::new(
            "data",
            RuleValue::ReferenceToObject {
                allowed: ReferencedTypes::Any,
            },
        )
    };
    let depth = || {
        RecipeRule::new(
            "depth",
            RuleValue::Integer {
                min: Some(0),
                max: None,
            },
        )
    };
    let creation_time = || {
        RecipeRule::new(
            "creationTime",
            RuleValue::Integer {
                min: Some(0),
                max: None,
            },
        )
    };

    vec![
        Recipe {
            name: "VersionNodeEdge".into(),
            rules: vec![data(), creation_time()],
        },
        Recipe {
            name: "VersionNodeChange".into(),
            rules: vec![
                data(),
                RecipeRule::new(
                    "prev",
                    RuleValue::ReferenceToObject {
                        allowed: ReferencedTypes::Any,
                    },
                ),
                depth(),
                creation_time(),
            ],
        },
        Recipe {
            name: "VersionNodeMerge".into(),
            rules: vec![
                data(),
                RecipeRule::new(
                    "nodes",
                    RuleValue::Set(Box::new(RuleValue::ReferenceToObject {
                        allowed: ReferencedTypes::Any,
                    })),
                ),
                depth(),
                creation_time(),
            ],
        },
    ]
}
