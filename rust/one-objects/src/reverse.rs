use std::collections::{BTreeMap, BTreeSet};

use one_common::{Hash, IdHash};
use one_microdata::Reference;

/// Which `(referrer type, field)` pairs feed the reverse-map index.
///
/// One map covers references to concrete records, the other references to
/// versioned identities; a pair that appears in neither is simply not
/// indexed.
#[derive(Debug, Clone, Default)]
pub struct ReverseMapConfig {
    /// Indexed fields for concrete (object/blob/clob) references, keyed by
    /// referrer type.
    pub objects: BTreeMap<String, BTreeSet<String>>,
    /// Indexed fields for identity references, keyed by referrer type.
    pub id_objects: BTreeMap<String, BTreeSet<String>>,
}

impl ReverseMapConfig {
    /// An empty configuration; nothing is indexed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables indexing of a concrete-reference field.
    pub fn enable(mut self, referrer_type: impl Into<String>, field: impl Into<String>) -> Self {
        self.objects
            .entry(referrer_type.into())
            .or_default()
            .insert(field.into());
        self
    }

    /// Enables indexing of an identity-reference field.
    pub fn enable_id(mut self, referrer_type: impl Into<String>, field: impl Into<String>) -> Self {
        self.id_objects
            .entry(referrer_type.into())
            .or_default()
            .insert(field.into());
        self
    }

    /// Whether the given reference of `referrer_type.field` is indexed.
    pub fn is_enabled(&self, referrer_type: &str, field: &str, reference: &Reference) -> bool {
        let table = if reference.is_id() {
            &self.id_objects
        } else {
            &self.objects
        };
        table
            .get(referrer_type)
            .is_some_and(|fields| fields.contains(field))
    }
}

/// The reverse-map file name for a concrete reference target.
pub fn reverse_map_name(target: Hash, referrer_type: &str, field: &str) -> String {
    format!("{}.ReverseMap.{referrer_type}.{field}", target.to_hex())
}

/// The reverse-map file name for an identity reference target.
pub fn id_reverse_map_name(target: IdHash, referrer_type: &str, field: &str) -> String {
    format!("{}.IdObject.{referrer_type}.{field}", target.to_hex())
}
