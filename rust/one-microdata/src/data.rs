use std::collections::BTreeMap;

use one_common::{Hash, IdHash};

/// A typed link from one record to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Reference {
    /// A link to a stored object by content address.
    Object(Hash),
    /// A link to the identity of a versioned object.
    Id(IdHash),
    /// A link to a raw binary blob.
    Blob(Hash),
    /// A link to a raw UTF-8 clob.
    Clob(Hash),
}

impl Reference {
    /// The `data-type` attribute value for this reference kind.
    pub fn data_type(&self) -> &'static str {
        match self {
            Reference::Object(_) => "object",
            Reference::Id(_) => "id",
            Reference::Blob(_) => "blob",
            Reference::Clob(_) => "clob",
        }
    }

    /// The hex rendering of the target address.
    pub fn target_hex(&self) -> String {
        match self {
            Reference::Object(hash) | Reference::Blob(hash) | Reference::Clob(hash) => {
                hash.to_hex()
            }
            Reference::Id(id_hash) => id_hash.to_hex(),
        }
    }

    /// Whether this reference names a versioned identity rather than a
    /// concrete record.
    pub fn is_id(&self) -> bool {
        matches!(self, Reference::Id(_))
    }
}

/// A field value of an in-memory record.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    /// A UTF-8 string.
    String(String),
    /// A signed integer.
    Integer(i64),
    /// A floating point number (finite).
    Number(f64),
    /// A boolean.
    Boolean(bool),
    /// An arbitrary JSON value, emitted in compact form.
    Stringifiable(serde_json::Value),
    /// A typed link to another record.
    Reference(Reference),
    /// The items of a bag, set or array rule.
    Collection(Vec<DataValue>),
    /// The entries of a map rule.
    Map(BTreeMap<String, DataValue>),
    /// A nested object.
    Object(FieldMap),
}

/// The fields of an object, keyed by itemprop.
pub type FieldMap = BTreeMap<String, DataValue>;

/// An in-memory record of some recipe-described type.
///
/// Emission order is dictated by the recipe's rule list, not by this map, so
/// the map's own ordering is irrelevant to hashing.
#[derive(Debug, Clone, PartialEq)]
pub struct OneObject {
    /// The record's type name.
    pub type_name: String,
    /// The record's fields.
    pub fields: FieldMap,
}

impl OneObject {
    /// Creates an empty record of the given type.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: FieldMap::new(),
        }
    }

    /// Sets a field, builder-style.
    pub fn with(mut self, itemprop: impl Into<String>, value: DataValue) -> Self {
        self.fields.insert(itemprop.into(), value);
        self
    }

    /// Looks up a field.
    pub fn field(&self, itemprop: &str) -> Option<&DataValue> {
        self.fields.get(itemprop)
    }

    /// Every reference the record carries, paired with the top-level field
    /// it lives under (references inside collections and nested objects are
    /// attributed to their top-level field).
    pub fn references(&self) -> Vec<(String, Reference)> {
        let mut out = Vec::new();
        for (itemprop, value) in &self.fields {
            collect_references(itemprop, value, &mut out);
        }
        out
    }
}

fn collect_references(field: &str, value: &DataValue, out: &mut Vec<(String, Reference)>) {
    match value {
        DataValue::Reference(reference) => out.push((field.to_owned(), *reference)),
        DataValue::Collection(items) => {
            for item in items {
                collect_references(field, item, out);
            }
        }
        DataValue::Map(entries) => {
            for item in entries.values() {
                collect_references(field, item, out);
            }
        }
        DataValue::Object(fields) => {
            for item in fields.values() {
                collect_references(field, item, out);
            }
        }
        _ => {}
    }
}
