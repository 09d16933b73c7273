use std::collections::BTreeSet;

/// The set of types a reference rule may point at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferencedTypes {
    /// Any registered type is acceptable.
    Any,
    /// Only the listed types are acceptable.
    Types(BTreeSet<String>),
}

impl ReferencedTypes {
    /// Builds a [`ReferencedTypes::Types`] set from type names.
    pub fn of<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Types(names.into_iter().map(Into::into).collect())
    }

    /// Whether the given type name is acceptable.
    pub fn permits(&self, name: &str) -> bool {
        match self {
            ReferencedTypes::Any => true,
            ReferencedTypes::Types(types) => types.contains(name),
        }
    }
}

/// The rules governing a nested object value.
#[derive(Debug, Clone, PartialEq)]
pub enum NestedRules {
    /// The rules are written out inline.
    Inline(Vec<RecipeRule>),
    /// The rules are those of another recipe, optionally at a dotted path
    /// inside it (`"Person"` or `"Person.address"`). Resolved lazily by the
    /// registry.
    Inherit(String),
}

/// The value type of a single rule.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleValue {
    /// A UTF-8 string, optionally constrained by a regex (whole-value match).
    String {
        /// Regex the value must match, if any.
        regex: Option<String>,
    },
    /// A signed integer with optional bounds (inclusive).
    Integer {
        /// Smallest permitted value.
        min: Option<i64>,
        /// Largest permitted value.
        max: Option<i64>,
    },
    /// A floating point number with optional bounds (inclusive).
    Number {
        /// Smallest permitted value.
        min: Option<f64>,
        /// Largest permitted value.
        max: Option<f64>,
    },
    /// A boolean.
    Boolean,
    /// An arbitrary JSON value, stored in its compact serialization.
    Stringifiable,
    /// A reference to a stored object of one of the permitted types.
    ReferenceToObject {
        /// Which target types the reference may name.
        allowed: ReferencedTypes,
    },
    /// A reference to the identity of a versioned object.
    ReferenceToId {
        /// Which target types the reference may name.
        allowed: ReferencedTypes,
    },
    /// A reference to a raw binary blob.
    ReferenceToBlob,
    /// A reference to a raw UTF-8 clob.
    ReferenceToClob,
    /// An unordered collection, emitted sorted, duplicates permitted.
    Bag(Box<RuleValue>),
    /// An unordered collection, emitted sorted, duplicates rejected.
    Set(Box<RuleValue>),
    /// An ordered collection, emitted in caller order.
    Array(Box<RuleValue>),
    /// String-keyed entries, emitted sorted by key.
    Map(Box<RuleValue>),
    /// A nested object with its own rules.
    Object(NestedRules),
}

/// One field of a recipe.
#[derive(Debug, Clone, PartialEq)]
pub struct RecipeRule {
    /// The field name, used as the microdata itemprop.
    pub itemprop: String,
    /// Whether this field is part of the record's identity. Identity rules
    /// may only appear at the top level of a recipe.
    pub is_id: bool,
    /// Whether the field may be absent.
    pub optional: bool,
    /// The value type of the field.
    pub value: RuleValue,
}

impl RecipeRule {
    /// Creates a mandatory, non-identity rule.
    pub fn new(itemprop: impl Into<String>, value: RuleValue) -> Self {
        Self {
            itemprop: itemprop.into(),
            is_id: false,
            optional: false,
            value,
        }
    }

    /// Marks the rule as an identity rule.
    pub fn id(mut self) -> Self {
        self.is_id = true;
        self
    }

    /// Marks the rule as optional.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// A named type with its field rules.
///
/// A recipe is versioned exactly when at least one of its top-level rules is
/// an identity rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Recipe {
    /// The type name, as it appears in the record's type URI.
    pub name: String,
    /// The field rules, in emission order.
    pub rules: Vec<RecipeRule>,
}

impl Recipe {
    /// Whether objects of this recipe carry an identity.
    pub fn is_versioned(&self) -> bool {
        self.rules.iter().any(|rule| rule.is_id)
    }

    /// The identity rules, in rule order.
    pub fn id_rules(&self) -> impl Iterator<Item = &RecipeRule> {
        self.rules.iter().filter(|rule| rule.is_id)
    }

    /// Looks up a top-level rule by itemprop.
    pub fn rule(&self, itemprop: &str) -> Option<&RecipeRule> {
        self.rules.iter().find(|rule| rule.itemprop == itemprop)
    }
}
