use one_recipes::{NestedRules, RecipeRegistry, RecipeRule, RuleValue};

use crate::{
    DataValue, FieldMap, OneMicrodataError, OneObject, Reference, TYPE_URI_PREFIX, escape,
};

/// Serializes an object to its canonical text, validating it against the
/// recipe registry.
///
/// The output is the byte sequence over which the record's content address
/// is computed; it is deterministic for a given object and recipe set.
pub fn serialize(
    object: &OneObject,
    registry: &RecipeRegistry,
) -> Result<String, OneMicrodataError> {
    let recipe = registry
        .get(&object.type_name)
        .map_err(|_| OneMicrodataError::UnknownType {
            name: object.type_name.clone(),
        })?;

    let context = EmitContext {
        registry,
        type_name: &object.type_name,
    };
    let mut out = String::with_capacity(256);
    out.push_str("<div itemscope itemtype=\"");
    out.push_str(TYPE_URI_PREFIX);
    out.push_str(&object.type_name);
    out.push_str("\">");
    emit_fields(&mut out, &context, "", &recipe.rules, &object.fields)?;
    out.push_str("</div>");
    Ok(out)
}

struct EmitContext<'a> {
    registry: &'a RecipeRegistry,
    type_name: &'a str,
}

impl EmitContext<'_> {
    fn mismatch(&self, path: &str, expected: &'static str, value: &DataValue) -> OneMicrodataError {
        OneMicrodataError::TypeMismatch {
            type_name: self.type_name.to_owned(),
            path: path.to_owned(),
            expected,
            found: value_kind(value).to_owned(),
        }
    }

    /// Resolves the rule set of a nested object value.
    fn nested_rules(&self, nested: &NestedRules) -> Result<Vec<RecipeRule>, OneMicrodataError> {
        resolve_nested_rules(self.registry, nested)
    }
}

/// Resolves the rule set of a nested object value, following `Inherit`
/// indirections through the registry.
pub(crate) fn resolve_nested_rules(
    registry: &RecipeRegistry,
    nested: &NestedRules,
) -> Result<Vec<RecipeRule>, OneMicrodataError> {
    match nested {
        NestedRules::Inline(rules) => Ok(rules.clone()),
        NestedRules::Inherit(target) => {
            let (recipe, path) = match target.split_once('.') {
                Some((recipe, path)) => (recipe, path),
                None => (target.as_str(), ""),
            };
            Ok(registry.rules_at(recipe, path)?.as_ref().clone())
        }
    }
}

fn join_path(prefix: &str, itemprop: &str) -> String {
    if prefix.is_empty() {
        itemprop.to_owned()
    } else {
        format!("{prefix}.{itemprop}")
    }
}

fn value_kind(value: &DataValue) -> &'static str {
    match value {
        DataValue::String(_) => "string",
        DataValue::Integer(_) => "integer",
        DataValue::Number(_) => "number",
        DataValue::Boolean(_) => "boolean",
        DataValue::Stringifiable(_) => "stringifiable",
        DataValue::Reference(reference) => match reference {
            Reference::Object(_) => "reference-to-object",
            Reference::Id(_) => "reference-to-id",
            Reference::Blob(_) => "reference-to-blob",
            Reference::Clob(_) => "reference-to-clob",
        },
        DataValue::Collection(_) => "collection",
        DataValue::Map(_) => "map",
        DataValue::Object(_) => "object",
    }
}

fn emit_fields(
    out: &mut String,
    context: &EmitContext<'_>,
    path: &str,
    rules: &[RecipeRule],
    fields: &FieldMap,
) -> Result<(), OneMicrodataError> {
    for itemprop in fields.keys() {
        if !rules.iter().any(|rule| &rule.itemprop == itemprop) {
            return Err(OneMicrodataError::UnknownItemprop {
                type_name: context.type_name.to_owned(),
                itemprop: join_path(path, itemprop),
            });
        }
    }

    for rule in rules {
        let field_path = join_path(path, &rule.itemprop);
        match fields.get(&rule.itemprop) {
            Some(value) => {
                emit_field(out, context, &field_path, &rule.itemprop, &rule.value, value)?;
            }
            None if rule.optional => {}
            None => {
                return Err(OneMicrodataError::MissingMandatoryField {
                    type_name: context.type_name.to_owned(),
                    itemprop: field_path,
                });
            }
        }
    }
    Ok(())
}

fn emit_field(
    out: &mut String,
    context: &EmitContext<'_>,
    path: &str,
    itemprop: &str,
    rule: &RuleValue,
    value: &DataValue,
) -> Result<(), OneMicrodataError> {
    match rule {
        RuleValue::String { .. }
        | RuleValue::Integer { .. }
        | RuleValue::Number { .. }
        | RuleValue::Boolean
        | RuleValue::Stringifiable => {
            let text = scalar_text(context, path, rule, value)?;
            out.push_str("<span itemprop=\"");
            out.push_str(itemprop);
            out.push_str("\">");
            out.push_str(&text);
            out.push_str("</span>");
        }
        RuleValue::ReferenceToObject { .. }
        | RuleValue::ReferenceToId { .. }
        | RuleValue::ReferenceToBlob
        | RuleValue::ReferenceToClob => {
            let reference = checked_reference(context, path, rule, value)?;
            out.push_str("<a itemprop=\"");
            out.push_str(itemprop);
            out.push_str("\" data-type=\"");
            out.push_str(reference.data_type());
            out.push_str("\" href=\"");
            out.push_str(&reference.target_hex());
            out.push_str("\"></a>");
        }
        RuleValue::Bag(_) | RuleValue::Set(_) | RuleValue::Array(_) => {
            let body = collection_body(context, path, rule, value)?;
            out.push_str("<ol itemprop=\"");
            out.push_str(itemprop);
            if matches!(rule, RuleValue::Set(_)) {
                out.push_str("\" data-type=\"set");
            }
            out.push_str("\">");
            out.push_str(&body);
            out.push_str("</ol>");
        }
        RuleValue::Map(inner) => {
            let DataValue::Map(entries) = value else {
                return Err(context.mismatch(path, "map", value));
            };
            out.push_str("<dl itemprop=\"");
            out.push_str(itemprop);
            out.push_str("\">");
            for (key, entry) in entries {
                out.push_str("<dt>");
                out.push_str(&escape(key));
                out.push_str("</dt><dd>");
                let mut body = String::new();
                emit_bare(&mut body, context, &format!("{path}.{key}"), inner, entry)?;
                out.push_str(&body);
                out.push_str("</dd>");
            }
            out.push_str("</dl>");
        }
        RuleValue::Object(nested) => {
            let DataValue::Object(fields) = value else {
                return Err(context.mismatch(path, "object", value));
            };
            let rules = context.nested_rules(nested)?;
            out.push_str("<div itemprop=\"");
            out.push_str(itemprop);
            out.push_str("\" itemscope>");
            emit_fields(out, context, path, &rules, fields)?;
            out.push_str("</div>");
        }
    }
    Ok(())
}

/// Emits a value without an itemprop attribute, for collection items and map
/// entries.
fn emit_bare(
    out: &mut String,
    context: &EmitContext<'_>,
    path: &str,
    rule: &RuleValue,
    value: &DataValue,
) -> Result<(), OneMicrodataError> {
    match rule {
        RuleValue::String { .. }
        | RuleValue::Integer { .. }
        | RuleValue::Number { .. }
        | RuleValue::Boolean
        | RuleValue::Stringifiable => {
            out.push_str(&scalar_text(context, path, rule, value)?);
        }
        RuleValue::ReferenceToObject { .. }
        | RuleValue::ReferenceToId { .. }
        | RuleValue::ReferenceToBlob
        | RuleValue::ReferenceToClob => {
            let reference = checked_reference(context, path, rule, value)?;
            out.push_str("<a data-type=\"");
            out.push_str(reference.data_type());
            out.push_str("\" href=\"");
            out.push_str(&reference.target_hex());
            out.push_str("\"></a>");
        }
        RuleValue::Bag(_) | RuleValue::Set(_) | RuleValue::Array(_) => {
            let body = collection_body(context, path, rule, value)?;
            if matches!(rule, RuleValue::Set(_)) {
                out.push_str("<ol data-type=\"set\">");
            } else {
                out.push_str("<ol>");
            }
            out.push_str(&body);
            out.push_str("</ol>");
        }
        RuleValue::Map(inner) => {
            let DataValue::Map(entries) = value else {
                return Err(context.mismatch(path, "map", value));
            };
            out.push_str("<dl>");
            for (key, entry) in entries {
                out.push_str("<dt>");
                out.push_str(&escape(key));
                out.push_str("</dt><dd>");
                emit_bare(out, context, &format!("{path}.{key}"), inner, entry)?;
                out.push_str("</dd>");
            }
            out.push_str("</dl>");
        }
        RuleValue::Object(nested) => {
            let DataValue::Object(fields) = value else {
                return Err(context.mismatch(path, "object", value));
            };
            let rules = context.nested_rules(nested)?;
            out.push_str("<div itemscope>");
            emit_fields(out, context, path, &rules, fields)?;
            out.push_str("</div>");
        }
    }
    Ok(())
}

/// Renders the items of a bag, set or array rule: bags and sets sorted by
/// their canonical bytes, arrays in caller order, duplicates rejected for
/// sets only.
fn collection_body(
    context: &EmitContext<'_>,
    path: &str,
    rule: &RuleValue,
    value: &DataValue,
) -> Result<String, OneMicrodataError> {
    let (inner, sorted, unique) = match rule {
        RuleValue::Bag(inner) => (inner, true, false),
        RuleValue::Set(inner) => (inner, true, true),
        RuleValue::Array(inner) => (inner, false, false),
        _ => unreachable!("collection_body called with a non-collection rule"),
    };
    let DataValue::Collection(items) = value else {
        return Err(context.mismatch(path, "collection", value));
    };

    let mut rendered = Vec::with_capacity(items.len());
    for item in items {
        let mut body = String::new();
        emit_bare(&mut body, context, path, inner, item)?;
        rendered.push(body);
    }
    if sorted {
        rendered.sort_unstable();
    }
    if unique && rendered.windows(2).any(|pair| pair[0] == pair[1]) {
        return Err(OneMicrodataError::TypeMismatch {
            type_name: context.type_name.to_owned(),
            path: path.to_owned(),
            expected: "set without duplicate items",
            found: "duplicate item".to_owned(),
        });
    }

    let mut out = String::new();
    for body in rendered {
        out.push_str("<li>");
        out.push_str(&body);
        out.push_str("</li>");
    }
    Ok(out)
}

fn scalar_text(
    context: &EmitContext<'_>,
    path: &str,
    rule: &RuleValue,
    value: &DataValue,
) -> Result<String, OneMicrodataError> {
    match (rule, value) {
        (RuleValue::String { regex }, DataValue::String(text)) => {
            if let Some(regex) = regex {
                check_regex(context.type_name, path, regex, text)?;
            }
            Ok(escape(text))
        }
        (RuleValue::Integer { min, max }, DataValue::Integer(number)) => {
            let in_bounds =
                min.is_none_or(|min| *number >= min) && max.is_none_or(|max| *number <= max);
            if !in_bounds {
                return Err(context.mismatch(path, "integer within bounds", value));
            }
            Ok(number.to_string())
        }
        (RuleValue::Number { min, max }, DataValue::Number(number)) => {
            if !number.is_finite() {
                return Err(context.mismatch(path, "finite number", value));
            }
            let in_bounds =
                min.is_none_or(|min| *number >= min) && max.is_none_or(|max| *number <= max);
            if !in_bounds {
                return Err(context.mismatch(path, "number within bounds", value));
            }
            Ok(number.to_string())
        }
        (RuleValue::Boolean, DataValue::Boolean(flag)) => Ok(flag.to_string()),
        (RuleValue::Stringifiable, DataValue::Stringifiable(json)) => {
            let compact = serde_json::to_string(json)
                .map_err(|_| context.mismatch(path, "stringifiable JSON", value))?;
            Ok(escape(&compact))
        }
        (RuleValue::String { .. }, _) => Err(context.mismatch(path, "string", value)),
        (RuleValue::Integer { .. }, _) => Err(context.mismatch(path, "integer", value)),
        (RuleValue::Number { .. }, _) => Err(context.mismatch(path, "number", value)),
        (RuleValue::Boolean, _) => Err(context.mismatch(path, "boolean", value)),
        (RuleValue::Stringifiable, _) => Err(context.mismatch(path, "stringifiable", value)),
        _ => unreachable!("scalar_text called with a non-scalar rule"),
    }
}

fn checked_reference(
    context: &EmitContext<'_>,
    path: &str,
    rule: &RuleValue,
    value: &DataValue,
) -> Result<Reference, OneMicrodataError> {
    let DataValue::Reference(reference) = value else {
        return Err(context.mismatch(path, "reference", value));
    };
    let matches = matches!(
        (rule, reference),
        (RuleValue::ReferenceToObject { .. }, Reference::Object(_))
            | (RuleValue::ReferenceToId { .. }, Reference::Id(_))
            | (RuleValue::ReferenceToBlob, Reference::Blob(_))
            | (RuleValue::ReferenceToClob, Reference::Clob(_))
    );
    if !matches {
        let expected = match rule {
            RuleValue::ReferenceToObject { .. } => "reference-to-object",
            RuleValue::ReferenceToId { .. } => "reference-to-id",
            RuleValue::ReferenceToBlob => "reference-to-blob",
            _ => "reference-to-clob",
        };
        return Err(context.mismatch(path, expected, value));
    }
    Ok(*reference)
}

pub(crate) fn check_regex(
    type_name: &str,
    path: &str,
    regex: &str,
    text: &str,
) -> Result<(), OneMicrodataError> {
    let failed = || OneMicrodataError::RegexFailed {
        type_name: type_name.to_owned(),
        path: path.to_owned(),
        regex: regex.to_owned(),
    };
    // Whole-value match; the pattern was validated at registration.
    let compiled = regex::Regex::new(&format!("^(?:{regex})$")).map_err(|_| failed())?;
    if compiled.is_match(text) {
        Ok(())
    } else {
        Err(failed())
    }
}
