use one_common::{Hash, IdHash};
use one_recipes::{RecipeRegistry, RecipeRule, RuleValue};

use crate::emit::{check_regex, resolve_nested_rules};
use crate::{
    DataValue, FieldMap, OneMicrodataError, OneObject, Reference, Scanner, unescape,
};

/// Parses canonical text back into an object, validating against the recipe
/// registry.
///
/// The parser is strict: it accepts exactly the bytes [`crate::serialize`]
/// produces and rejects everything else, so `parse ∘ serialize` is the
/// identity and re-serializing a parsed record reproduces the input bytes.
pub fn parse(text: &str, registry: &RecipeRegistry) -> Result<OneObject, OneMicrodataError> {
    let mut scanner = Scanner::new(text);
    scanner.expect("<div itemscope itemtype=\"//refin.io/")?;
    let type_name = scanner.take_until("\">")?.to_owned();
    let recipe = registry
        .get(&type_name)
        .map_err(|_| OneMicrodataError::UnknownType {
            name: type_name.clone(),
        })?;

    let context = ParseContext {
        registry,
        type_name: &type_name,
    };
    let fields = parse_fields(&mut scanner, &context, "", &recipe.rules)?;
    scanner.expect("</div>")?;
    if !scanner.at_end() {
        return Err(OneMicrodataError::TrailingInput { at: scanner.pos });
    }
    Ok(OneObject { type_name, fields })
}

/// Parses text that was fetched by content address, verifying the address
/// first.
pub fn parse_verified(
    text: &str,
    expected: Hash,
    registry: &RecipeRegistry,
) -> Result<OneObject, OneMicrodataError> {
    let actual = Hash::digest(text);
    if actual != expected {
        return Err(OneMicrodataError::HashMismatch { expected, actual });
    }
    parse(text, registry)
}

struct ParseContext<'a> {
    registry: &'a RecipeRegistry,
    type_name: &'a str,
}

impl ParseContext<'_> {
    fn mismatch(&self, path: &str, expected: &'static str, found: &str) -> OneMicrodataError {
        OneMicrodataError::TypeMismatch {
            type_name: self.type_name.to_owned(),
            path: path.to_owned(),
            expected,
            found: found.chars().take(80).collect(),
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

fn parse_fields(
    scanner: &mut Scanner<'_>,
    context: &ParseContext<'_>,
    path: &str,
    rules: &[RecipeRule],
) -> Result<FieldMap, OneMicrodataError> {
    let mut fields = FieldMap::new();
    let mut rule_index = 0usize;

    while !scanner.peek("</") {
        let tag = scanner.open_tag()?;
        let itemprop = tag
            .attr("itemprop")
            .ok_or_else(|| scanner.err("itemprop attribute"))?
            .to_owned();

        let offset = rules[rule_index..]
            .iter()
            .position(|rule| rule.itemprop == itemprop);
        let Some(offset) = offset else {
            if rules.iter().any(|rule| rule.itemprop == itemprop) {
                // The field exists but appears out of canonical order (or
                // twice).
                return Err(scanner.err("fields in recipe order"));
            }
            return Err(OneMicrodataError::UnknownItemprop {
                type_name: context.type_name.to_owned(),
                itemprop: join_path(path, &itemprop),
            });
        };

        for skipped in &rules[rule_index..rule_index + offset] {
            if !skipped.optional {
                return Err(OneMicrodataError::MissingMandatoryField {
                    type_name: context.type_name.to_owned(),
                    itemprop: join_path(path, &skipped.itemprop),
                });
            }
        }
        let rule = &rules[rule_index + offset];
        let field_path = join_path(path, &rule.itemprop);
        let value = parse_field_value(scanner, context, &field_path, rule)?;
        fields.insert(rule.itemprop.clone(), value);
        rule_index += offset + 1;
    }

    for rule in &rules[rule_index..] {
        if !rule.optional {
            return Err(OneMicrodataError::MissingMandatoryField {
                type_name: context.type_name.to_owned(),
                itemprop: join_path(path, &rule.itemprop),
            });
        }
    }
    Ok(fields)
}

fn parse_field_value(
    scanner: &mut Scanner<'_>,
    context: &ParseContext<'_>,
    path: &str,
    rule: &RecipeRule,
) -> Result<DataValue, OneMicrodataError> {
    let itemprop = &rule.itemprop;
    match &rule.value {
        RuleValue::String { .. }
        | RuleValue::Integer { .. }
        | RuleValue::Number { .. }
        | RuleValue::Boolean
        | RuleValue::Stringifiable => {
            scanner.expect_exact(&format!("<span itemprop=\"{itemprop}\">"), "scalar field")?;
            let raw = scanner.take_until("</span>")?;
            let text = canonical_content(scanner, raw)?;
            parse_scalar(context, path, &rule.value, &text)
        }
        RuleValue::ReferenceToObject { .. }
        | RuleValue::ReferenceToId { .. }
        | RuleValue::ReferenceToBlob
        | RuleValue::ReferenceToClob => {
            let data_type = reference_data_type(&rule.value);
            scanner.expect_exact(
                &format!("<a itemprop=\"{itemprop}\" data-type=\"{data_type}\" href=\""),
                "reference field",
            )?;
            let hex = scanner.take_until("\"></a>")?;
            parse_reference(scanner, &rule.value, hex)
        }
        RuleValue::Bag(inner) | RuleValue::Set(inner) | RuleValue::Array(inner) => {
            let open = if matches!(rule.value, RuleValue::Set(_)) {
                format!("<ol itemprop=\"{itemprop}\" data-type=\"set\">")
            } else {
                format!("<ol itemprop=\"{itemprop}\">")
            };
            scanner.expect_exact(&open, "collection field")?;
            let items = parse_items(scanner, context, path, inner, &rule.value)?;
            scanner.expect("</ol>")?;
            Ok(DataValue::Collection(items))
        }
        RuleValue::Map(inner) => {
            scanner.expect_exact(&format!("<dl itemprop=\"{itemprop}\">"), "map field")?;
            let entries = parse_map_entries(scanner, context, path, inner)?;
            scanner.expect("</dl>")?;
            Ok(DataValue::Map(entries))
        }
        RuleValue::Object(nested) => {
            scanner.expect_exact(
                &format!("<div itemprop=\"{itemprop}\" itemscope>"),
                "nested object field",
            )?;
            let rules = resolve_nested_rules(context.registry, nested)?;
            let fields = parse_fields(scanner, context, path, &rules)?;
            scanner.expect("</div>")?;
            Ok(DataValue::Object(fields))
        }
    }
}

/// Parses a value without an itemprop attribute (collection items and map
/// entries). `terminator` is the closing tag of the surrounding container
/// slot and is left unconsumed.
fn parse_bare(
    scanner: &mut Scanner<'_>,
    context: &ParseContext<'_>,
    path: &str,
    rule: &RuleValue,
    terminator: &'static str,
) -> Result<DataValue, OneMicrodataError> {
    match rule {
        RuleValue::String { .. }
        | RuleValue::Integer { .. }
        | RuleValue::Number { .. }
        | RuleValue::Boolean
        | RuleValue::Stringifiable => {
            let raw = scanner.take_before(terminator)?;
            let text = canonical_content(scanner, raw)?;
            parse_scalar(context, path, rule, &text)
        }
        RuleValue::ReferenceToObject { .. }
        | RuleValue::ReferenceToId { .. }
        | RuleValue::ReferenceToBlob
        | RuleValue::ReferenceToClob => {
            let data_type = reference_data_type(rule);
            scanner.expect_exact(
                &format!("<a data-type=\"{data_type}\" href=\""),
                "reference item",
            )?;
            let hex = scanner.take_until("\"></a>")?;
            parse_reference(scanner, rule, hex)
        }
        RuleValue::Bag(inner) | RuleValue::Set(inner) | RuleValue::Array(inner) => {
            if matches!(rule, RuleValue::Set(_)) {
                scanner.expect("<ol data-type=\"set\">")?;
            } else {
                scanner.expect("<ol>")?;
            }
            let items = parse_items(scanner, context, path, inner, rule)?;
            scanner.expect("</ol>")?;
            Ok(DataValue::Collection(items))
        }
        RuleValue::Map(inner) => {
            scanner.expect("<dl>")?;
            let entries = parse_map_entries(scanner, context, path, inner)?;
            scanner.expect("</dl>")?;
            Ok(DataValue::Map(entries))
        }
        RuleValue::Object(nested) => {
            scanner.expect("<div itemscope>")?;
            let rules = resolve_nested_rules(context.registry, nested)?;
            let fields = parse_fields(scanner, context, path, &rules)?;
            scanner.expect("</div>")?;
            Ok(DataValue::Object(fields))
        }
    }
}

fn parse_items(
    scanner: &mut Scanner<'_>,
    context: &ParseContext<'_>,
    path: &str,
    inner: &RuleValue,
    collection: &RuleValue,
) -> Result<Vec<DataValue>, OneMicrodataError> {
    let sorted = matches!(collection, RuleValue::Bag(_) | RuleValue::Set(_));
    let unique = matches!(collection, RuleValue::Set(_));

    let mut items = Vec::new();
    let mut previous_raw: Option<String> = None;
    while scanner.peek("<li>") {
        scanner.expect("<li>")?;
        let start = scanner.pos;
        let value = parse_bare(scanner, context, path, inner, "</li>")?;
        let raw = scanner.input[start..scanner.pos].to_owned();
        scanner.expect("</li>")?;

        if sorted && let Some(previous) = &previous_raw {
            if unique && *previous == raw {
                return Err(context.mismatch(path, "set without duplicate items", &raw));
            }
            if *previous > raw {
                return Err(scanner.err("items in sorted order"));
            }
        }
        previous_raw = Some(raw);
        items.push(value);
    }
    Ok(items)
}

fn parse_map_entries(
    scanner: &mut Scanner<'_>,
    context: &ParseContext<'_>,
    path: &str,
    inner: &RuleValue,
) -> Result<std::collections::BTreeMap<String, DataValue>, OneMicrodataError> {
    let mut entries = std::collections::BTreeMap::new();
    let mut previous_key: Option<String> = None;
    while scanner.peek("<dt>") {
        scanner.expect("<dt>")?;
        let raw_key = scanner.take_until("</dt>")?;
        let key = canonical_content(scanner, raw_key)?;
        if let Some(previous) = &previous_key
            && *previous >= key
        {
            return Err(scanner.err("map keys in strictly ascending order"));
        }
        scanner.expect("<dd>")?;
        let value = parse_bare(scanner, context, &format!("{path}.{key}"), inner, "</dd>")?;
        scanner.expect("</dd>")?;
        previous_key = Some(key.clone());
        entries.insert(key, value);
    }
    Ok(entries)
}

/// Verifies that scalar content is canonically escaped, then unescapes it.
fn canonical_content(scanner: &Scanner<'_>, raw: &str) -> Result<String, OneMicrodataError> {
    if raw.contains('<') || raw.contains('>') {
        return Err(scanner.err("escaped content"));
    }
    Ok(unescape(raw))
}

fn reference_data_type(rule: &RuleValue) -> &'static str {
    match rule {
        RuleValue::ReferenceToObject { .. } => "object",
        RuleValue::ReferenceToId { .. } => "id",
        RuleValue::ReferenceToBlob => "blob",
        _ => "clob",
    }
}

fn parse_reference(
    scanner: &Scanner<'_>,
    rule: &RuleValue,
    hex: &str,
) -> Result<DataValue, OneMicrodataError> {
    let bad_address = || scanner.err("64 lowercase hex characters");
    let reference = match rule {
        RuleValue::ReferenceToObject { .. } => {
            Reference::Object(Hash::from_hex(hex).map_err(|_| bad_address())?)
        }
        RuleValue::ReferenceToId { .. } => {
            Reference::Id(IdHash::from_hex(hex).map_err(|_| bad_address())?)
        }
        RuleValue::ReferenceToBlob => {
            Reference::Blob(Hash::from_hex(hex).map_err(|_| bad_address())?)
        }
        _ => Reference::Clob(Hash::from_hex(hex).map_err(|_| bad_address())?),
    };
    Ok(DataValue::Reference(reference))
}

fn parse_scalar(
    context: &ParseContext<'_>,
    path: &str,
    rule: &RuleValue,
    text: &str,
) -> Result<DataValue, OneMicrodataError> {
    match rule {
        RuleValue::String { regex } => {
            if let Some(regex) = regex {
                check_regex(context.type_name, path, regex, text)?;
            }
            Ok(DataValue::String(text.to_owned()))
        }
        RuleValue::Integer { min, max } => {
            let number: i64 = text
                .parse()
                .map_err(|_| context.mismatch(path, "integer", text))?;
            // Reject non-canonical renderings like "+5" or "05".
            if number.to_string() != text {
                return Err(context.mismatch(path, "canonical integer", text));
            }
            let in_bounds =
                min.is_none_or(|min| number >= min) && max.is_none_or(|max| number <= max);
            if !in_bounds {
                return Err(context.mismatch(path, "integer within bounds", text));
            }
            Ok(DataValue::Integer(number))
        }
        RuleValue::Number { min, max } => {
            let number: f64 = text
                .parse()
                .map_err(|_| context.mismatch(path, "number", text))?;
            if !number.is_finite() || number.to_string() != text {
                return Err(context.mismatch(path, "canonical number", text));
            }
            let in_bounds =
                min.is_none_or(|min| number >= min) && max.is_none_or(|max| number <= max);
            if !in_bounds {
                return Err(context.mismatch(path, "number within bounds", text));
            }
            Ok(DataValue::Number(number))
        }
        RuleValue::Boolean => match text {
            "true" => Ok(DataValue::Boolean(true)),
            "false" => Ok(DataValue::Boolean(false)),
            other => Err(context.mismatch(path, "boolean", other)),
        },
        RuleValue::Stringifiable => {
            let json: serde_json::Value = serde_json::from_str(text)
                .map_err(|_| context.mismatch(path, "stringifiable JSON", text))?;
            let canonical = serde_json::to_string(&json)
                .map_err(|_| context.mismatch(path, "stringifiable JSON", text))?;
            if canonical != text {
                return Err(context.mismatch(path, "compact sorted JSON", text));
            }
            Ok(DataValue::Stringifiable(json))
        }
        _ => unreachable!("parse_scalar called with a non-scalar rule"),
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use one_recipes::{
        NestedRules, Recipe, RecipeRegistry, RecipeRule, ReferencedTypes, RuleValue,
    };
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::serialize;

    fn registry() -> RecipeRegistry {
        let registry = RecipeRegistry::new();
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
                    name: "Sample".into(),
                    rules: vec![
                        RecipeRule::new("title", RuleValue::String { regex: None }),
                        RecipeRule::new(
                            "count",
                            RuleValue::Integer {
                                min: Some(0),
                                max: Some(100),
                            },
                        ),
                        RecipeRule::new("ratio", RuleValue::Number { min: None, max: None }),
                        RecipeRule::new("flag", RuleValue::Boolean),
                        RecipeRule::new("extra", RuleValue::Stringifiable).optional(),
                        RecipeRule::new(
                            "tags",
                            RuleValue::Set(Box::new(RuleValue::String { regex: None })),
                        )
                        .optional(),
                        RecipeRule::new(
                            "list",
                            RuleValue::Array(Box::new(RuleValue::Integer {
                                min: None,
                                max: None,
                            })),
                        )
                        .optional(),
                        RecipeRule::new(
                            "scores",
                            RuleValue::Map(Box::new(RuleValue::Integer {
                                min: None,
                                max: None,
                            })),
                        )
                        .optional(),
                        RecipeRule::new(
                            "friend",
                            RuleValue::ReferenceToId {
                                allowed: ReferencedTypes::of(["Person"]),
                            },
                        )
                        .optional(),
                        RecipeRule::new(
                            "home",
                            RuleValue::Object(NestedRules::Inline(vec![
                                RecipeRule::new("street", RuleValue::String { regex: None }),
                                RecipeRule::new("city", RuleValue::String { regex: None }),
                            ])),
                        )
                        .optional(),
                    ],
                },
                Recipe {
                    name: "Coded".into(),
                    rules: vec![RecipeRule::new(
                        "code",
                        RuleValue::String {
                            regex: Some("[a-z]{3}".into()),
                        },
                    )],
                },
            ])
            .unwrap();
        registry
    }

    fn sample() -> OneObject {
        OneObject::new("Sample")
            .with("title", DataValue::String("a <b> & c".into()))
            .with("count", DataValue::Integer(42))
            .with("ratio", DataValue::Number(1.5))
            .with("flag", DataValue::Boolean(true))
            .with(
                "extra",
                DataValue::Stringifiable(serde_json::json!({"z": 1, "a": [true, "x"]})),
            )
            .with(
                "tags",
                DataValue::Collection(vec![
                    DataValue::String("zeta".into()),
                    DataValue::String("alpha".into()),
                ]),
            )
            .with(
                "list",
                DataValue::Collection(vec![DataValue::Integer(3), DataValue::Integer(1)]),
            )
            .with("scores", {
                let mut map = std::collections::BTreeMap::new();
                map.insert("won".into(), DataValue::Integer(7));
                map.insert("lost".into(), DataValue::Integer(2));
                DataValue::Map(map)
            })
            .with(
                "friend",
                DataValue::Reference(Reference::Id(IdHash::digest(b"someone"))),
            )
            .with("home", {
                let mut fields = FieldMap::new();
                fields.insert("street".into(), DataValue::String("Main".into()));
                fields.insert("city".into(), DataValue::String("Ulm".into()));
                DataValue::Object(fields)
            })
    }

    #[test]
    fn it_round_trips_a_full_record() -> Result<()> {
        let registry = registry();
        let object = sample();
        let text = serialize(&object, &registry)?;
        let parsed = parse(&text, &registry)?;
        assert_eq!(object, parsed);
        assert_eq!(serialize(&parsed, &registry)?, text);
        Ok(())
    }

    #[test]
    fn it_emits_sets_sorted_regardless_of_input_order() -> Result<()> {
        let registry = registry();
        let text = serialize(&sample(), &registry)?;
        let alpha = text.find("alpha").unwrap();
        let zeta = text.find("zeta").unwrap();
        assert!(alpha < zeta);
        // Arrays keep caller order.
        assert!(text.contains("<ol itemprop=\"list\"><li>3</li><li>1</li></ol>"));
        Ok(())
    }

    #[test]
    fn it_rejects_duplicate_set_items() {
        let registry = registry();
        let object = OneObject::new("Sample")
            .with("title", DataValue::String("t".into()))
            .with("count", DataValue::Integer(1))
            .with("ratio", DataValue::Number(0.5))
            .with("flag", DataValue::Boolean(false))
            .with(
                "tags",
                DataValue::Collection(vec![
                    DataValue::String("dup".into()),
                    DataValue::String("dup".into()),
                ]),
            );
        let error = serialize(&object, &registry).unwrap_err();
        assert_eq!(error.code(), "TypeMismatch");
    }

    #[test]
    fn it_reports_missing_mandatory_fields() {
        let registry = registry();
        let object = OneObject::new("Sample").with("title", DataValue::String("t".into()));
        let error = serialize(&object, &registry).unwrap_err();
        assert_eq!(error.code(), "MissingMandatoryField");
    }

    #[test]
    fn it_reports_unknown_itemprops() {
        let registry = registry();
        let object = OneObject::new("Person")
            .with("email", DataValue::String("a@b".into()))
            .with("nickname", DataValue::String("x".into()));
        let error = serialize(&object, &registry).unwrap_err();
        assert_eq!(error.code(), "UnknownItemprop");
    }

    #[test]
    fn it_enforces_the_rule_regex_on_both_paths() -> Result<()> {
        let registry = registry();
        let bad = OneObject::new("Coded").with("code", DataValue::String("TOOLONG".into()));
        assert_eq!(serialize(&bad, &registry).unwrap_err().code(), "RegexFailed");

        let good = OneObject::new("Coded").with("code", DataValue::String("abc".into()));
        let text = serialize(&good, &registry)?;
        let tampered = text.replace("abc", "ABC");
        assert_eq!(parse(&tampered, &registry).unwrap_err().code(), "RegexFailed");
        Ok(())
    }

    #[test]
    fn it_rejects_trailing_input() -> Result<()> {
        let registry = registry();
        let person = OneObject::new("Person").with("email", DataValue::String("a@b".into()));
        let mut text = serialize(&person, &registry)?;
        text.push_str("extra");
        assert_eq!(parse(&text, &registry).unwrap_err().code(), "TrailingInput");
        Ok(())
    }

    #[test]
    fn it_verifies_the_address_before_parsing() -> Result<()> {
        let registry = registry();
        let person = OneObject::new("Person").with("email", DataValue::String("a@b".into()));
        let text = serialize(&person, &registry)?;
        let hash = Hash::digest(&text);
        assert!(parse_verified(&text, hash, &registry).is_ok());

        let wrong = Hash::digest(b"something else");
        let error = parse_verified(&text, wrong, &registry).unwrap_err();
        assert_eq!(error.code(), "HashMismatch");
        Ok(())
    }

    #[test]
    fn it_rejects_non_canonical_scalar_renderings() -> Result<()> {
        let registry = registry();
        let person = OneObject::new("Sample")
            .with("title", DataValue::String("t".into()))
            .with("count", DataValue::Integer(5))
            .with("ratio", DataValue::Number(0.5))
            .with("flag", DataValue::Boolean(true));
        let text = serialize(&person, &registry)?;
        let padded = text.replace(
            "<span itemprop=\"count\">5</span>",
            "<span itemprop=\"count\">05</span>",
        );
        assert_eq!(parse(&padded, &registry).unwrap_err().code(), "TypeMismatch");
        Ok(())
    }

    #[test]
    fn it_rejects_unsorted_set_renderings() -> Result<()> {
        let registry = registry();
        let text = serialize(&sample(), &registry)?;
        let swapped = text.replace(
            "<li>alpha</li><li>zeta</li>",
            "<li>zeta</li><li>alpha</li>",
        );
        assert_ne!(swapped, text);
        assert_eq!(
            parse(&swapped, &registry).unwrap_err().code(),
            "MicrodataMalformed"
        );
        Ok(())
    }
}
