use one_common::IdHash;
use one_recipes::RecipeRegistry;

use crate::{ID_OBJECT_SENTINEL, OneMicrodataError, Scanner, TYPE_URI_PREFIX};

/// Extracts the ID-object frame from a canonical record.
///
/// Returns `None` for unversioned types (their ID-hash is undefined). For
/// versioned types, the identity fields are copied byte-for-byte out of the
/// input — this path never rebuilds an in-memory object — and wrapped in a
/// frame carrying the ID-object sentinel so that the result cannot collide
/// with any regular record.
pub fn extract_id_object(
    text: &str,
    registry: &RecipeRegistry,
) -> Result<Option<String>, OneMicrodataError> {
    let mut scanner = Scanner::new(text);
    scanner.expect("<div itemscope itemtype=\"//refin.io/")?;
    let type_name = scanner.take_until("\">")?.to_owned();
    let recipe = registry
        .get(&type_name)
        .map_err(|_| OneMicrodataError::UnknownType {
            name: type_name.clone(),
        })?;
    if !recipe.is_versioned() {
        return Ok(None);
    }

    let id_itemprops: Vec<&str> = recipe
        .id_rules()
        .map(|rule| rule.itemprop.as_str())
        .collect();
    let mandatory_id_itemprops: Vec<&str> = recipe
        .id_rules()
        .filter(|rule| !rule.optional)
        .map(|rule| rule.itemprop.as_str())
        .collect();

    let mut spliced = String::with_capacity(text.len() / 2);
    let mut found: Vec<&str> = Vec::with_capacity(id_itemprops.len());
    while !scanner.peek("</div>") {
        let tag = scanner.open_tag()?;
        let itemprop = tag
            .attr("itemprop")
            .ok_or_else(|| scanner.err("itemprop attribute"))?;
        let is_id_field = id_itemprops.contains(&itemprop);
        let extent = scanner.element_extent()?;
        if is_id_field {
            found.push(itemprop);
            spliced.push_str(extent);
        }
    }

    if let Some(missing) = mandatory_id_itemprops
        .iter()
        .find(|itemprop| !found.contains(itemprop))
    {
        // A record missing a mandatory identity field has no well-defined
        // identity. (Optional identity fields — a channel without an owner —
        // are simply absent from the frame.)
        return Err(OneMicrodataError::MissingMandatoryField {
            type_name,
            itemprop: (*missing).to_owned(),
        });
    }

    Ok(Some(format!(
        "<div itemscope {ID_OBJECT_SENTINEL} itemtype=\"{TYPE_URI_PREFIX}{type_name}\">{spliced}</div>"
    )))
}

/// Computes the ID-hash of a canonical record, or `None` for unversioned
/// types.
pub fn id_hash_of(
    text: &str,
    registry: &RecipeRegistry,
) -> Result<Option<IdHash>, OneMicrodataError> {
    Ok(extract_id_object(text, registry)?.map(|frame| IdHash::digest(frame)))
}

/// Whether a piece of canonical text is an ID-object frame.
pub fn is_id_object(text: &str) -> bool {
    text.starts_with(&format!("<div itemscope {ID_OBJECT_SENTINEL} "))
}

/// The type name embedded in a canonical record or ID-object frame.
pub fn type_name_of(text: &str) -> Result<String, OneMicrodataError> {
    let rest = text
        .strip_prefix("<div itemscope ")
        .ok_or(OneMicrodataError::MicrodataMalformed {
            at: 0,
            reason: "record frame",
        })?;
    let rest = rest.strip_prefix(ID_OBJECT_SENTINEL).map_or(rest, |rest| {
        rest.strip_prefix(' ').unwrap_or(rest)
    });
    let rest = rest
        .strip_prefix("itemtype=\"//refin.io/")
        .ok_or(OneMicrodataError::MicrodataMalformed {
            at: 0,
            reason: "type URI",
        })?;
    let end = rest
        .find("\">")
        .ok_or(OneMicrodataError::MicrodataMalformed {
            at: 0,
            reason: "type URI",
        })?;
    Ok(rest[..end].to_owned())
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use one_common::Hash;
    use one_recipes::{Recipe, RecipeRegistry, RecipeRule, RuleValue};

    use super::*;
    use crate::{DataValue, OneObject, serialize};

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
                    name: "Note".into(),
                    rules: vec![RecipeRule::new("text", RuleValue::String { regex: None })],
                },
            ])
            .unwrap();
        registry
    }

    #[test]
    fn it_splices_identity_fields_without_reparsing() -> Result<()> {
        let registry = registry();
        let person = OneObject::new("Person")
            .with("email", DataValue::String("a@b".into()))
            .with("name", DataValue::String("Ada".into()));
        let text = serialize(&person, &registry)?;

        let frame = extract_id_object(&text, &registry)?.unwrap();
        assert_eq!(
            frame,
            "<div itemscope data-id-object=\"true\" itemtype=\"//refin.io/Person\">\
             <span itemprop=\"email\">a@b</span></div>"
        );
        assert!(is_id_object(&frame));
        assert_eq!(type_name_of(&frame)?, "Person");
        Ok(())
    }

    #[test]
    fn it_computes_the_same_id_hash_for_all_versions() -> Result<()> {
        let registry = registry();
        let v1 = OneObject::new("Person")
            .with("email", DataValue::String("a@b".into()))
            .with("name", DataValue::String("Ada".into()));
        let v2 = OneObject::new("Person")
            .with("email", DataValue::String("a@b".into()))
            .with("name", DataValue::String("Countess Ada".into()));
        let id1 = id_hash_of(&serialize(&v1, &registry)?, &registry)?.unwrap();
        let id2 = id_hash_of(&serialize(&v2, &registry)?, &registry)?.unwrap();
        assert_eq!(id1, id2);
        Ok(())
    }

    #[test]
    fn it_keeps_identity_hashes_disjoint_from_content_hashes() -> Result<()> {
        // A Person whose only present field is its identity field still
        // hashes differently from its ID object, because of the sentinel.
        let registry = registry();
        let person = OneObject::new("Person").with("email", DataValue::String("a@b".into()));
        let text = serialize(&person, &registry)?;
        let frame = extract_id_object(&text, &registry)?.unwrap();
        assert_ne!(text, frame);
        assert_ne!(
            Hash::digest(&text).as_bytes(),
            IdHash::digest(&frame).as_bytes()
        );
        Ok(())
    }

    #[test]
    fn it_returns_none_for_unversioned_types() -> Result<()> {
        let registry = registry();
        let note = OneObject::new("Note").with("text", DataValue::String("hi".into()));
        let text = serialize(&note, &registry)?;
        assert_eq!(extract_id_object(&text, &registry)?, None);
        assert_eq!(id_hash_of(&text, &registry)?, None);
        Ok(())
    }
}
