use serde_json::{Map, Value};

use crate::{ID_OBJECT_SENTINEL, OneMicrodataError, Scanner, unescape};

/// Converts canonical text straight to JSON without consulting recipes and
/// without building a [`crate::OneObject`].
///
/// Scalars come out as strings (the recipe is what knows a field is an
/// integer), references come out as their hex address, collections as
/// arrays, maps and nested objects as JSON objects. The record's type is
/// placed under `"$type"`.
pub fn to_json(text: &str) -> Result<Value, OneMicrodataError> {
    let mut scanner = Scanner::new(text);
    scanner.expect("<div itemscope ")?;
    if scanner.peek(ID_OBJECT_SENTINEL) {
        scanner.expect_exact(ID_OBJECT_SENTINEL, "id-object sentinel")?;
        scanner.expect(" ")?;
    }
    scanner.expect("itemtype=\"//refin.io/")?;
    let type_name = scanner.take_until("\">")?.to_owned();

    let mut fields = Map::new();
    fields.insert("$type".to_owned(), Value::String(type_name));
    parse_json_fields(&mut scanner, &mut fields)?;
    scanner.expect("</div>")?;
    if !scanner.at_end() {
        return Err(OneMicrodataError::TrailingInput { at: scanner.pos });
    }
    Ok(Value::Object(fields))
}

fn parse_json_fields(
    scanner: &mut Scanner<'_>,
    fields: &mut Map<String, Value>,
) -> Result<(), OneMicrodataError> {
    while !scanner.peek("</") {
        let tag = scanner.open_tag()?;
        let itemprop = tag
            .attr("itemprop")
            .ok_or_else(|| scanner.err("itemprop attribute"))?
            .to_owned();
        let value = parse_json_value(scanner)?;
        fields.insert(itemprop, value);
    }
    Ok(())
}

/// Parses one element generically, dispatching on its tag name.
fn parse_json_value(scanner: &mut Scanner<'_>) -> Result<Value, OneMicrodataError> {
    let tag = scanner.open_tag()?;
    match tag.name {
        "span" => {
            scanner.pos = tag.end;
            let raw = scanner.take_until("</span>")?;
            Ok(Value::String(unescape(raw)))
        }
        "a" => {
            let href = tag
                .attr("href")
                .ok_or_else(|| scanner.err("href attribute"))?
                .to_owned();
            scanner.pos = tag.end;
            scanner.expect("</a>")?;
            Ok(Value::String(href))
        }
        "ol" => {
            scanner.pos = tag.end;
            let mut items = Vec::new();
            while scanner.peek("<li>") {
                scanner.expect("<li>")?;
                let item = if scanner.peek("<") {
                    let item = parse_json_value(scanner)?;
                    scanner.expect("</li>")?;
                    item
                } else {
                    Value::String(unescape(scanner.take_until("</li>")?))
                };
                items.push(item);
            }
            scanner.expect("</ol>")?;
            Ok(Value::Array(items))
        }
        "dl" => {
            scanner.pos = tag.end;
            let mut entries = Map::new();
            while scanner.peek("<dt>") {
                scanner.expect("<dt>")?;
                let key = unescape(scanner.take_until("</dt>")?);
                scanner.expect("<dd>")?;
                let value = if scanner.peek("<") {
                    let value = parse_json_value(scanner)?;
                    scanner.expect("</dd>")?;
                    value
                } else {
                    Value::String(unescape(scanner.take_until("</dd>")?))
                };
                entries.insert(key, value);
            }
            scanner.expect("</dl>")?;
            Ok(Value::Object(entries))
        }
        "div" => {
            scanner.pos = tag.end;
            let mut fields = Map::new();
            parse_json_fields(scanner, &mut fields)?;
            scanner.expect("</div>")?;
            Ok(Value::Object(fields))
        }
        _ => Err(scanner.err("known element")),
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use one_recipes::{Recipe, RecipeRegistry, RecipeRule, RuleValue};
    use serde_json::json;

    use super::*;
    use crate::{DataValue, OneObject, serialize};

    #[test]
    fn it_converts_canonical_text_to_json_without_recipes() -> Result<()> {
        let registry = RecipeRegistry::new();
        registry.register(Recipe {
            name: "Sample".into(),
            rules: vec![
                RecipeRule::new("title", RuleValue::String { regex: None }),
                RecipeRule::new(
                    "tags",
                    RuleValue::Bag(Box::new(RuleValue::String { regex: None })),
                ),
            ],
        })?;
        let object = OneObject::new("Sample")
            .with("title", DataValue::String("a & b".into()))
            .with(
                "tags",
                DataValue::Collection(vec![
                    DataValue::String("x".into()),
                    DataValue::String("y".into()),
                ]),
            );
        let text = serialize(&object, &registry)?;

        let value = to_json(&text)?;
        assert_eq!(
            value,
            json!({"$type": "Sample", "title": "a & b", "tags": ["x", "y"]})
        );
        Ok(())
    }
}
