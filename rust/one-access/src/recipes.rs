use one_objects::ReverseMapConfig;
use one_recipes::{Recipe, RecipeRule, ReferencedTypes, RuleValue};

/// The recipes of the access layer: `Person`, `Group`, `Access` and
/// `IdAccess`.
pub fn access_recipes() -> Vec<Recipe> {
    let person_list = || {
        RecipeRule::new(
            "person",
            RuleValue::Set(Box::new(RuleValue::ReferenceToId {
                allowed: ReferencedTypes::of(["Person"]),
            })),
        )
        .optional()
    };
    let group_list = || {
        RecipeRule::new(
            "group",
            RuleValue::Set(Box::new(RuleValue::ReferenceToId {
                allowed: ReferencedTypes::of(["Group"]),
            })),
        )
        .optional()
    };

    vec![
        Recipe {
            name: "Person".into(),
            rules: vec![
                RecipeRule::new("email", RuleValue::String { regex: None }).id(),
                RecipeRule::new("name", RuleValue::String { regex: None }).optional(),
            ],
        },
        Recipe {
            name: "Group".into(),
            rules: vec![
                RecipeRule::new("name", RuleValue::String { regex: None }).id(),
                person_list(),
            ],
        },
        Recipe {
            name: "Access".into(),
            rules: vec![
                RecipeRule::new(
                    "object",
                    RuleValue::ReferenceToObject {
                        allowed: ReferencedTypes::Any,
                    },
                ),
                person_list(),
                group_list(),
            ],
        },
        Recipe {
            name: "IdAccess".into(),
            rules: vec![
                RecipeRule::new(
                    "id",
                    RuleValue::ReferenceToId {
                        allowed: ReferencedTypes::Any,
                    },
                ),
                person_list(),
                group_list(),
            ],
        },
    ]
}

/// Adds the reverse-map entries grant evaluation depends on.
pub fn enable_access_reverse_maps(config: ReverseMapConfig) -> ReverseMapConfig {
    config
        .enable("Access", "object")
        .enable_id("IdAccess", "id")
}
