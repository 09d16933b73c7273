use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::{
    NestedRules, OneRecipeError, Recipe, RecipeRule, ReferencedTypes, RuleProblem, RuleValue,
};

/// Holds every recipe known to an instance.
///
/// Registration validates recipes eagerly; inherited rule sets are resolved
/// lazily on first lookup and cached. The registry is populated once at
/// startup (each module contributes a list of recipes) and read-mostly
/// afterwards.
#[derive(Default)]
pub struct RecipeRegistry {
    recipes: RwLock<BTreeMap<String, Arc<Recipe>>>,
    resolved: RwLock<HashMap<(String, String), Arc<Vec<RecipeRule>>>>,
}

impl RecipeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a single recipe.
    pub fn register(&self, recipe: Recipe) -> Result<(), OneRecipeError> {
        self.register_all(vec![recipe])
    }

    /// Registers a batch of recipes.
    ///
    /// Recipes inside one batch may reference each other freely (the object
    /// graph is allowed to be cyclic through references), so validation runs
    /// against the union of already registered names and the batch itself.
    /// Nothing is registered unless the whole batch validates.
    pub fn register_all(&self, batch: Vec<Recipe>) -> Result<(), OneRecipeError> {
        let mut known: BTreeSet<String> =
            self.recipes.read().keys().cloned().collect();
        for recipe in &batch {
            if !known.insert(recipe.name.clone()) {
                return Err(OneRecipeError::DuplicateRecipe {
                    name: recipe.name.clone(),
                });
            }
        }

        let batch_by_name: BTreeMap<&str, &Recipe> =
            batch.iter().map(|recipe| (recipe.name.as_str(), recipe)).collect();
        for recipe in &batch {
            validate_recipe(recipe, &known)?;
            let mut stack = vec![recipe.name.clone()];
            check_nested_cycles(recipe, &recipe.rules, &mut stack, &batch_by_name, self)?;
        }

        let mut recipes = self.recipes.write();
        for recipe in batch {
            recipes.insert(recipe.name.clone(), Arc::new(recipe));
        }
        // Inherited rule sets may now resolve differently.
        self.resolved.write().clear();
        Ok(())
    }

    /// Whether a recipe with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.recipes.read().contains_key(name)
    }

    /// Looks up a recipe by name.
    pub fn get(&self, name: &str) -> Result<Arc<Recipe>, OneRecipeError> {
        self.recipes
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| OneRecipeError::UnknownRecipe {
                name: name.to_owned(),
            })
    }

    /// Whether objects of the named recipe carry an identity.
    pub fn is_versioned(&self, name: &str) -> Result<bool, OneRecipeError> {
        Ok(self.get(name)?.is_versioned())
    }

    /// The identity rules of the named recipe, in rule order.
    pub fn id_rules(&self, name: &str) -> Result<Vec<RecipeRule>, OneRecipeError> {
        Ok(self.get(name)?.id_rules().cloned().collect())
    }

    /// The registered recipe names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.recipes.read().keys().cloned().collect()
    }

    /// The rule set in effect at a dotted itemprop path.
    ///
    /// The empty path addresses the recipe's top-level rules; `"a.b"`
    /// addresses the rules of the nested object at `a.b`, following
    /// `Inherit` indirections through other recipes.
    pub fn rules_at(
        &self,
        recipe: &str,
        path: &str,
    ) -> Result<Arc<Vec<RecipeRule>>, OneRecipeError> {
        let mut visited = Vec::new();
        self.resolve_rules(recipe, path, &mut visited)
    }

    /// The single rule addressed by a dotted itemprop path.
    pub fn resolve_rule(&self, recipe: &str, path: &str) -> Result<RecipeRule, OneRecipeError> {
        let not_found = || OneRecipeError::RuleNotFound {
            recipe: recipe.to_owned(),
            path: path.to_owned(),
        };
        let (parent, leaf) = match path.rsplit_once('.') {
            Some((parent, leaf)) => (parent, leaf),
            None => ("", path),
        };
        if leaf.is_empty() {
            return Err(not_found());
        }
        let rules = self.rules_at(recipe, parent)?;
        rules
            .iter()
            .find(|rule| rule.itemprop == leaf)
            .cloned()
            .ok_or_else(not_found)
    }

    fn resolve_rules(
        &self,
        recipe: &str,
        path: &str,
        visited: &mut Vec<(String, String)>,
    ) -> Result<Arc<Vec<RecipeRule>>, OneRecipeError> {
        let key = (recipe.to_owned(), path.to_owned());
        if visited.contains(&key) {
            return Err(OneRecipeError::InheritanceCycle {
                recipe: recipe.to_owned(),
                path: path.to_owned(),
            });
        }
        if let Some(hit) = self.resolved.read().get(&key) {
            return Ok(Arc::clone(hit));
        }
        visited.push(key.clone());

        let not_found = || OneRecipeError::RuleNotFound {
            recipe: recipe.to_owned(),
            path: path.to_owned(),
        };
        let mut current = Arc::new(self.get(recipe)?.rules.clone());
        for segment in path.split('.').filter(|segment| !segment.is_empty()) {
            let rule = current
                .iter()
                .find(|rule| rule.itemprop == segment)
                .ok_or_else(not_found)?;
            match unwrap_collections(&rule.value) {
                RuleValue::Object(NestedRules::Inline(rules)) => {
                    current = Arc::new(rules.clone());
                }
                RuleValue::Object(NestedRules::Inherit(target)) => {
                    let (target_recipe, target_path) = split_inherit(target);
                    current = self.resolve_rules(target_recipe, target_path, visited)?;
                }
                _ => return Err(not_found()),
            }
        }

        visited.pop();
        self.resolved.write().insert(key, Arc::clone(&current));
        Ok(current)
    }
}

/// Splits an inherit target into recipe name and dotted path inside it.
fn split_inherit(target: &str) -> (&str, &str) {
    match target.split_once('.') {
        Some((recipe, path)) => (recipe, path),
        None => (target, ""),
    }
}

/// Peels collection layers off a rule value, down to the element type.
fn unwrap_collections(value: &RuleValue) -> &RuleValue {
    match value {
        RuleValue::Bag(inner)
        | RuleValue::Set(inner)
        | RuleValue::Array(inner)
        | RuleValue::Map(inner) => unwrap_collections(inner),
        other => other,
    }
}

fn validate_recipe(recipe: &Recipe, known: &BTreeSet<String>) -> Result<(), OneRecipeError> {
    let invalid = |itemprop: Option<&str>, problem: RuleProblem| OneRecipeError::RecipeInvalid {
        recipe: recipe.name.clone(),
        itemprop: itemprop.map(str::to_owned),
        problem,
    };

    if recipe.name.is_empty()
        || !recipe
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(invalid(None, RuleProblem::BadRecipeName));
    }
    validate_rules(recipe, &recipe.rules, true, known)
}

fn validate_rules(
    recipe: &Recipe,
    rules: &[RecipeRule],
    top_level: bool,
    known: &BTreeSet<String>,
) -> Result<(), OneRecipeError> {
    let invalid = |itemprop: &str, problem: RuleProblem| OneRecipeError::RecipeInvalid {
        recipe: recipe.name.clone(),
        itemprop: Some(itemprop.to_owned()),
        problem,
    };

    let mut seen = BTreeSet::new();
    for rule in rules {
        if rule.itemprop.is_empty()
            || rule
                .itemprop
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '.' | '"' | '<' | '>'))
        {
            return Err(invalid(&rule.itemprop, RuleProblem::BadItemprop));
        }
        if !seen.insert(rule.itemprop.as_str()) {
            return Err(invalid(&rule.itemprop, RuleProblem::DuplicateItemprop));
        }
        if rule.is_id && !top_level {
            return Err(invalid(&rule.itemprop, RuleProblem::IdentityInNestedRule));
        }
        validate_value(recipe, &rule.itemprop, &rule.value, known)?;
    }
    Ok(())
}

fn validate_value(
    recipe: &Recipe,
    itemprop: &str,
    value: &RuleValue,
    known: &BTreeSet<String>,
) -> Result<(), OneRecipeError> {
    let invalid = |problem: RuleProblem| OneRecipeError::RecipeInvalid {
        recipe: recipe.name.clone(),
        itemprop: Some(itemprop.to_owned()),
        problem,
    };

    match value {
        RuleValue::String { regex: Some(regex) } => {
            regex::Regex::new(regex).map_err(|_| invalid(RuleProblem::BadRegex))?;
        }
        RuleValue::String { regex: None }
        | RuleValue::Boolean
        | RuleValue::Stringifiable
        | RuleValue::ReferenceToBlob
        | RuleValue::ReferenceToClob => {}
        RuleValue::Integer { min, max } => {
            if let (Some(min), Some(max)) = (min, max)
                && min > max
            {
                return Err(invalid(RuleProblem::MinAboveMax));
            }
        }
        RuleValue::Number { min, max } => {
            if let (Some(min), Some(max)) = (min, max)
                && min > max
            {
                return Err(invalid(RuleProblem::MinAboveMax));
            }
        }
        RuleValue::ReferenceToObject { allowed } | RuleValue::ReferenceToId { allowed } => {
            if let ReferencedTypes::Types(types) = allowed {
                for name in types {
                    if !known.contains(name) {
                        return Err(invalid(RuleProblem::UnknownReferencedType(name.clone())));
                    }
                }
            }
        }
        RuleValue::Bag(inner)
        | RuleValue::Set(inner)
        | RuleValue::Array(inner)
        | RuleValue::Map(inner) => {
            validate_value(recipe, itemprop, inner, known)?;
        }
        RuleValue::Object(NestedRules::Inline(rules)) => {
            validate_rules(recipe, rules, false, known)?;
        }
        RuleValue::Object(NestedRules::Inherit(target)) => {
            let (target_recipe, _) = split_inherit(target);
            if !known.contains(target_recipe) {
                return Err(invalid(RuleProblem::UnknownInheritedRecipe(
                    target_recipe.to_owned(),
                )));
            }
        }
    }
    Ok(())
}

/// Walks the nested structure of a recipe under registration, following
/// inherited rule sets, and rejects paths that re-enter a recipe already
/// being expanded.
fn check_nested_cycles(
    recipe: &Recipe,
    rules: &[RecipeRule],
    stack: &mut Vec<String>,
    batch: &BTreeMap<&str, &Recipe>,
    registry: &RecipeRegistry,
) -> Result<(), OneRecipeError> {
    for rule in rules {
        check_nested_cycles_value(recipe, &rule.value, stack, batch, registry)?;
    }
    Ok(())
}

fn check_nested_cycles_value(
    recipe: &Recipe,
    value: &RuleValue,
    stack: &mut Vec<String>,
    batch: &BTreeMap<&str, &Recipe>,
    registry: &RecipeRegistry,
) -> Result<(), OneRecipeError> {
    match value {
        RuleValue::Bag(inner)
        | RuleValue::Set(inner)
        | RuleValue::Array(inner)
        | RuleValue::Map(inner) => check_nested_cycles_value(recipe, inner, stack, batch, registry),
        RuleValue::Object(NestedRules::Inline(rules)) => {
            check_nested_cycles(recipe, rules, stack, batch, registry)
        }
        RuleValue::Object(NestedRules::Inherit(target)) => {
            let (target_recipe, target_path) = split_inherit(target);
            if stack.iter().any(|name| name == target_recipe) {
                return Err(OneRecipeError::NestedCycle {
                    recipe: stack[0].clone(),
                    via: target_recipe.to_owned(),
                });
            }
            let inherited = match batch.get(target_recipe) {
                Some(recipe) => Arc::new((*recipe).clone()),
                None => registry.get(target_recipe)?,
            };
            // Navigate the dotted path inside the inherited recipe; a dead
            // end here is reported at resolve time, not registration time.
            let mut current = inherited.rules.clone();
            for segment in target_path.split('.').filter(|segment| !segment.is_empty()) {
                let Some(rule) = current.iter().find(|rule| rule.itemprop == segment) else {
                    return Ok(());
                };
                match unwrap_collections(&rule.value) {
                    RuleValue::Object(NestedRules::Inline(rules)) => current = rules.clone(),
                    _ => return Ok(()),
                }
            }
            stack.push(target_recipe.to_owned());
            check_nested_cycles(recipe, &current, stack, batch, registry)?;
            stack.pop();
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;
    use crate::{NestedRules, Recipe, RecipeRule, ReferencedTypes, RuleValue};

    fn string_rule(itemprop: &str) -> RecipeRule {
        RecipeRule::new(itemprop, RuleValue::String { regex: None })
    }

    #[test]
    fn it_registers_and_reports_versionedness() -> Result<()> {
        let registry = RecipeRegistry::new();
        registry.register_all(vec![
            Recipe {
                name: "Person".into(),
                rules: vec![string_rule("email").id(), string_rule("name").optional()],
            },
            Recipe {
                name: "Ping".into(),
                rules: vec![RecipeRule::new(
                    "n",
                    RuleValue::Integer {
                        min: None,
                        max: None,
                    },
                )],
            },
        ])?;

        assert!(registry.is_versioned("Person")?);
        assert!(!registry.is_versioned("Ping")?);
        assert_eq!(registry.id_rules("Person")?.len(), 1);
        Ok(())
    }

    #[test]
    fn it_rejects_duplicate_names() -> Result<()> {
        let registry = RecipeRegistry::new();
        registry.register(Recipe {
            name: "Thing".into(),
            rules: vec![string_rule("a")],
        })?;

        let error = registry
            .register(Recipe {
                name: "Thing".into(),
                rules: vec![string_rule("b")],
            })
            .unwrap_err();
        assert_eq!(error.code(), "DuplicateRecipe");
        Ok(())
    }

    #[test]
    fn it_rejects_identity_rules_below_the_top_level() {
        let registry = RecipeRegistry::new();
        let error = registry
            .register(Recipe {
                name: "Bad".into(),
                rules: vec![RecipeRule::new(
                    "nested",
                    RuleValue::Object(NestedRules::Inline(vec![string_rule("inner").id()])),
                )],
            })
            .unwrap_err();
        assert_eq!(error.code(), "RecipeInvalid");
    }

    #[test]
    fn it_rejects_bad_regexes_and_inverted_bounds() {
        let registry = RecipeRegistry::new();
        assert_eq!(
            registry
                .register(Recipe {
                    name: "BadRegex".into(),
                    rules: vec![RecipeRule::new(
                        "s",
                        RuleValue::String {
                            regex: Some("(unclosed".into()),
                        },
                    )],
                })
                .unwrap_err()
                .code(),
            "RecipeInvalid"
        );
        assert_eq!(
            registry
                .register(Recipe {
                    name: "BadBounds".into(),
                    rules: vec![RecipeRule::new(
                        "n",
                        RuleValue::Integer {
                            min: Some(10),
                            max: Some(1),
                        },
                    )],
                })
                .unwrap_err()
                .code(),
            "RecipeInvalid"
        );
    }

    #[test]
    fn it_rejects_references_to_unknown_types() {
        let registry = RecipeRegistry::new();
        let error = registry
            .register(Recipe {
                name: "Referrer".into(),
                rules: vec![RecipeRule::new(
                    "target",
                    RuleValue::ReferenceToObject {
                        allowed: ReferencedTypes::of(["Missing"]),
                    },
                )],
            })
            .unwrap_err();
        assert_eq!(error.code(), "RecipeInvalid");
    }

    #[test]
    fn it_allows_reference_cycles_within_a_batch() -> Result<()> {
        let registry = RecipeRegistry::new();
        registry.register_all(vec![
            Recipe {
                name: "A".into(),
                rules: vec![RecipeRule::new(
                    "b",
                    RuleValue::ReferenceToObject {
                        allowed: ReferencedTypes::of(["B"]),
                    },
                )],
            },
            Recipe {
                name: "B".into(),
                rules: vec![RecipeRule::new(
                    "a",
                    RuleValue::ReferenceToObject {
                        allowed: ReferencedTypes::of(["A"]),
                    },
                )],
            },
        ])?;
        Ok(())
    }

    #[test]
    fn it_resolves_inherited_rules_through_dotted_paths() -> Result<()> {
        let registry = RecipeRegistry::new();
        registry.register_all(vec![
            Recipe {
                name: "Address".into(),
                rules: vec![string_rule("street"), string_rule("city")],
            },
            Recipe {
                name: "Person".into(),
                rules: vec![
                    string_rule("email").id(),
                    RecipeRule::new(
                        "home",
                        RuleValue::Object(NestedRules::Inherit("Address".into())),
                    ),
                ],
            },
        ])?;

        let rule = registry.resolve_rule("Person", "home.city")?;
        assert_eq!(rule.itemprop, "city");
        // Second lookup is served from the cache.
        let rule = registry.resolve_rule("Person", "home.street")?;
        assert_eq!(rule.itemprop, "street");

        let error = registry.resolve_rule("Person", "home.country").unwrap_err();
        assert_eq!(error.code(), "RuleNotFound");
        Ok(())
    }

    #[test]
    fn it_detects_nested_cycles_through_inheritance() -> Result<()> {
        let registry = RecipeRegistry::new();
        let error = registry
            .register_all(vec![
                Recipe {
                    name: "Left".into(),
                    rules: vec![RecipeRule::new(
                        "right",
                        RuleValue::Object(NestedRules::Inherit("Right".into())),
                    )],
                },
                Recipe {
                    name: "Right".into(),
                    rules: vec![RecipeRule::new(
                        "left",
                        RuleValue::Object(NestedRules::Inherit("Left".into())),
                    )],
                },
            ])
            .unwrap_err();
        assert_eq!(error.code(), "NestedCycle");
        Ok(())
    }

    #[test]
    fn it_rejects_self_inheritance_at_registration() -> Result<()> {
        let registry = RecipeRegistry::new();
        let error = registry
            .register(Recipe {
                name: "Selfish".into(),
                rules: vec![RecipeRule::new(
                    "me",
                    RuleValue::Object(NestedRules::Inherit("Selfish".into())),
                )],
            })
            .unwrap_err();
        assert_eq!(error.code(), "NestedCycle");
        Ok(())
    }
}
