#![warn(missing_docs)]

//! The recipe system: per-type validation rules for every record the
//! substrate stores.
//!
//! A [`Recipe`] names a type and lists one [`RecipeRule`] per field. The
//! [`RecipeRegistry`] holds all recipes known to an instance, validates them
//! on registration and answers rule lookups (including lazy, cached
//! resolution of rules inherited from other recipes).
//!
//! ```rust
//! use one_recipes::{Recipe, RecipeRegistry, RecipeRule, RuleValue};
//!
//! let registry = RecipeRegistry::new();
//! registry.register(Recipe {
//!     name: "Ping".into(),
//!     rules: vec![RecipeRule::new("n", RuleValue::Integer { min: None, max: None })],
//! }).unwrap();
//! assert!(!registry.is_versioned("Ping").unwrap());
//! ```

mod error;
pub use error::*;

mod recipe;
pub use recipe::*;

mod registry;
pub use registry::*;
