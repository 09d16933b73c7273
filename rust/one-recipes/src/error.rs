use thiserror::Error;

/// The specific defect found in a recipe rule during registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleProblem {
    /// The recipe name is empty or contains characters that cannot appear in
    /// a type URI.
    BadRecipeName,
    /// The itemprop is empty or contains characters that cannot appear in
    /// the canonical text.
    BadItemprop,
    /// Two rules share the same itemprop.
    DuplicateItemprop,
    /// An identity flag appears on a rule below the top level.
    IdentityInNestedRule,
    /// The rule's regex does not compile.
    BadRegex,
    /// The rule's minimum exceeds its maximum.
    MinAboveMax,
    /// The rule references a type that is neither registered nor declared
    /// "any".
    UnknownReferencedType(String),
    /// The rule inherits from a recipe that is not registered.
    UnknownInheritedRecipe(String),
}

/// Errors produced by the recipe registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OneRecipeError {
    /// A recipe failed validation during registration.
    #[error("recipe {recipe:?}, rule {itemprop:?}: {problem:?}")]
    RecipeInvalid {
        /// The recipe under registration.
        recipe: String,
        /// The offending rule, when the defect is rule-scoped.
        itemprop: Option<String>,
        /// What exactly is wrong.
        problem: RuleProblem,
    },

    /// A recipe with this name is already registered.
    #[error("recipe {name:?} is already registered")]
    DuplicateRecipe {
        /// The colliding name.
        name: String,
    },

    /// No recipe with this name is registered.
    #[error("recipe {name:?} is not registered")]
    UnknownRecipe {
        /// The missing name.
        name: String,
    },

    /// No rule exists at the given dotted path.
    #[error("recipe {recipe:?} has no rule at path {path:?}")]
    RuleNotFound {
        /// The recipe searched.
        recipe: String,
        /// The dotted itemprop path.
        path: String,
    },

    /// Resolving inherited rules revisited a recipe already on the
    /// resolution path.
    #[error("inheritance cycle while resolving {recipe:?} at {path:?}")]
    InheritanceCycle {
        /// The recipe whose resolution looped.
        recipe: String,
        /// The dotted path at which the loop closed.
        path: String,
    },

    /// A recipe's nested rules loop back into themselves through
    /// inheritance.
    #[error("nested rules of {recipe:?} cycle through {via:?}")]
    NestedCycle {
        /// The recipe under registration.
        recipe: String,
        /// The recipe through which the cycle closes.
        via: String,
    },
}

impl OneRecipeError {
    /// The stable short code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            OneRecipeError::RecipeInvalid { .. } => "RecipeInvalid",
            OneRecipeError::DuplicateRecipe { .. } => "DuplicateRecipe",
            OneRecipeError::UnknownRecipe { .. } => "RecipeInvalid",
            OneRecipeError::RuleNotFound { .. } => "RuleNotFound",
            OneRecipeError::InheritanceCycle { .. } => "InheritanceCycle",
            OneRecipeError::NestedCycle { .. } => "NestedCycle",
        }
    }
}
