//! Recipe Registry (spec §2 component A, §4.1): a read-only, validated
//! catalog of recipes keyed by `tool_id`.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::error::InstallError;
use crate::types::Recipe;

/// Recipe schema invariants (spec §3 R1-R4), checked once at registry
/// construction so every downstream component can assume a valid recipe.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RecipeValidationError {
    #[error("recipe {tool_id}: duplicate tool_id in registry")]
    DuplicateToolId { tool_id: String },
    #[error("recipe {tool_id}: must declare at least one install method or build_from_source (R1)")]
    NoInstallPath { tool_id: String },
    #[error("recipe {tool_id}: verify command must be non-empty (R2)")]
    EmptyVerify { tool_id: String },
    #[error("recipe {tool_id}: duplicate choice id {choice_id} (R3)")]
    DuplicateChoiceId { tool_id: String, choice_id: String },
    #[error("recipe {tool_id}: duplicate input id {input_id} (R3)")]
    DuplicateInputId { tool_id: String, input_id: String },
    #[error("recipe {tool_id}: choice {choice_id} has no enabled default and no options (R4)")]
    ChoiceHasNoOptions { tool_id: String, choice_id: String },
    #[error("recipe {tool_id}: satisfies_self requires verify to reference the tool being resolved (R4)")]
    SelfSatisfactionWithoutVerify { tool_id: String },
}

impl From<RecipeValidationError> for InstallError {
    fn from(e: RecipeValidationError) -> Self {
        InstallError::UnknownTool {
            tool: e.to_string(),
        }
    }
}

/// The read-only recipe catalog, validated once at construction (spec §4.1:
/// "Recipe Registry performs no mutation and no network access; it is a
/// pure lookup table built once at startup").
#[derive(Debug, Clone)]
pub struct RecipeRegistry {
    recipes: HashMap<String, Recipe>,
}

impl RecipeRegistry {
    /// Builds and validates a registry from a list of recipes. Fails fast
    /// on the first invariant violation found, in recipe order.
    pub fn new(recipes: Vec<Recipe>) -> Result<Self, RecipeValidationError> {
        let mut map = HashMap::with_capacity(recipes.len());
        for recipe in recipes {
            if map.contains_key(&recipe.tool_id) {
                return Err(RecipeValidationError::DuplicateToolId {
                    tool_id: recipe.tool_id,
                });
            }
            Self::validate(&recipe)?;
            map.insert(recipe.tool_id.clone(), recipe);
        }
        Ok(Self { recipes: map })
    }

    fn validate(recipe: &Recipe) -> Result<(), RecipeValidationError> {
        if recipe.install.is_empty()
            && recipe.install_variants.is_empty()
            && recipe.build_from_source.is_none()
        {
            return Err(RecipeValidationError::NoInstallPath {
                tool_id: recipe.tool_id.clone(),
            });
        }
        if recipe.verify.trim().is_empty() {
            return Err(RecipeValidationError::EmptyVerify {
                tool_id: recipe.tool_id.clone(),
            });
        }

        let mut seen_choice_ids = HashSet::new();
        for choice in &recipe.choices {
            if !seen_choice_ids.insert(choice.id.clone()) {
                return Err(RecipeValidationError::DuplicateChoiceId {
                    tool_id: recipe.tool_id.clone(),
                    choice_id: choice.id.clone(),
                });
            }
            if choice.source == crate::types::ChoiceSource::Static && choice.options.is_empty() {
                return Err(RecipeValidationError::ChoiceHasNoOptions {
                    tool_id: recipe.tool_id.clone(),
                    choice_id: choice.id.clone(),
                });
            }
        }

        let mut seen_input_ids = HashSet::new();
        for input in &recipe.inputs {
            if !seen_input_ids.insert(input.id.clone()) {
                return Err(RecipeValidationError::DuplicateInputId {
                    tool_id: recipe.tool_id.clone(),
                    input_id: input.id.clone(),
                });
            }
        }

        if recipe.satisfies_self && recipe.verify.trim().is_empty() {
            return Err(RecipeValidationError::SelfSatisfactionWithoutVerify {
                tool_id: recipe.tool_id.clone(),
            });
        }

        Ok(())
    }

    pub fn recipe_of(&self, tool_id: &str) -> Option<&Recipe> {
        self.recipes.get(tool_id)
    }

    pub fn contains(&self, tool_id: &str) -> bool {
        self.recipes.contains_key(tool_id)
    }

    pub fn all_categories(&self) -> Vec<String> {
        let mut cats: Vec<String> = self
            .recipes
            .values()
            .map(|r| r.category.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        cats.sort();
        cats
    }

    pub fn iter(&self) -> impl Iterator<Item = &Recipe> {
        self.recipes.values()
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }
}
