//! Shared data model and recipe registry for the install planner/executor.
//!
//! This crate owns the types every other `installer-*` crate depends on
//! (`Recipe`, `SystemProfile`, `Plan`, `Step`, `PlanState`, ...) plus the
//! read-only `RecipeRegistry` lookup. It has no process, filesystem, or
//! network side effects.

pub mod error;
pub mod registry;
pub mod types;

pub use error::InstallError;
pub use registry::{RecipeRegistry, RecipeValidationError};
pub use types::*;
