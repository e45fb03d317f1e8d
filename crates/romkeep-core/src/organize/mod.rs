//! Moving or copying verified files into a templated layout, with a log that
//! can undo a move.

pub mod context;
pub mod engine;
pub mod plan;
pub mod template;

pub use context::TemplateContext;
pub use engine::{OrganizeEngine, OrganizeRequest, OrganizeResult, RollbackResult};
pub use plan::{OrganizePlan, PlanItem};
pub use template::{builtin_templates, render, validate, Placeholder, TemplateStore, TemplateValidation};
