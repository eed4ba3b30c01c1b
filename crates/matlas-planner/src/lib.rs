//! Planning for the matlas apply engine.
//!
//! The [`Planner`] matches desired resources to observed ones by natural
//! key, classifies each as Create, Update, Delete or NoOp using the
//! [`DiffEngine`], links operations into a DAG and assigns stages with
//! Kahn's algorithm. Identical inputs produce identical plans.

pub mod dag;
pub mod diff;
pub mod error;
pub mod planner;
pub mod render;

pub use dag::{assign_stages, is_topologically_consistent};
pub use diff::{diff_specs, DiffEngine};
pub use error::PlanError;
pub use planner::{PlanOptions, Planner};
pub use render::{render_diff, render_plan};
