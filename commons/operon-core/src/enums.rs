// Copyright © 2024 Stephan Kunz

//! Core enums of `operon`
//!

// region:		--- modules
/// Lifecycle states of a plan
pub mod plan_state;
/// Lifecycle states of a task
pub mod task_state;

pub use plan_state::PlanState;
pub use task_state::TaskState;
// endregion:	--- modules
