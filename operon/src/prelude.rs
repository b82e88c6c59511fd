// Copyright © 2024 Stephan Kunz

//! Public interface of operon. Typically it is sufficient to include the prelude with
//! ```use operon::prelude::*;```

// region:    --- modules
// re-exports
// used std synchronisation primitives
pub use std::sync::Arc;
// cancellation scopes
pub use tokio_util::sync::CancellationToken;

// the core surface
pub use operon_core::error::Result;
pub use operon_core::space::{
	EVENT_RELEASED, EVENT_TASK_COMPLETED, EVENT_TASK_ERROR, EVENT_TASK_STARTED,
};
pub use operon_core::{
	Error as CoreError, HostFunction, HostPromise, PlanState, SharedSpace, TaskSignal, TaskState,
	Value,
};

// the scripting surface
pub use operon_script::{
	objects, parallel_all, parallel_any, parallel_race, processes, DispatchResult, Iso, IsoPool,
	PoolConfig, PoolMode, ProcessRequest, Share, WorkItem,
};

pub use crate::config::Config;
pub use crate::error::OperonError;
pub use crate::plan::{new_plan, Plan, PlanBuilder, PlanOptions, Task, TaskCallback, TaskContext};
pub use crate::scripting::{default_installers, plan_installer, script_pool};
// endregion:  --- modules
