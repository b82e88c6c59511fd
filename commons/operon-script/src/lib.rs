// Copyright © 2024 Stephan Kunz

//! Embedded scripting substrate of `operon`

// region:		--- modules
/// Value marshaling between host and script world
pub mod bridge;
/// Concurrent dispatch of work items
pub mod dispatch;
/// Error handling
pub mod error;
/// Script globals
pub mod globals;
/// Isolate pooling
pub mod pool;
/// The process registry
pub mod process;
/// The object registry
pub mod registry;
/// Engine bootstrap and the isolate wrapper
pub mod runtime;
/// The per-execution share record
pub mod share;

// flatten the namespace
pub use dispatch::{parallel_all, parallel_any, parallel_race, DispatchMode, DispatchResult, WorkItem};
pub use error::Error;
pub use pool::{init_pool, pool, IsoPool, PoolConfig, PoolMode};
pub use process::{processes, ProcessHandle, ProcessRegistry, ProcessRequest};
pub use registry::{objects, ObjectRegistry};
pub use runtime::{init_engine, GlobalsInstaller, Iso};
pub use share::{share_data, set_share_data, Share};
// endregion:	--- modules
