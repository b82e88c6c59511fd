// Copyright © 2024 Stephan Kunz

//! Core of `operon`

// region:		--- modules
/// Core enums
pub mod enums;
/// Error handling
pub mod error;
/// The shared key/value store
pub mod space;
/// Task signals
pub mod task_signal;
/// Helper functions
pub mod utils;
/// The tagged value model
pub mod value;

// flatten the namespace
pub use enums::{PlanState, TaskState};
pub use error::{Error, Result};
pub use space::{SharedSpace, SpaceCallback};
pub use task_signal::{SignalReceiver, SignalSender, TaskSignal};
pub use value::{HandleKind, HostFunction, HostPromise, ObjectHandle, PromiseState, Value};
// endregion:	--- modules
