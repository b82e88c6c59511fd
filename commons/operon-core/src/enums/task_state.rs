// Copyright © 2024 Stephan Kunz

//! Lifecycle states of a task
//!

#[doc(hidden)]
extern crate alloc;

// region:		--- modules
use crate::error::Error;
use alloc::{boxed::Box, string::ToString};
use core::fmt::{Debug, Display};
// endregion:	--- modules

// region:		--- TaskState
/// The possible states a task can take
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum TaskState {
	/// Task is in initial state
	#[default]
	Created,
	/// Task is executed by a worker of its wave
	Running,
	/// Task acknowledged a pause signal
	Paused,
	/// Task finished without error
	Completed,
	/// Task returned an error
	Failed,
}

impl TaskState {
	/// Terminal states are absorbing.
	#[must_use]
	pub const fn is_terminal(&self) -> bool {
		matches!(self, Self::Completed | Self::Failed)
	}
}

impl TryFrom<&str> for TaskState {
	type Error = Box<dyn core::error::Error + Send + Sync + 'static>;

	fn try_from(
		value: &str,
	) -> core::result::Result<Self, Box<dyn core::error::Error + Send + Sync + 'static>> {
		let v = value.to_lowercase();
		match v.as_str() {
			"created" => Ok(Self::Created),
			"running" => Ok(Self::Running),
			"paused" => Ok(Self::Paused),
			"completed" => Ok(Self::Completed),
			"failed" => Ok(Self::Failed),
			_ => Err(Error::UnknownState {
				state: value.to_string(),
			}
			.into()),
		}
	}
}

impl Display for TaskState {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		match self {
			Self::Created => write!(f, "Created"),
			Self::Running => write!(f, "Running"),
			Self::Paused => write!(f, "Paused"),
			Self::Completed => write!(f, "Completed"),
			Self::Failed => write!(f, "Failed"),
		}
	}
}
// endregion:	--- TaskState
