// Copyright © 2024 Stephan Kunz

//! Lifecycle states of a plan
//!

#[doc(hidden)]
extern crate alloc;

// region:		--- modules
use crate::error::Error;
use alloc::{boxed::Box, string::ToString};
use core::fmt::{Debug, Display};
// endregion:	--- modules

// region:		--- PlanState
/// The possible states a plan can take
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum PlanState {
	/// Plan is in initial state
	#[default]
	Created,
	/// Plan is executing its waves
	Running,
	/// All running tasks acknowledged a pause request
	Paused,
	/// Every wave drained without error
	Completed,
	/// A wave surfaced an error or the scope was cancelled
	Failed,
	/// Plan was stopped and must not be used again
	Destroyed,
	/// State could not be determined
	Unknown,
}

impl PlanState {
	/// Terminal states are absorbing.
	#[must_use]
	pub const fn is_terminal(&self) -> bool {
		matches!(self, Self::Completed | Self::Failed | Self::Destroyed)
	}
}

impl TryFrom<&str> for PlanState {
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
			"destroyed" => Ok(Self::Destroyed),
			"unknown" => Ok(Self::Unknown),
			_ => Err(Error::UnknownState {
				state: value.to_string(),
			}
			.into()),
		}
	}
}

impl Display for PlanState {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		match self {
			Self::Created => write!(f, "Created"),
			Self::Running => write!(f, "Running"),
			Self::Paused => write!(f, "Paused"),
			Self::Completed => write!(f, "Completed"),
			Self::Failed => write!(f, "Failed"),
			Self::Destroyed => write!(f, "Destroyed"),
			Self::Unknown => write!(f, "Unknown"),
		}
	}
}
// endregion:	--- PlanState

#[cfg(test)]
mod tests {
	use super::*;

	// check, that the auto traits are available
	const fn is_normal<T: Sized + Send + Sync>() {}

	#[test]
	const fn normal_types() {
		is_normal::<PlanState>();
	}

	#[test]
	fn conversion() {
		assert_eq!(PlanState::try_from("running").ok(), Some(PlanState::Running));
		assert_eq!(PlanState::try_from("Destroyed").ok(), Some(PlanState::Destroyed));
		assert!(PlanState::try_from("sleeping").is_err());
	}

	#[test]
	fn terminal() {
		assert!(!PlanState::Created.is_terminal());
		assert!(!PlanState::Running.is_terminal());
		assert!(!PlanState::Paused.is_terminal());
		assert!(PlanState::Completed.is_terminal());
		assert!(PlanState::Failed.is_terminal());
		assert!(PlanState::Destroyed.is_terminal());
	}
}
