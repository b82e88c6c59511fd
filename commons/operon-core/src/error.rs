// Copyright © 2024 Stephan Kunz

//! The `operon` core error enum `Error` together with a
//! type alias for [`core::result::Result`] to write only `Result<T>`.
//!

#[doc(hidden)]
extern crate alloc;

// region:		--- modules
use alloc::{boxed::Box, string::String};
use core::time::Duration;
// endregion:	--- modules

// region:		--- types
/// Result type alias.
pub type Result<T> = core::result::Result<T, Box<dyn core::error::Error + Send + Sync + 'static>>;
// endregion:	--- types

// region:		--- Error
/// Core error type.
pub enum Error {
	/// an argument has the wrong type or shape
	Validation {
		/// what was wrong with the argument
		message: String,
	},
	/// a named entity does not exist
	NotFound {
		/// kind of the missing entity
		what: &'static str,
		/// identifier of the missing entity
		id: String,
	},
	/// a named entity already exists
	Duplicate {
		/// kind of the colliding entity
		what: &'static str,
		/// identifier of the colliding entity
		id: String,
	},
	/// an operation was requested in an illegal lifecycle state
	State {
		/// the requested operation
		operation: &'static str,
		/// the state the entity was in
		state: String,
	},
	/// a cancellation scope was cancelled
	Cancelled {
		/// the cancellation cause
		cause: String,
	},
	/// a user work function failed
	Worker {
		/// the original error, surfaced verbatim
		source: Box<dyn core::error::Error + Send + Sync>,
	},
	/// a worker panicked behind a panic barrier
	Panic {
		/// the recovered panic payload
		message: String,
	},
	/// a deadline was exceeded
	Timeout {
		/// how long was waited
		waited: Duration,
	},
	/// an unknown lifecycle state name was given
	UnknownState {
		/// name of the state
		state: String,
	},
}
// region:		--- Error

// region:      --- boilerplate
impl core::fmt::Display for Error {
	fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
		write!(fmt, "{self:?}")
	}
}

impl core::fmt::Debug for Error {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		match self {
			Self::Validation { message } => {
				write!(f, "invalid argument: {message}")
			}
			Self::NotFound { what, id } => {
				write!(f, "the {what} '{id}' was not found")
			}
			Self::Duplicate { what, id } => {
				write!(f, "a {what} '{id}' already exists")
			}
			Self::State { operation, state } => {
				write!(f, "operation '{operation}' is not allowed in state {state}")
			}
			Self::Cancelled { cause } => {
				write!(f, "operation was cancelled: {cause}")
			}
			Self::Worker { source } => {
				write!(f, "worker failed: reason {source}")
			}
			Self::Panic { message } => {
				write!(f, "worker panicked: {message}")
			}
			Self::Timeout { waited } => {
				write!(f, "deadline exceeded after {waited:?}")
			}
			Self::UnknownState { state } => {
				write!(f, "the state {state} is unknown")
			}
		}
	}
}

impl core::error::Error for Error {
	fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
		match *self {
			Self::Worker { ref source } => Some(source.as_ref()),
			Self::Validation { .. }
			| Self::NotFound { .. }
			| Self::Duplicate { .. }
			| Self::State { .. }
			| Self::Cancelled { .. }
			| Self::Panic { .. }
			| Self::Timeout { .. }
			| Self::UnknownState { .. } => None,
		}
	}
}
// endregion:   --- boilerplate

#[cfg(test)]
mod tests {
	use super::*;

	// check, that the auto traits are available
	const fn is_normal<T: Sized + Send + Sync>() {}

	#[test]
	const fn normal_types() {
		is_normal::<Error>();
	}

	#[test]
	fn display() {
		let error = Error::NotFound {
			what: "task",
			id: "t1".into(),
		};
		assert_eq!(error.to_string(), "the task 't1' was not found");
	}
}
