// Copyright © 2024 Stephan Kunz

//! Errors from the scripting substrate

#[doc(hidden)]
extern crate alloc;

// region:		--- modules
use alloc::string::String;
// endregion:	--- modules

// region:		--- Error
/// Scripting error type.
pub enum Error {
	/// The bridge failed to convert a value
	Marshal {
		/// what could not be converted
		message: String,
	},
	/// A script raised or received an exception
	Exception {
		/// typed code, 400 for validation, 404 for not found, 500 default
		code: u16,
		/// the exception message
		message: String,
	},
}

impl Error {
	/// Exception code used for validation failures.
	pub const VALIDATION: u16 = 400;
	/// Exception code used for missing entities.
	pub const NOT_FOUND: u16 = 404;
	/// Default exception code.
	pub const INTERNAL: u16 = 500;
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
			Self::Marshal { message } => {
				write!(f, "marshaling failed: {message}")
			}
			Self::Exception { code, message } => {
				write!(f, "exception {code}: {message}")
			}
		}
	}
}

impl core::error::Error for Error {}
// endregion:   --- boilerplate
