// Copyright © 2024 Stephan Kunz

// region:    --- types
/// Enables simplified usage of Result with crates Error type
pub type Result<T> = core::result::Result<T, OperonError>;
// endregion: --- types

// region:    --- Error
/// Main crate error type.
#[derive(thiserror::Error, Debug)]
pub enum OperonError {
	/// reading a configuration file failed
	#[error("could not read configuration: {0}")]
	ConfigFile(#[from] std::io::Error),
	/// parsing a configuration file failed
	#[error("could not parse configuration: {0}")]
	ConfigParse(String),
	/// an unknown pool mode was configured
	#[error("'{0}' is no pool mode")]
	PoolMode(String),
	/// plan creation or registration failed
	#[error("plan setup failed: {0}")]
	Plan(String),
}
// endregion: --- Error
