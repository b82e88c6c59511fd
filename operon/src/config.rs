// Copyright © 2024 Stephan Kunz

//! The configuration data.
//!
//! A runtime configuration can be defined using json5 formated files.
//! `Config::default()` works without any file present.
//!
//! # Examples
//! ```rust,no_run
//! # use operon::config::Config;
//! # fn main() -> operon::error::Result<()> {
//! // defaults, no file needed
//! let config = Config::default();
//!
//! // use file named `filename.json5`
//! // returns an error if the file does not exist or is no valid configuration
//! let config = Config::from_file("filename.json5")?;
//! # Ok(())
//! # }
//! ```
//!
//! `Config::from_file` searches the following directories (order first to
//! last):
//!  - current working directory
//!  - `.config` directory below current working directory
//!  - `operon` below the home directory
//!  - local config directory (`Linux`: `$XDG_CONFIG_HOME/operon` or `$HOME/.config/operon`)
//!  - config directory

// region:		--- modules
use crate::error::{OperonError, Result};
use dirs::{config_dir, config_local_dir, home_dir};
use operon_script::{PoolConfig, PoolMode};
use std::{env, path::PathBuf, time::Duration};
// endregion:	--- modules

// region:		--- defaults
const fn default_status_check_interval_ms() -> u64 {
	10
}

fn default_pool_mode() -> String {
	"standard".into()
}

const fn default_min_size() -> usize {
	2
}

const fn default_max_size() -> usize {
	10
}

const fn default_heap_available_size() -> usize {
	524_288_000
}

const fn default_heap_size_limit() -> usize {
	1_518_338_048
}
// endregion:	--- defaults

// region:		--- sections
/// Plan related options.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct PlanSection {
	/// polling interval for signal acknowledgement in milliseconds
	#[serde(default = "default_status_check_interval_ms")]
	pub status_check_interval_ms: u64,
}

impl Default for PlanSection {
	fn default() -> Self {
		Self {
			status_check_interval_ms: default_status_check_interval_ms(),
		}
	}
}

/// Isolate pool related options.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct PoolSection {
	/// `standard` or `performance`
	#[serde(default = "default_pool_mode")]
	pub mode: String,
	/// idle isolates kept around under the performance policy
	#[serde(default = "default_min_size")]
	pub min_size: usize,
	/// upper bound of concurrently live isolates
	#[serde(default = "default_max_size")]
	pub max_size: usize,
	/// heap estimate above which an isolate is evicted
	#[serde(default = "default_heap_available_size")]
	pub heap_available_size: usize,
	/// hard per-isolate heap ceiling
	#[serde(default = "default_heap_size_limit")]
	pub heap_size_limit: usize,
}

impl Default for PoolSection {
	fn default() -> Self {
		Self {
			mode: default_pool_mode(),
			min_size: default_min_size(),
			max_size: default_max_size(),
			heap_available_size: default_heap_available_size(),
			heap_size_limit: default_heap_size_limit(),
		}
	}
}
// endregion:	--- sections

// region:		--- Config
/// Manages the configuration
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
	/// plan options
	#[serde(default)]
	pub plan: PlanSection,
	/// pool options
	#[serde(default)]
	pub pool: PoolSection,
}

impl Config {
	/// Create a configuration from a json5 file.
	///
	/// # Errors
	///   if the file cannot be found, read or parsed
	pub fn from_file(filename: &str) -> Result<Self> {
		let path = find_config_file(filename)?;
		let content = std::fs::read_to_string(path)?;
		json5::from_str(&content).map_err(|source| OperonError::ConfigParse(source.to_string()))
	}

	/// The plan's signal acknowledgement polling interval.
	#[must_use]
	pub const fn status_check_interval(&self) -> Duration {
		Duration::from_millis(self.plan.status_check_interval_ms)
	}

	/// The pool sizing as understood by the scripting substrate.
	///
	/// # Errors
	///   if the configured mode is unknown
	pub fn pool_config(&self) -> Result<PoolConfig> {
		let mode = match self.pool.mode.to_lowercase().as_str() {
			"standard" => PoolMode::Standard,
			"performance" => PoolMode::Performance,
			_ => return Err(OperonError::PoolMode(self.pool.mode.clone())),
		};
		Ok(PoolConfig {
			mode,
			min_size: self.pool.min_size,
			max_size: self.pool.max_size,
			heap_available_size: self.pool.heap_available_size,
			heap_size_limit: self.pool.heap_size_limit,
		})
	}
}
// endregion:	--- Config

// region:		--- utils
/// find a config file given by name
///
/// # Errors
fn find_config_file(filename: &str) -> Result<PathBuf> {
	if let Ok(cwd) = env::current_dir() {
		let path = cwd.join(filename);
		if path.is_file() {
			return Ok(path);
		}
		let path = cwd.join(".config").join(filename);
		if path.is_file() {
			return Ok(path);
		}
	}

	// handle typical config directories
	for path in [home_dir(), config_local_dir(), config_dir()]
		.into_iter()
		.flatten()
	{
		let file = path.join("operon").join(filename);
		if file.is_file() {
			return Ok(file);
		}
	}

	let text = format!("file {filename} not found");
	Err(OperonError::ConfigFile(std::io::Error::new(
		std::io::ErrorKind::NotFound,
		text,
	)))
}
// endregion:	--- utils

#[cfg(test)]
mod tests {
	use super::*;

	// check, that the auto traits are available
	const fn is_normal<T: Sized + Send + Sync>() {}

	#[test]
	const fn normal_types() {
		is_normal::<Config>();
	}

	#[test]
	fn defaults() {
		let config = Config::default();
		assert_eq!(config.status_check_interval(), Duration::from_millis(10));
		let pool = config.pool_config().expect("pool config failed");
		assert_eq!(pool.mode, PoolMode::Standard);
		assert_eq!(pool.min_size, 2);
		assert_eq!(pool.max_size, 10);
	}

	#[test]
	fn parses_json5() {
		let config: Config = json5::from_str(
			r"{
				plan: { status_check_interval_ms: 25 },
				pool: { mode: 'performance', max_size: 4 },
			}",
		)
		.expect("parse failed");
		assert_eq!(config.status_check_interval(), Duration::from_millis(25));
		let pool = config.pool_config().expect("pool config failed");
		assert_eq!(pool.mode, PoolMode::Performance);
		assert_eq!(pool.max_size, 4);
		// omitted keys keep their defaults
		assert_eq!(pool.min_size, 2);
	}

	#[test]
	fn unknown_pool_mode() {
		let config: Config = json5::from_str("{ pool: { mode: 'turbo' } }").expect("parse failed");
		assert!(config.pool_config().is_err());
	}

	#[test]
	fn missing_file() {
		assert!(Config::from_file("definitely-not-there.json5").is_err());
	}
}
