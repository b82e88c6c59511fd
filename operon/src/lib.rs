// Copyright © 2024 Stephan Kunz
#![crate_type = "lib"]
#![crate_name = "operon"]

#[doc = include_str!("../README.md")]
#[cfg(doctest)]
doc_comment::doctest!("../README.md");

// region:    --- modules
/// Configuration
pub mod config;
/// Error handling
pub mod error;
/// The plan orchestrator
pub mod plan;
/// Public interface of operon.
/// Typically it is sufficient to include the prelude with
/// `use operon::prelude::*;`
pub mod prelude;
/// Script world wiring
pub mod scripting;
// endregion: --- modules
