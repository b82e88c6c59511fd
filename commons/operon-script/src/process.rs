// Copyright © 2024 Stephan Kunz

//! Module `process` provides the process registry: named host operations
//! scripts and plans can resolve and execute.
//!
//! `of` hands out a [`ProcessHandle`] which carries the caller's session id,
//! ambient data and authorization into the execution. `execute` is
//! synchronous and runs on the caller's thread.

// region:		--- modules
use crate::share::Share;
use core::fmt::Debug;
use operon_core::{
	error::{Error, Result},
	value::Value,
};
use parking_lot::{Mutex, RwLock};
use std::{
	collections::HashMap,
	sync::{Arc, OnceLock},
};
use tokio_util::sync::CancellationToken;
// endregion:	--- modules

// region:		--- types
/// Type definition for a registered process operation.
pub type ProcessCallback = Arc<dyn Fn(&ProcessRequest) -> Result<Value> + Send + Sync>;

/// Everything a process operation receives for one execution.
#[derive(Debug, Clone, Default)]
pub struct ProcessRequest {
	/// positional arguments
	pub args: Vec<Value>,
	/// session id of the caller
	pub sid: String,
	/// ambient data of the caller
	pub global: HashMap<String, Value>,
	/// authorization record of the caller, if any
	pub authorized: Option<Value>,
	/// cancellation scope of this execution
	pub token: CancellationToken,
}
// endregion:	--- types

// region:		--- ProcessRegistry
/// Registry of named host operations.
#[derive(Default)]
pub struct ProcessRegistry {
	entries: RwLock<HashMap<String, ProcessCallback>>,
}

impl Debug for ProcessRegistry {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("ProcessRegistry")
			.field("count", &self.entries.read().len())
			.finish_non_exhaustive()
	}
}

impl ProcessRegistry {
	/// Create an empty registry.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Register `callback` under `name`, replacing any previous registration.
	pub fn register<F>(&self, name: impl Into<String>, callback: F)
	where
		F: Fn(&ProcessRequest) -> Result<Value> + Send + Sync + 'static,
	{
		self.entries.write().insert(name.into(), Arc::new(callback));
	}

	/// Remove the registration under `name`.
	pub fn unregister(&self, name: &str) {
		self.entries.write().remove(name);
	}

	/// Whether a process is registered under `name`.
	#[must_use]
	pub fn exists(&self, name: &str) -> bool {
		self.entries.read().contains_key(name)
	}

	/// Resolve `name` into an executable handle.
	///
	/// # Errors
	///   if no process is registered under `name`
	pub fn of(&self, name: &str) -> Result<ProcessHandle> {
		let callback = self
			.entries
			.read()
			.get(name)
			.cloned()
			.ok_or_else(|| Error::NotFound {
				what: "process",
				id: name.to_string(),
			})?;
		Ok(ProcessHandle {
			name: name.to_string(),
			callback,
			sid: String::new(),
			global: HashMap::new(),
			authorized: None,
			token: CancellationToken::new(),
			value: Mutex::new(None),
			released: Mutex::new(false),
		})
	}
}

/// The process-wide process registry.
pub fn processes() -> &'static ProcessRegistry {
	static PROCESSES: OnceLock<ProcessRegistry> = OnceLock::new();
	PROCESSES.get_or_init(ProcessRegistry::new)
}
// endregion:	--- ProcessRegistry

// region:		--- ProcessHandle
/// An executable, context-carrying reference to a registered process.
pub struct ProcessHandle {
	name: String,
	callback: ProcessCallback,
	sid: String,
	global: HashMap<String, Value>,
	authorized: Option<Value>,
	token: CancellationToken,
	value: Mutex<Option<Value>>,
	released: Mutex<bool>,
}

impl Debug for ProcessHandle {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("ProcessHandle")
			.field("name", &self.name)
			.field("sid", &self.sid)
			.finish_non_exhaustive()
	}
}

impl ProcessHandle {
	/// Name this handle was resolved from.
	#[must_use]
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Attach the caller's session id.
	#[must_use]
	pub fn with_sid(mut self, sid: impl Into<String>) -> Self {
		self.sid = sid.into();
		self
	}

	/// Attach the caller's ambient data.
	#[must_use]
	pub fn with_global(mut self, global: HashMap<String, Value>) -> Self {
		self.global = global;
		self
	}

	/// Attach the caller's authorization record.
	#[must_use]
	pub fn with_authorized(mut self, authorized: Option<Value>) -> Self {
		self.authorized = authorized;
		self
	}

	/// Attach a cancellation scope for the execution.
	#[must_use]
	pub fn with_token(mut self, token: CancellationToken) -> Self {
		self.token = token;
		self
	}

	/// Attach session id, ambient data and authorization from a [`Share`].
	#[must_use]
	pub fn with_share(self, share: &Share) -> Self {
		self.with_sid(share.sid.clone())
			.with_global(share.global.clone())
			.with_authorized(share.authorized.clone())
	}

	/// Execute the process synchronously on the caller's thread.
	///
	/// # Errors
	///   Error is propagated from the operation
	pub fn execute(&self, args: Vec<Value>) -> Result<Value> {
		let request = ProcessRequest {
			args,
			sid: self.sid.clone(),
			global: self.global.clone(),
			authorized: self.authorized.clone(),
			token: self.token.clone(),
		};
		let result = (self.callback)(&request)?;
		*self.value.lock() = Some(result.clone());
		Ok(result)
	}

	/// The result of the last `execute`, if any.
	#[must_use]
	pub fn value(&self) -> Option<Value> {
		self.value.lock().clone()
	}

	/// Drop the stored result. Releasing twice is a no-op.
	pub fn release(&self) {
		let mut released = self.released.lock();
		if !*released {
			*released = true;
			self.value.lock().take();
		}
	}
}
// endregion:	--- ProcessHandle

#[cfg(test)]
mod tests {
	use super::*;

	// check, that the auto traits are available
	const fn is_normal<T: Sized + Send + Sync>() {}

	#[test]
	const fn normal_types() {
		is_normal::<ProcessRegistry>();
		is_normal::<ProcessHandle>();
		is_normal::<ProcessRequest>();
	}

	#[test]
	fn resolve_and_execute() {
		let registry = ProcessRegistry::new();
		registry.register("add", |request: &ProcessRequest| {
			let a = request.args.first().and_then(Value::as_i64).unwrap_or_default();
			let b = request.args.get(1).and_then(Value::as_i64).unwrap_or_default();
			Ok(Value::Int(i32::try_from(a + b).unwrap_or_default()))
		});

		let handle = registry.of("add").expect("process not found");
		let result = handle
			.execute(vec![Value::Int(1), Value::Int(2)])
			.expect("execute failed");
		assert_eq!(result, Value::Int(3));
		assert_eq!(handle.value(), Some(Value::Int(3)));

		handle.release();
		assert_eq!(handle.value(), None);
		handle.release();

		assert!(registry.of("missing").is_err());
	}

	#[test]
	fn context_is_carried() {
		let registry = ProcessRegistry::new();
		registry.register("whoami", |request: &ProcessRequest| {
			Ok(Value::from(request.sid.clone()))
		});

		let handle = registry
			.of("whoami")
			.expect("process not found")
			.with_sid("session-1");
		let result = handle.execute(Vec::new()).expect("execute failed");
		assert_eq!(result, Value::from("session-1"));
	}
}
