// Copyright © 2024 Stephan Kunz

//! Module `space` provides the `SharedSpace`, a concurrency-safe key/value
//! store with change subscriptions used by plans and exposed to scripts.
//!
//! Two read/write locks protect the data map and the subscriber map
//! separately. Callbacks are never invoked under either lock; every
//! notification runs on its own fire-and-forget worker.

// region:		--- modules
use crate::error::Result;
use crate::value::Value;
use core::fmt::Debug;
use parking_lot::{Mutex, RwLock};
use std::{collections::HashMap, sync::Arc, thread};
use tracing::error;
// endregion:	--- modules

// region:		--- types
/// Type definition for a subscription callback.
///
/// The second argument is [`None`] when the key was deleted.
pub type SpaceCallback = Box<dyn FnMut(&str, Option<&Value>) -> Result<()> + Send>;
/// Type definition for an atomic reference counted subscription callback.
pub type ArcSpaceCallback = Arc<Mutex<SpaceCallback>>;
// endregion:	--- types

// region:		--- events
/// Event key published when a task's worker begins.
pub const EVENT_TASK_STARTED: &str = "TaskStarted";
/// Event key published when a task completed without error.
pub const EVENT_TASK_COMPLETED: &str = "TaskCompleted";
/// Event key published when a task failed.
pub const EVENT_TASK_ERROR: &str = "TaskError";
/// Event key published when a plan is released.
pub const EVENT_RELEASED: &str = "Released";

/// Event keys scripts must not overwrite via `Set`.
pub const RESERVED_EVENTS: [&str; 4] = [
	EVENT_TASK_STARTED,
	EVENT_TASK_COMPLETED,
	EVENT_TASK_ERROR,
	EVENT_RELEASED,
];

/// Whether a key is one of the reserved event keys.
#[must_use]
pub fn is_reserved_event(key: &str) -> bool {
	RESERVED_EVENTS.contains(&key)
}
// endregion:	--- events

// region:		--- SharedSpace
/// Concurrency-safe key/value store with change subscriptions.
#[derive(Default)]
pub struct SharedSpace {
	// the key/value bindings
	data: RwLock<HashMap<String, Value>>,
	// registered subscription callbacks per key
	subscribers: RwLock<HashMap<String, Vec<ArcSpaceCallback>>>,
}

impl Debug for SharedSpace {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("SharedSpace")
			.field("keys", &self.data.read().len())
			.finish_non_exhaustive()
	}
}

impl SharedSpace {
	/// Create an empty space.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Store `value` under `key` and notify every subscriber of `key`.
	///
	/// Callback dispatch is fire-and-forget: the call returns before any
	/// callback finished.
	///
	/// # Errors
	///   reserved for future backing stores, currently always ok
	pub fn set(&self, key: impl Into<String>, value: Value) -> Result<()> {
		let key = key.into();
		self.data.write().insert(key.clone(), value.clone());
		self.notify(&key, Some(value));
		Ok(())
	}

	/// The value stored under `key`, if any.
	#[must_use]
	pub fn get(&self, key: &str) -> Option<Value> {
		self.data.read().get(key).cloned()
	}

	/// Remove the binding for `key` and notify its subscribers with no value.
	///
	/// Deleting a missing key is a no-op success.
	///
	/// # Errors
	///   reserved for future backing stores, currently always ok
	pub fn delete(&self, key: &str) -> Result<()> {
		if self.data.write().remove(key).is_some() {
			self.notify(key, None);
		}
		Ok(())
	}

	/// Remove every binding without notifying anybody.
	///
	/// # Errors
	///   reserved for future backing stores, currently always ok
	pub fn clear(&self) -> Result<()> {
		self.data.write().clear();
		Ok(())
	}

	/// Remove every binding and notify every subscribed key with no value.
	///
	/// # Errors
	///   reserved for future backing stores, currently always ok
	pub fn clear_notify(&self) -> Result<()> {
		self.data.write().clear();
		let keys: Vec<String> = self.subscribers.read().keys().cloned().collect();
		for key in keys {
			self.notify(&key, None);
		}
		Ok(())
	}

	/// Append `callback` to the subscriber list of `key`.
	///
	/// Multiple subscribers per key are allowed and all receive every
	/// notification.
	///
	/// # Errors
	///   reserved for future backing stores, currently always ok
	pub fn subscribe(&self, key: impl Into<String>, callback: SpaceCallback) -> Result<()> {
		self.subscribers
			.write()
			.entry(key.into())
			.or_default()
			.push(Arc::new(Mutex::new(callback)));
		Ok(())
	}

	/// Remove all callbacks registered for `key`.
	///
	/// # Errors
	///   reserved for future backing stores, currently always ok
	pub fn unsubscribe(&self, key: &str) -> Result<()> {
		self.subscribers.write().remove(key);
		Ok(())
	}

	/// A shallow copy of the data map, detached from the store.
	#[must_use]
	pub fn snapshot(&self) -> HashMap<String, Value> {
		self.data.read().clone()
	}

	/// Set every binding of `map` with notification.
	///
	/// Keys absent from `map` are preserved. A missing map is a no-op
	/// success.
	///
	/// # Errors
	///   reserved for future backing stores, currently always ok
	pub fn restore(&self, map: Option<HashMap<String, Value>>) -> Result<()> {
		if let Some(map) = map {
			for (key, value) in map {
				self.set(key, value)?;
			}
		}
		Ok(())
	}

	/// The currently bound keys.
	#[must_use]
	pub fn keys(&self) -> Vec<String> {
		self.data.read().keys().cloned().collect()
	}

	/// Number of bindings.
	#[must_use]
	pub fn len(&self) -> usize {
		self.data.read().len()
	}

	/// Whether the store holds no bindings.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.data.read().is_empty()
	}

	// Dispatch one worker per callback registered for `key`.
	// The subscriber lock is released before any callback runs.
	fn notify(&self, key: &str, value: Option<Value>) {
		let callbacks: Vec<ArcSpaceCallback> = self
			.subscribers
			.read()
			.get(key)
			.map(|list| list.iter().map(Arc::clone).collect())
			.unwrap_or_default();

		for callback in callbacks {
			let key = key.to_string();
			let value = value.clone();
			let _ = thread::Builder::new()
				.name("space-notify".into())
				.spawn(move || {
					if let Err(error) = (*callback.lock())(&key, value.as_ref()) {
						error!("subscription callback for '{key}' failed with {error}");
					}
				});
		}
	}
}
// endregion:	--- SharedSpace
