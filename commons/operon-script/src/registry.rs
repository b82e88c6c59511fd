// Copyright © 2024 Stephan Kunz

//! Module `registry` provides the process-wide `ObjectRegistry`, a table of
//! opaque string ids to host objects held on behalf of scripts.
//!
//! Entries are swept in two ways: a threshold sweep kicks in asynchronously
//! when a registration pushes the table over [`GC_THRESHOLD`] entries, and a
//! periodic sweeper runs at [`GC_CADENCE`] from the first registration until
//! [`ObjectRegistry::stop_periodic_gc`].

// region:		--- modules
use core::fmt::Debug;
use parking_lot::{Mutex, RwLock};
use std::{
	any::Any,
	collections::HashMap,
	sync::{
		mpsc::{self, RecvTimeoutError, Sender},
		Arc, OnceLock, Weak,
	},
	thread,
	time::{Duration, SystemTime},
};
use tracing::{debug, warn};
use uuid::Uuid;
// endregion:	--- modules

// region:		--- types
/// Entry count above which a registration triggers an asynchronous sweep.
pub const GC_THRESHOLD: usize = 1000;
/// Cadence of the periodic sweeper.
pub const GC_CADENCE: Duration = Duration::from_secs(300);

// A registered object, either owned by the registry or only observed.
enum ObjectRef {
	Strong(Arc<dyn Any + Send + Sync>),
	Weak(Weak<dyn Any + Send + Sync>),
}

impl ObjectRef {
	fn upgrade(&self) -> Option<Arc<dyn Any + Send + Sync>> {
		match self {
			Self::Strong(obj) => Some(obj.clone()),
			Self::Weak(obj) => obj.upgrade(),
		}
	}

	fn is_dead(&self) -> bool {
		match self {
			Self::Strong(_) => false,
			Self::Weak(obj) => obj.strong_count() == 0,
		}
	}
}

struct Entry {
	obj: ObjectRef,
	registered_at: SystemTime,
}
// endregion:	--- types

// region:		--- ObjectRegistry
/// Process-wide table mapping opaque string ids to host objects.
pub struct ObjectRegistry {
	entries: Arc<RwLock<HashMap<String, Entry>>>,
	sweeper: Mutex<Option<Sender<()>>>,
}

impl Debug for ObjectRegistry {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("ObjectRegistry")
			.field("count", &self.count())
			.finish_non_exhaustive()
	}
}

impl Default for ObjectRegistry {
	fn default() -> Self {
		Self {
			entries: Arc::new(RwLock::new(HashMap::new())),
			sweeper: Mutex::new(None),
		}
	}
}

impl ObjectRegistry {
	/// Create an empty registry.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Store an object the registry owns and return its new id.
	pub fn register<T>(&self, obj: Arc<T>) -> String
	where
		T: Any + Send + Sync,
	{
		self.insert(ObjectRef::Strong(obj))
	}

	/// Observe an object without keeping it alive and return its new id.
	///
	/// Once the last strong reference outside the registry is gone, the
	/// entry counts as nil and is removed by the next sweep.
	pub fn register_weak<T>(&self, obj: &Arc<T>) -> String
	where
		T: Any + Send + Sync,
	{
		let weak: Weak<T> = Arc::downgrade(obj);
		self.insert(ObjectRef::Weak(weak))
	}

	fn insert(&self, obj: ObjectRef) -> String {
		let id = Uuid::new_v4().to_string();
		let count = {
			let mut entries = self.entries.write();
			entries.insert(
				id.clone(),
				Entry {
					obj,
					registered_at: SystemTime::now(),
				},
			);
			entries.len()
		};

		if count > GC_THRESHOLD {
			let entries = self.entries.clone();
			let _ = thread::Builder::new()
				.name("registry-gc".into())
				.spawn(move || sweep(&entries));
		}
		self.ensure_periodic_gc();
		id
	}

	/// The object registered under `id`, if it exists and is not nil.
	#[must_use]
	pub fn get(&self, id: &str) -> Option<Arc<dyn Any + Send + Sync>> {
		self.entries.read().get(id).and_then(|entry| entry.obj.upgrade())
	}

	/// The object registered under `id`, downcast to `T`.
	#[must_use]
	pub fn get_as<T>(&self, id: &str) -> Option<Arc<T>>
	where
		T: Any + Send + Sync,
	{
		self.get(id).and_then(|obj| obj.downcast::<T>().ok())
	}

	/// When the object registered under `id` was registered.
	#[must_use]
	pub fn registered_at(&self, id: &str) -> Option<SystemTime> {
		self.entries.read().get(id).map(|entry| entry.registered_at)
	}

	/// Remove the entry registered under `id`.
	pub fn release(&self, id: &str) {
		self.entries.write().remove(id);
	}

	/// Whether an entry exists under `id` and its object is not nil.
	#[must_use]
	pub fn has(&self, id: &str) -> bool {
		self.entries
			.read()
			.get(id)
			.is_some_and(|entry| !entry.obj.is_dead())
	}

	/// Number of entries, dead or alive.
	#[must_use]
	pub fn count(&self) -> usize {
		self.entries.read().len()
	}

	/// Synchronously remove every entry whose object became nil.
	pub fn sweep(&self) {
		sweep(&self.entries);
	}

	/// Stop the periodic sweeper for clean shutdown.
	pub fn stop_periodic_gc(&self) {
		if let Some(stop) = self.sweeper.lock().take() {
			let _ = stop.send(());
		}
	}

	// Start the periodic sweeper on first registration.
	fn ensure_periodic_gc(&self) {
		let mut sweeper = self.sweeper.lock();
		if sweeper.is_some() {
			return;
		}
		let (stop_tx, stop_rx) = mpsc::channel::<()>();
		let entries = self.entries.clone();
		let spawned = thread::Builder::new()
			.name("registry-periodic-gc".into())
			.spawn(move || loop {
				match stop_rx.recv_timeout(GC_CADENCE) {
					Err(RecvTimeoutError::Timeout) => sweep(&entries),
					Ok(()) | Err(RecvTimeoutError::Disconnected) => {
						debug!("periodic gc stopped");
						return;
					}
				}
			});
		match spawned {
			Ok(_) => *sweeper = Some(stop_tx),
			Err(error) => warn!("could not start periodic gc: {error}"),
		}
	}
}

impl Drop for ObjectRegistry {
	fn drop(&mut self) {
		self.stop_periodic_gc();
	}
}

// Remove dead entries. Runs outside any caller-visible lock scope.
fn sweep(entries: &RwLock<HashMap<String, Entry>>) {
	let dead: Vec<String> = entries
		.read()
		.iter()
		.filter_map(|(id, entry)| entry.obj.is_dead().then(|| id.clone()))
		.collect();
	if dead.is_empty() {
		return;
	}
	let mut entries = entries.write();
	for id in dead {
		entries.remove(&id);
	}
}

/// The process-wide object registry.
pub fn objects() -> &'static ObjectRegistry {
	static OBJECTS: OnceLock<ObjectRegistry> = OnceLock::new();
	OBJECTS.get_or_init(ObjectRegistry::new)
}
// endregion:	--- ObjectRegistry

#[cfg(test)]
mod tests {
	use super::*;

	// check, that the auto traits are available
	const fn is_normal<T: Sized + Send + Sync>() {}

	#[test]
	const fn normal_types() {
		is_normal::<ObjectRegistry>();
	}

	#[test]
	fn register_get_release() {
		let registry = ObjectRegistry::new();
		let id = registry.register(Arc::new(42_i32));
		assert!(registry.has(&id));
		assert_eq!(registry.get_as::<i32>(&id).as_deref(), Some(&42));
		assert!(registry.registered_at(&id).is_some());
		assert_eq!(registry.count(), 1);

		registry.release(&id);
		assert!(!registry.has(&id));
		assert!(registry.get(&id).is_none());
		assert_eq!(registry.count(), 0);
		registry.stop_periodic_gc();
	}

	#[test]
	fn weak_entries_become_nil() {
		let registry = ObjectRegistry::new();
		let obj = Arc::new(String::from("alive"));
		let id = registry.register_weak(&obj);
		assert!(registry.has(&id));

		drop(obj);
		assert!(!registry.has(&id));
		// still listed until a sweep runs
		assert_eq!(registry.count(), 1);
		registry.sweep();
		assert_eq!(registry.count(), 0);
		registry.stop_periodic_gc();
	}

	#[test]
	fn unknown_ids() {
		let registry = ObjectRegistry::new();
		assert!(!registry.has("no-such-id"));
		assert!(registry.get("no-such-id").is_none());
		registry.release("no-such-id");
	}
}
