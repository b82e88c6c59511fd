// Copyright © 2024 Stephan Kunz

//! Module `registry` provides the process-wide plan registry keyed by plan
//! id.

// region:		--- modules
use super::Plan;
use operon_core::error::{Error, Result};
use parking_lot::RwLock;
use std::{
	collections::HashMap,
	sync::{Arc, OnceLock},
};
// endregion:	--- modules

// region:		--- registry
fn plans() -> &'static RwLock<HashMap<String, Arc<Plan>>> {
	static PLANS: OnceLock<RwLock<HashMap<String, Arc<Plan>>>> = OnceLock::new();
	PLANS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register a plan under its id.
///
/// # Errors
///   if a plan with the same id is already registered
pub fn register(plan: Arc<Plan>) -> Result<()> {
	let mut registry = plans().write();
	if registry.contains_key(plan.id()) {
		return Err(Error::Duplicate {
			what: "plan",
			id: plan.id().to_string(),
		}
		.into());
	}
	registry.insert(plan.id().to_string(), plan);
	Ok(())
}

/// The plan registered under `id`, if any.
#[must_use]
pub fn get(id: &str) -> Option<Arc<Plan>> {
	plans().read().get(id).cloned()
}

/// Remove the plan registered under `id`.
pub fn remove(id: &str) -> Option<Arc<Plan>> {
	plans().write().remove(id)
}

/// Ids of all registered plans.
#[must_use]
pub fn ids() -> Vec<String> {
	plans().read().keys().cloned().collect()
}
// endregion:	--- registry

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn register_get_remove() {
		let plan = Arc::new(Plan::builder("registry-p1").build());
		register(plan).expect("register failed");
		assert!(get("registry-p1").is_some());
		assert!(ids().contains(&"registry-p1".to_string()));

		// ids are unique per process
		let duplicate = Arc::new(Plan::builder("registry-p1").build());
		assert!(register(duplicate).is_err());

		assert!(remove("registry-p1").is_some());
		assert!(get("registry-p1").is_none());
	}
}
