// Copyright © 2024 Stephan Kunz

//! Module `share` provides the per-execution context record of a script
//! invocation: session id, privilege flag, ambient data and authorization.
//!
//! The record lives on the script's global scope so every host operation a
//! script invokes can recover its caller's context.

// region:		--- modules
use crate::bridge;
use operon_core::{
	error::Result,
	value::Value,
};
use std::collections::HashMap;
// endregion:	--- modules

// region:		--- Share
/// Key under which the record is bound on the global scope.
pub const SHARE_KEY: &str = "__share";

/// The per-execution context of a script invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Share {
	/// session id of the caller
	pub sid: String,
	/// privilege flag
	pub root: bool,
	/// ambient data of the caller
	pub global: HashMap<String, Value>,
	/// authorization record, if any
	pub authorized: Option<Value>,
	/// id of the isolate executing the invocation
	pub iso: String,
}

impl Share {
	/// The record as a [`Value`] map.
	#[must_use]
	pub fn to_value(&self) -> Value {
		let mut map = HashMap::new();
		map.insert("sid".to_string(), Value::from(self.sid.clone()));
		map.insert("root".to_string(), Value::from(self.root));
		map.insert("global".to_string(), Value::Map(self.global.clone()));
		map.insert("iso".to_string(), Value::from(self.iso.clone()));
		if let Some(authorized) = &self.authorized {
			map.insert("authorized".to_string(), authorized.clone());
		}
		Value::Map(map)
	}

	/// Rebuild the record from a [`Value`] map.
	#[must_use]
	pub fn from_value(value: &Value) -> Self {
		let Value::Map(map) = value else {
			return Self::default();
		};
		let global = match map.get("global") {
			Some(Value::Map(global)) => global.clone(),
			_ => HashMap::new(),
		};
		Self {
			sid: map
				.get("sid")
				.and_then(Value::as_str)
				.unwrap_or_default()
				.to_string(),
			root: map.get("root").and_then(Value::as_bool).unwrap_or_default(),
			global,
			authorized: map.get("authorized").cloned(),
			iso: map
				.get("iso")
				.and_then(Value::as_str)
				.unwrap_or_default()
				.to_string(),
		}
	}
}

/// Bind `share` on the global scope of the current context.
///
/// # Errors
///   if the record could not be marshaled
pub fn set_share_data(scope: &mut v8::HandleScope<'_>, share: &Share) -> Result<()> {
	let value = bridge::to_js(scope, &share.to_value())?;
	let context = scope.get_current_context();
	let global = context.global(scope);
	if let Some(key) = v8::String::new(scope, SHARE_KEY) {
		global.set(scope, key.into(), value);
	}
	Ok(())
}

/// Read the record bound on the global scope of the current context.
///
/// Returns the default record when none is bound.
#[must_use]
pub fn share_data(scope: &mut v8::HandleScope<'_>) -> Share {
	let context = scope.get_current_context();
	let global = context.global(scope);
	let Some(key) = v8::String::new(scope, SHARE_KEY) else {
		return Share::default();
	};
	let Some(bound) = global.get(scope, key.into()) else {
		return Share::default();
	};
	if bound.is_undefined() || bound.is_null() {
		return Share::default();
	}
	bridge::from_js(scope, bound).map_or_else(|_| Share::default(), |value| Share::from_value(&value))
}
// endregion:	--- Share

#[cfg(test)]
mod tests {
	use super::*;

	// check, that the auto traits are available
	const fn is_normal<T: Sized + Send + Sync>() {}

	#[test]
	const fn normal_types() {
		is_normal::<Share>();
	}

	#[test]
	fn record_round_trip() {
		let mut global = HashMap::new();
		global.insert("tenant".to_string(), Value::from("acme"));
		let share = Share {
			sid: "session-7".into(),
			root: true,
			global,
			authorized: Some(Value::from("token")),
			iso: "iso-1".into(),
		};
		let back = Share::from_value(&share.to_value());
		assert_eq!(back, share);
	}

	#[test]
	fn defaults_from_non_map() {
		assert_eq!(Share::from_value(&Value::Null), Share::default());
	}
}
