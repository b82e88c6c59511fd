// Copyright © 2024 Stephan Kunz

//! Module `runtime` provides the engine bootstrap and the `Iso` wrapper
//! around one V8 isolate with a prepared execution context.
//!
//! The platform is initialized once per process. Every `Iso` owns its
//! isolate exclusively; sharing one between two logical operations is
//! prevented by ownership.

// region:		--- modules
use crate::bridge;
use crate::share::{self, Share};
use operon_core::{
	error::Result,
	value::Value,
};
use std::{
	sync::Once,
	time::Instant,
};
use uuid::Uuid;
// endregion:	--- modules

// region:		--- types
/// Isolate id stored in the isolate's data slot, readable from callbacks.
#[derive(Debug, Clone)]
pub struct IsoId(pub String);

/// Hook installing additional globals on a fresh context.
pub type GlobalsInstaller =
	fn(scope: &mut v8::HandleScope<'_>, global: v8::Local<'_, v8::Object>);

/// Initialize the engine platform. Safe to call any number of times.
pub fn init_engine() {
	static INIT: Once = Once::new();
	INIT.call_once(|| {
		let platform = v8::new_default_platform(0, false).make_shared();
		v8::V8::initialize_platform(platform);
		v8::V8::initialize();
	});
}
// endregion:	--- types

// region:		--- Iso
/// One exclusive script execution context.
pub struct Iso {
	id: String,
	heap_used: usize,
	healthy: bool,
	last_used: Instant,
	// declared before the isolate so it is dropped first
	context: v8::Global<v8::Context>,
	isolate: v8::OwnedIsolate,
}

impl core::fmt::Debug for Iso {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Iso")
			.field("id", &self.id)
			.field("heap_used", &self.heap_used)
			.field("healthy", &self.healthy)
			.finish_non_exhaustive()
	}
}

impl Iso {
	/// Create an isolate with a prepared context.
	///
	/// A `heap_size_limit` of 0 leaves the engine default in place.
	#[must_use]
	pub fn new(heap_size_limit: usize, installers: &[GlobalsInstaller]) -> Self {
		init_engine();

		let mut params = v8::CreateParams::default();
		if heap_size_limit > 0 {
			params = params.heap_limits(0, heap_size_limit);
		}
		let mut isolate = v8::Isolate::new(params);
		let id = Uuid::new_v4().to_string();
		isolate.set_slot(IsoId(id.clone()));

		let context = {
			let scope = &mut v8::HandleScope::new(&mut isolate);
			let context = v8::Context::new(scope, v8::ContextOptions::default());
			let scope = &mut v8::ContextScope::new(scope, context);
			let global = context.global(scope);
			crate::globals::install_base(scope, global);
			for installer in installers {
				installer(scope, global);
			}
			v8::Global::new(scope, context)
		};

		Self {
			id,
			heap_used: 0,
			healthy: true,
			last_used: Instant::now(),
			context,
			isolate,
		}
	}

	/// The isolate's id.
	#[must_use]
	pub fn id(&self) -> &str {
		&self.id
	}

	/// Compile and run a source string, marshaling the completion value.
	///
	/// # Errors
	///   a script exception is surfaced as [`crate::error::Error::Exception`]
	pub fn eval(&mut self, source: &str) -> Result<Value> {
		let result = {
			let scope = &mut v8::HandleScope::with_context(&mut self.isolate, &self.context);
			let scope = &mut v8::TryCatch::new(scope);

			let code = v8::String::new(scope, source).ok_or_else(|| crate::error::Error::Marshal {
				message: "source too long for the isolate".into(),
			})?;
			let completion = v8::Script::compile(scope, code, None)
				.and_then(|script| script.run(scope));
			scope.perform_microtask_checkpoint();

			match completion {
				Some(value) => bridge::from_js(scope, value),
				None => Err(bridge::exception_error(scope).into()),
			}
		};
		self.last_used = Instant::now();
		result
	}

	/// Bind a host value on the context's global scope.
	///
	/// # Errors
	///   if the value could not be marshaled
	pub fn set_global(&mut self, name: &str, value: &Value) -> Result<()> {
		let scope = &mut v8::HandleScope::with_context(&mut self.isolate, &self.context);
		let local = bridge::to_js(scope, value)?;
		let context = scope.get_current_context();
		let global = context.global(scope);
		let key = v8::String::new(scope, name).ok_or_else(|| crate::error::Error::Marshal {
			message: "name too long for the isolate".into(),
		})?;
		global.set(scope, key.into(), local);
		Ok(())
	}

	/// Read a value bound on the context's global scope.
	///
	/// # Errors
	///   if the value could not be marshaled
	pub fn get_global(&mut self, name: &str) -> Result<Value> {
		let scope = &mut v8::HandleScope::with_context(&mut self.isolate, &self.context);
		let context = scope.get_current_context();
		let global = context.global(scope);
		let key = v8::String::new(scope, name).ok_or_else(|| crate::error::Error::Marshal {
			message: "name too long for the isolate".into(),
		})?;
		let value = global
			.get(scope, key.into())
			.unwrap_or_else(|| v8::undefined(scope).into());
		bridge::from_js(scope, value)
	}

	/// Invoke a script function held as an opaque handle.
	///
	/// # Errors
	///   a script exception is surfaced as [`crate::error::Error::Exception`]
	pub fn call(&mut self, function: &Value, args: &[Value]) -> Result<Value> {
		let scope = &mut v8::HandleScope::with_context(&mut self.isolate, &self.context);
		let local = bridge::to_js(scope, function)?;
		let function =
			v8::Local::<v8::Function>::try_from(local).map_err(|_| crate::error::Error::Marshal {
				message: "value is not callable".into(),
			})?;

		let mut call_args = Vec::with_capacity(args.len());
		for arg in args {
			call_args.push(bridge::to_js(scope, arg)?);
		}

		let scope = &mut v8::TryCatch::new(scope);
		let receiver: v8::Local<v8::Value> = v8::undefined(scope).into();
		let completion = function.call(scope, receiver, &call_args);
		scope.perform_microtask_checkpoint();
		match completion {
			Some(value) => bridge::from_js(scope, value),
			None => Err(bridge::exception_error(scope).into()),
		}
	}

	/// Bind the share record on the context's global scope.
	///
	/// # Errors
	///   if the record could not be marshaled
	pub fn set_share(&mut self, share: &Share) -> Result<()> {
		let scope = &mut v8::HandleScope::with_context(&mut self.isolate, &self.context);
		let mut share = share.clone();
		share.iso.clone_from(&self.id);
		share::set_share_data(scope, &share)
	}

	/// Read the share record bound on the context's global scope.
	#[must_use]
	pub fn share(&mut self) -> Share {
		let scope = &mut v8::HandleScope::with_context(&mut self.isolate, &self.context);
		share::share_data(scope)
	}

	/// Refresh and return the heap usage estimate.
	pub fn update_heap(&mut self) -> usize {
		let mut stats = v8::HeapStatistics::default();
		self.isolate.get_heap_statistics(&mut stats);
		self.heap_used = stats.used_heap_size();
		self.heap_used
	}

	/// The heap usage estimate of the last [`Self::update_heap`].
	#[must_use]
	pub const fn heap_used(&self) -> usize {
		self.heap_used
	}

	/// Whether the isolate may be handed out again.
	#[must_use]
	pub const fn healthy(&self) -> bool {
		self.healthy
	}

	/// Exclude the isolate from further use.
	pub fn mark_unhealthy(&mut self) {
		self.healthy = false;
	}

	/// When the isolate was last used.
	#[must_use]
	pub const fn last_used(&self) -> Instant {
		self.last_used
	}
}
// endregion:	--- Iso

#[cfg(test)]
mod tests {
	use super::*;

	// check, that the auto traits are available
	const fn is_normal<T: Sized + Send>() {}

	#[test]
	const fn normal_types() {
		is_normal::<Iso>();
	}

	#[test]
	fn eval_primitives() {
		let mut iso = Iso::new(0, &[]);
		assert_eq!(iso.eval("1 + 2").expect("eval failed"), Value::Int(3));
		assert_eq!(iso.eval("'a' + 'b'").expect("eval failed"), Value::from("ab"));
		assert_eq!(iso.eval("1.5").expect("eval failed"), Value::Float(1.5));
		assert_eq!(iso.eval("true").expect("eval failed"), Value::Bool(true));
		assert_eq!(iso.eval("null").expect("eval failed"), Value::Null);
		assert_eq!(iso.eval("undefined").expect("eval failed"), Value::Undefined);
		assert_eq!(iso.eval("2n ** 40n").expect("eval failed"), Value::Big(1 << 40));
	}

	#[test]
	fn eval_containers() {
		let mut iso = Iso::new(0, &[]);
		assert_eq!(
			iso.eval("[1, 'two', false]").expect("eval failed"),
			Value::List(vec![Value::Int(1), Value::from("two"), Value::Bool(false)])
		);
		let result = iso.eval("({a: 1, b: 'two'})").expect("eval failed");
		let Value::Map(map) = result else {
			panic!("expected a map");
		};
		assert_eq!(map.get("a"), Some(&Value::Int(1)));
		assert_eq!(map.get("b"), Some(&Value::from("two")));
	}

	#[test]
	fn eval_bytes_bit_exact() {
		let mut iso = Iso::new(0, &[]);
		assert_eq!(
			iso.eval("new Uint8Array([0, 127, 255])").expect("eval failed"),
			Value::Bytes(vec![0, 127, 255])
		);
	}

	#[test]
	fn eval_exception() {
		let mut iso = Iso::new(0, &[]);
		let error = iso.eval("throw new Error('boom')").expect_err("no exception");
		assert!(error.to_string().contains("boom"));
	}

	#[test]
	fn share_round_trip() {
		let mut iso = Iso::new(0, &[]);
		let share = Share {
			sid: "session-1".into(),
			root: true,
			..Share::default()
		};
		iso.set_share(&share).expect("set_share failed");
		let read = iso.share();
		assert_eq!(read.sid, "session-1");
		assert!(read.root);
		assert_eq!(read.iso, iso.id());
	}

	#[test]
	fn heap_estimate_grows() {
		let mut iso = Iso::new(0, &[]);
		let initial = iso.update_heap();
		assert!(initial > 0);
	}

	#[test]
	fn host_function_crosses_the_bridge() {
		use operon_core::value::HostFunction;

		let mut iso = Iso::new(0, &[]);
		let double = HostFunction::new(|args| {
			let v = args.first().and_then(Value::as_i64).unwrap_or_default();
			Ok(Value::Big(v * 2))
		});
		iso.set_global("double", &Value::Function(double))
			.expect("set_global failed");
		assert_eq!(iso.eval("double(21n)").expect("eval failed"), Value::Big(42));
	}

	#[test]
	fn globals_round_trip() {
		let mut iso = Iso::new(0, &[]);
		iso.set_global("buf", &Value::Bytes(vec![1, 2, 3]))
			.expect("set_global failed");
		assert_eq!(
			iso.get_global("buf").expect("get_global failed"),
			Value::Bytes(vec![1, 2, 3])
		);
		assert_eq!(iso.get_global("missing").expect("get_global failed"), Value::Undefined);
	}

	#[test]
	fn script_function_handle_is_callable() {
		let mut iso = Iso::new(0, &[]);
		let handle = iso.eval("(x) => x + 1").expect("eval failed");
		assert!(matches!(handle, Value::Handle(_)));
		let result = iso.call(&handle, &[Value::Int(41)]).expect("call failed");
		assert_eq!(result, Value::Int(42));
	}

	#[test]
	fn settled_promises_cross_the_bridge() {
		use operon_core::value::PromiseState;

		let mut iso = Iso::new(0, &[]);
		let value = iso
			.eval("Promise.resolve('done')")
			.expect("eval failed");
		let Value::Promise(promise) = value else {
			panic!("expected a promise");
		};
		assert_eq!(promise.state(), PromiseState::Resolved(Value::from("done")));
	}
}
