// Copyright © 2024 Stephan Kunz

//! Module `globals` installs the host surface scripts can call: the scoped
//! resource pattern `Use`, the concurrent dispatch primitives `All`, `Any`
//! and `Race`, `Process`, `Eval`, `Authorized` and a `console` that forwards
//! to tracing.
//!
//! Host failures surface as thrown exceptions carrying a typed `code`
//! property: 400 for validation, 404 for missing entities, 500 by default.

// region:		--- modules
use crate::bridge;
use crate::dispatch::{self, DispatchMode, WorkItem};
use crate::error::Error;
use crate::process::processes;
use crate::share;
use operon_core::value::Value;
use tracing::{error, info, warn};
// endregion:	--- modules

// region:		--- installation
/// Install the base globals on a fresh context.
pub fn install_base(scope: &mut v8::HandleScope<'_>, global: v8::Local<'_, v8::Object>) {
	install_console(scope, global);
	set_function(scope, global, "Use", use_callback);
	set_function(scope, global, "All", all_callback);
	set_function(scope, global, "Any", any_callback);
	set_function(scope, global, "Race", race_callback);
	set_function(scope, global, "Process", process_callback);
	set_function(scope, global, "Eval", eval_callback);
	set_function(scope, global, "Authorized", authorized_callback);
}

/// Create a function and bind it on `object` under `name`.
pub fn set_function(
	scope: &mut v8::HandleScope<'_>,
	object: v8::Local<'_, v8::Object>,
	name: &str,
	callback: impl v8::MapFnTo<v8::FunctionCallback>,
) {
	let Some(key) = v8::String::new(scope, name) else {
		return;
	};
	let Some(function) = v8::Function::new(scope, callback) else {
		return;
	};
	object.set(scope, key.into(), function.into());
}

fn install_console(scope: &mut v8::HandleScope<'_>, global: v8::Local<'_, v8::Object>) {
	let console = v8::Object::new(scope);
	set_function(scope, console, "log", console_log);
	set_function(scope, console, "info", console_log);
	set_function(scope, console, "warn", console_warn);
	set_function(scope, console, "error", console_error);
	if let Some(key) = v8::String::new(scope, "console") {
		global.set(scope, key.into(), console.into());
	}
}
// endregion:	--- installation

// region:		--- console
fn console_line(scope: &mut v8::HandleScope<'_>, args: &v8::FunctionCallbackArguments) -> String {
	let mut parts = Vec::with_capacity(usize::try_from(args.length()).unwrap_or_default());
	for index in 0..args.length() {
		parts.push(args.get(index).to_rust_string_lossy(scope));
	}
	parts.join(" ")
}

fn console_log(
	scope: &mut v8::HandleScope,
	args: v8::FunctionCallbackArguments,
	_rv: v8::ReturnValue,
) {
	info!("{}", console_line(scope, &args));
}

fn console_warn(
	scope: &mut v8::HandleScope,
	args: v8::FunctionCallbackArguments,
	_rv: v8::ReturnValue,
) {
	warn!("{}", console_line(scope, &args));
}

fn console_error(
	scope: &mut v8::HandleScope,
	args: v8::FunctionCallbackArguments,
	_rv: v8::ReturnValue,
) {
	error!("{}", console_line(scope, &args));
}
// endregion:	--- console

// region:		--- Use
// Use(Constructor, arg1, …, argN, callback):
// construct, hand the instance to the callback, always call __release once,
// re-raise the callback's error afterwards.
fn use_callback(
	scope: &mut v8::HandleScope,
	args: v8::FunctionCallbackArguments,
	mut rv: v8::ReturnValue,
) {
	let length = args.length();
	if length < 2 {
		bridge::throw(
			scope,
			Error::VALIDATION,
			"Use requires a constructor and a callback",
		);
		return;
	}
	let Ok(ctor) = v8::Local::<v8::Function>::try_from(args.get(0)) else {
		bridge::throw(scope, Error::VALIDATION, "first argument must be newable");
		return;
	};
	let Ok(callback) = v8::Local::<v8::Function>::try_from(args.get(length - 1)) else {
		bridge::throw(scope, Error::VALIDATION, "last argument must be callable");
		return;
	};
	let ctor_args: Vec<v8::Local<v8::Value>> = (1..length - 1).map(|i| args.get(i)).collect();

	// a constructor exception propagates untouched
	let Some(instance) = ctor.new_instance(scope, &ctor_args) else {
		return;
	};

	let receiver: v8::Local<v8::Value> = v8::undefined(scope).into();
	let tc = &mut v8::TryCatch::new(scope);
	let result = callback.call(tc, receiver, &[instance.into()]);
	let exception = if tc.has_caught() {
		let exception = tc.exception();
		tc.reset();
		exception
	} else {
		None
	};

	release_instance(tc, instance);

	if let Some(exception) = exception {
		tc.throw_exception(exception);
	} else if let Some(result) = result {
		rv.set(result);
	}
}

// Call __release exactly once if present and callable; its errors are
// swallowed. No other release method is ever called.
fn release_instance(scope: &mut v8::HandleScope<'_>, instance: v8::Local<'_, v8::Object>) {
	let Some(key) = v8::String::new(scope, "__release") else {
		return;
	};
	let Some(release) = instance.get(scope, key.into()) else {
		return;
	};
	let Ok(release) = v8::Local::<v8::Function>::try_from(release) else {
		return;
	};
	let tc = &mut v8::TryCatch::new(scope);
	let receiver: v8::Local<v8::Value> = instance.into();
	let _ = release.call(tc, receiver, &[]);
	if tc.has_caught() {
		tc.reset();
	}
}
// endregion:	--- Use

// region:		--- dispatch
fn all_callback(
	scope: &mut v8::HandleScope,
	args: v8::FunctionCallbackArguments,
	rv: v8::ReturnValue,
) {
	parallel_callback(scope, &args, rv, DispatchMode::All);
}

fn any_callback(
	scope: &mut v8::HandleScope,
	args: v8::FunctionCallbackArguments,
	rv: v8::ReturnValue,
) {
	parallel_callback(scope, &args, rv, DispatchMode::Any);
}

fn race_callback(
	scope: &mut v8::HandleScope,
	args: v8::FunctionCallbackArguments,
	rv: v8::ReturnValue,
) {
	parallel_callback(scope, &args, rv, DispatchMode::Race);
}

fn parallel_callback(
	scope: &mut v8::HandleScope,
	args: &v8::FunctionCallbackArguments,
	mut rv: v8::ReturnValue,
	mode: DispatchMode,
) {
	let mut item_values = Vec::new();
	// a single array argument is the item list, otherwise every argument is one item
	if args.length() == 1 && args.get(0).is_array() {
		match bridge::from_js(scope, args.get(0)) {
			Ok(Value::List(items)) => item_values = items,
			Ok(_) | Err(_) => {
				bridge::throw(scope, Error::VALIDATION, "work items must be objects");
				return;
			}
		}
	} else {
		for index in 0..args.length() {
			match bridge::from_js(scope, args.get(index)) {
				Ok(value) => item_values.push(value),
				Err(error) => {
					bridge::throw_error(scope, error.as_ref());
					return;
				}
			}
		}
	}

	let mut items = Vec::with_capacity(item_values.len());
	for value in &item_values {
		match WorkItem::from_value(value) {
			Ok(item) => items.push(item),
			Err(error) => {
				bridge::throw_error(scope, error.as_ref());
				return;
			}
		}
	}

	let share = share::share_data(scope);
	let results = dispatch::run(mode, &items, &share);
	let list = Value::List(results.iter().map(dispatch::DispatchResult::to_value).collect());
	match bridge::to_js(scope, &list) {
		Ok(value) => rv.set(value),
		Err(error) => bridge::throw_error(scope, error.as_ref()),
	}
}
// endregion:	--- dispatch

// region:		--- Process
fn process_callback(
	scope: &mut v8::HandleScope,
	args: v8::FunctionCallbackArguments,
	mut rv: v8::ReturnValue,
) {
	if args.length() < 1 || !args.get(0).is_string() {
		bridge::throw(scope, Error::VALIDATION, "Process requires a name");
		return;
	}
	let name = args.get(0).to_rust_string_lossy(scope);

	let mut values = Vec::with_capacity(usize::try_from(args.length()).unwrap_or_default());
	for index in 1..args.length() {
		match bridge::from_js(scope, args.get(index)) {
			Ok(value) => values.push(value),
			Err(error) => {
				bridge::throw_error(scope, error.as_ref());
				return;
			}
		}
	}

	let share = share::share_data(scope);
	let handle = match processes().of(&name) {
		Ok(handle) => handle.with_share(&share),
		Err(error) => {
			bridge::throw_error(scope, error.as_ref());
			return;
		}
	};
	match handle.execute(values) {
		Ok(result) => match bridge::to_js(scope, &result) {
			Ok(result) => rv.set(result),
			Err(error) => bridge::throw_error(scope, error.as_ref()),
		},
		Err(error) => bridge::throw_error(scope, error.as_ref()),
	}
}
// endregion:	--- Process

// region:		--- Eval
fn eval_callback(
	scope: &mut v8::HandleScope,
	args: v8::FunctionCallbackArguments,
	mut rv: v8::ReturnValue,
) {
	if args.length() < 1 || !args.get(0).is_string() {
		bridge::throw(scope, Error::VALIDATION, "Eval requires a source string");
		return;
	}
	let source = args.get(0).to_rust_string_lossy(scope);
	let Some(code) = v8::String::new(scope, &source) else {
		bridge::throw(scope, Error::INTERNAL, "source too long for the isolate");
		return;
	};
	// a compile or run exception stays pending and propagates to the caller
	if let Some(result) = v8::Script::compile(scope, code, None).and_then(|script| script.run(scope))
	{
		rv.set(result);
	}
}
// endregion:	--- Eval

// region:		--- Authorized
fn authorized_callback(
	scope: &mut v8::HandleScope,
	args: v8::FunctionCallbackArguments,
	mut rv: v8::ReturnValue,
) {
	let share = share::share_data(scope);
	if share.root {
		let granted: v8::Local<v8::Value> = v8::Boolean::new(scope, true).into();
		rv.set(granted);
		return;
	}
	let Some(authorized) = share.authorized else {
		let null: v8::Local<v8::Value> = v8::null(scope).into();
		rv.set(null);
		return;
	};
	let value = if args.length() >= 1 && args.get(0).is_string() {
		let key = args.get(0).to_rust_string_lossy(scope);
		match &authorized {
			Value::Map(map) => map.get(&key).cloned().unwrap_or(Value::Null),
			_ => Value::Null,
		}
	} else {
		authorized
	};
	match bridge::to_js(scope, &value) {
		Ok(value) => rv.set(value),
		Err(error) => bridge::throw_error(scope, error.as_ref()),
	}
}
// endregion:	--- Authorized
