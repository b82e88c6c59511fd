// Copyright © 2024 Stephan Kunz

//! Module `scripting` wires the plan orchestrator into the script world.
//!
//! `Plan(id)` hands scripts a façade object over the registered plan:
//! `Add(taskId, wave, process, …args)`, `Run()`, `Status()`,
//! `TaskStatus(id)`, `TaskData(id)`, `Trigger(key, value)` and `Release()`.
//! Reserved event keys are refused with code 400; task bodies are process
//! work items, never script closures, so no isolate is ever re-entered from
//! a worker.

// region:		--- modules
use crate::config::Config;
use crate::error::Result;
use crate::plan::{registry, Plan};
use operon_core::{space::is_reserved_event, value::Value};
use operon_script::{bridge, globals, Error, GlobalsInstaller, IsoPool};
use std::{collections::HashMap, sync::Arc};
// endregion:	--- modules

// region:		--- installation
/// Installer adding the `Plan` global.
pub fn plan_installer(scope: &mut v8::HandleScope<'_>, global: v8::Local<'_, v8::Object>) {
	globals::set_function(scope, global, "Plan", plan_callback);
}

/// The installers a full runtime isolate carries.
#[must_use]
pub fn default_installers() -> Vec<GlobalsInstaller> {
	vec![plan_installer]
}

/// Create an isolate pool whose isolates carry the full runtime surface.
///
/// # Errors
///   if the configured pool mode is unknown
pub fn script_pool(config: &Config) -> Result<IsoPool> {
	Ok(IsoPool::with_installers(
		config.pool_config()?,
		default_installers(),
	))
}

fn install_method(
	scope: &mut v8::HandleScope<'_>,
	object: v8::Local<'_, v8::Object>,
	name: &str,
	callback: impl v8::MapFnTo<v8::FunctionCallback>,
	data: v8::Local<'_, v8::Value>,
) {
	let Some(key) = v8::String::new(scope, name) else {
		return;
	};
	let Some(function) = v8::Function::builder(callback).data(data).build(scope) else {
		return;
	};
	object.set(scope, key.into(), function.into());
}
// endregion:	--- installation

// region:		--- Plan façade
fn plan_callback(
	scope: &mut v8::HandleScope,
	args: v8::FunctionCallbackArguments,
	mut rv: v8::ReturnValue,
) {
	if args.length() < 1 || !args.get(0).is_string() {
		bridge::throw(scope, Error::VALIDATION, "Plan requires an id");
		return;
	}
	let id = args.get(0).to_rust_string_lossy(scope);

	if registry::get(&id).is_none() {
		let plan = Arc::new(Plan::builder(id.clone()).build());
		if let Err(error) = registry::register(plan) {
			bridge::throw_error(scope, error.as_ref());
			return;
		}
	}

	let object = v8::Object::new(scope);
	let Some(data) = v8::String::new(scope, &id) else {
		bridge::throw(scope, Error::INTERNAL, "could not store plan id");
		return;
	};
	let data: v8::Local<v8::Value> = data.into();

	if let Some(key) = v8::String::new(scope, "id") {
		object.set(scope, key.into(), data);
	}
	install_method(scope, object, "Add", plan_add_callback, data);
	install_method(scope, object, "Run", plan_run_callback, data);
	install_method(scope, object, "Status", plan_status_callback, data);
	install_method(scope, object, "TaskStatus", plan_task_status_callback, data);
	install_method(scope, object, "TaskData", plan_task_data_callback, data);
	install_method(scope, object, "Trigger", plan_trigger_callback, data);
	install_method(scope, object, "Get", plan_get_callback, data);
	install_method(scope, object, "Release", plan_release_callback, data);

	rv.set(object.into());
}

// The plan the method was bound to, or a thrown 404.
fn bound_plan(
	scope: &mut v8::HandleScope,
	args: &v8::FunctionCallbackArguments,
) -> Option<Arc<Plan>> {
	let id = args.data().to_rust_string_lossy(scope);
	let plan = registry::get(&id);
	if plan.is_none() {
		bridge::throw(scope, Error::NOT_FOUND, &format!("plan '{id}' is gone"));
	}
	plan
}

fn plan_add_callback(
	scope: &mut v8::HandleScope,
	args: v8::FunctionCallbackArguments,
	_rv: v8::ReturnValue,
) {
	let Some(plan) = bound_plan(scope, &args) else {
		return;
	};
	if args.length() < 3 || !args.get(0).is_string() || !args.get(2).is_string() {
		bridge::throw(
			scope,
			Error::VALIDATION,
			"Add requires a task id, a wave order and a process name",
		);
		return;
	}
	let task_id = args.get(0).to_rust_string_lossy(scope);
	let Some(wave) = args.get(1).uint32_value(scope) else {
		bridge::throw(scope, Error::VALIDATION, "wave order must be a non-negative integer");
		return;
	};
	let process = args.get(2).to_rust_string_lossy(scope);

	let mut process_args = Vec::new();
	for index in 3..args.length() {
		match bridge::from_js(scope, args.get(index)) {
			Ok(value) => process_args.push(value),
			Err(error) => {
				bridge::throw_error(scope, error.as_ref());
				return;
			}
		}
	}

	if let Err(error) = plan.add_process_task(task_id, wave, process, process_args) {
		bridge::throw_error(scope, error.as_ref());
	}
}

fn plan_run_callback(
	scope: &mut v8::HandleScope,
	args: v8::FunctionCallbackArguments,
	mut rv: v8::ReturnValue,
) {
	let Some(plan) = bound_plan(scope, &args) else {
		return;
	};
	// drive the waves to completion from this synchronous frame
	let runtime = tokio::runtime::Builder::new_current_thread()
		.enable_all()
		.build();
	let runtime = match runtime {
		Ok(runtime) => runtime,
		Err(error) => {
			bridge::throw(scope, Error::INTERNAL, &error.to_string());
			return;
		}
	};
	match runtime.block_on(plan.start()) {
		Ok(()) => {
			let state = plan.state().to_string();
			match bridge::to_js(scope, &Value::from(state)) {
				Ok(state) => rv.set(state),
				Err(error) => bridge::throw_error(scope, error.as_ref()),
			}
		}
		Err(error) => bridge::throw_error(scope, error.as_ref()),
	}
}

fn plan_status_callback(
	scope: &mut v8::HandleScope,
	args: v8::FunctionCallbackArguments,
	mut rv: v8::ReturnValue,
) {
	let Some(plan) = bound_plan(scope, &args) else {
		return;
	};
	let (state, tasks) = plan.status();
	let mut task_map = HashMap::new();
	for (id, task_state) in tasks {
		task_map.insert(id, Value::from(task_state.to_string()));
	}
	let mut map = HashMap::new();
	map.insert("plan".to_string(), Value::from(state.to_string()));
	map.insert("tasks".to_string(), Value::Map(task_map));
	match bridge::to_js(scope, &Value::Map(map)) {
		Ok(status) => rv.set(status),
		Err(error) => bridge::throw_error(scope, error.as_ref()),
	}
}

fn plan_task_status_callback(
	scope: &mut v8::HandleScope,
	args: v8::FunctionCallbackArguments,
	mut rv: v8::ReturnValue,
) {
	let Some(plan) = bound_plan(scope, &args) else {
		return;
	};
	if args.length() < 1 || !args.get(0).is_string() {
		bridge::throw(scope, Error::VALIDATION, "TaskStatus requires a task id");
		return;
	}
	let task_id = args.get(0).to_rust_string_lossy(scope);
	match plan.task_status(&task_id) {
		Ok(state) => match bridge::to_js(scope, &Value::from(state.to_string())) {
			Ok(state) => rv.set(state),
			Err(error) => bridge::throw_error(scope, error.as_ref()),
		},
		Err(error) => bridge::throw_error(scope, error.as_ref()),
	}
}

fn plan_task_data_callback(
	scope: &mut v8::HandleScope,
	args: v8::FunctionCallbackArguments,
	mut rv: v8::ReturnValue,
) {
	let Some(plan) = bound_plan(scope, &args) else {
		return;
	};
	if args.length() < 1 || !args.get(0).is_string() {
		bridge::throw(scope, Error::VALIDATION, "TaskData requires a task id");
		return;
	}
	let task_id = args.get(0).to_rust_string_lossy(scope);
	match plan.task_data(&task_id) {
		Ok(data) => match bridge::to_js(scope, &data.unwrap_or(Value::Null)) {
			Ok(data) => rv.set(data),
			Err(error) => bridge::throw_error(scope, error.as_ref()),
		},
		Err(error) => bridge::throw_error(scope, error.as_ref()),
	}
}

fn plan_trigger_callback(
	scope: &mut v8::HandleScope,
	args: v8::FunctionCallbackArguments,
	_rv: v8::ReturnValue,
) {
	let Some(plan) = bound_plan(scope, &args) else {
		return;
	};
	if args.length() < 2 || !args.get(0).is_string() {
		bridge::throw(scope, Error::VALIDATION, "Trigger requires an event key and a value");
		return;
	}
	let key = args.get(0).to_rust_string_lossy(scope);
	// reserved event keys belong to the orchestrator
	if is_reserved_event(&key) {
		bridge::throw(scope, Error::VALIDATION, &format!("'{key}' is a reserved event"));
		return;
	}
	match bridge::from_js(scope, args.get(1)) {
		Ok(value) => {
			if let Err(error) = plan.trigger(key, value) {
				bridge::throw_error(scope, error.as_ref());
			}
		}
		Err(error) => bridge::throw_error(scope, error.as_ref()),
	}
}

fn plan_get_callback(
	scope: &mut v8::HandleScope,
	args: v8::FunctionCallbackArguments,
	mut rv: v8::ReturnValue,
) {
	let Some(plan) = bound_plan(scope, &args) else {
		return;
	};
	if args.length() < 1 || !args.get(0).is_string() {
		bridge::throw(scope, Error::VALIDATION, "Get requires a key");
		return;
	}
	let key = args.get(0).to_rust_string_lossy(scope);
	let value = plan.space().get(&key).unwrap_or(Value::Null);
	match bridge::to_js(scope, &value) {
		Ok(value) => rv.set(value),
		Err(error) => bridge::throw_error(scope, error.as_ref()),
	}
}

fn plan_release_callback(
	scope: &mut v8::HandleScope,
	args: v8::FunctionCallbackArguments,
	_rv: v8::ReturnValue,
) {
	if let Some(plan) = bound_plan(scope, &args) {
		plan.release();
	}
}
// endregion:	--- Plan façade

#[cfg(test)]
mod tests {
	use super::*;
	use operon_script::{processes, Iso, ProcessRequest};

	fn test_iso() -> Iso {
		processes().register("scripting-echo", |request: &ProcessRequest| {
			Ok(request.args.first().cloned().unwrap_or_default())
		});
		processes().register("scripting-add", |request: &ProcessRequest| {
			let a = request.args.first().and_then(Value::as_i64).unwrap_or_default();
			let b = request.args.get(1).and_then(Value::as_i64).unwrap_or_default();
			Ok(Value::Int(i32::try_from(a + b).unwrap_or_default()))
		});
		Iso::new(0, &default_installers())
	}

	#[test]
	fn plan_round_trip_from_script() {
		let mut iso = test_iso();
		let result = iso
			.eval(
				r"
				const p = Plan('scripting-plan-1');
				p.Add('t1', 0, 'scripting-echo', 'hi');
				p.Add('t2', 1, 'scripting-add', 1, 2);
				const state = p.Run();
				const out = [state, p.TaskStatus('t1'), p.TaskStatus('t2'), p.TaskData('t2')];
				p.Release();
				out
				",
			)
			.expect("eval failed");
		assert_eq!(
			result,
			Value::List(vec![
				Value::from("Completed"),
				Value::from("Completed"),
				Value::from("Completed"),
				Value::Int(3),
			])
		);
		assert!(registry::get("scripting-plan-1").is_none());
	}

	#[test]
	fn duplicate_task_ids_are_rejected() {
		let mut iso = test_iso();
		let result = iso
			.eval(
				r"
				const p = Plan('scripting-plan-2');
				p.Add('t', 0, 'scripting-echo', 1);
				let code = 0;
				try {
					p.Add('t', 1, 'scripting-echo', 2);
				} catch (err) {
					code = err.code;
				}
				p.Release();
				code
				",
			)
			.expect("eval failed");
		assert_eq!(result, Value::Int(400));
	}

	#[test]
	fn reserved_events_are_guarded() {
		let mut iso = test_iso();
		let result = iso
			.eval(
				r"
				const p = Plan('scripting-plan-3');
				let code = 0;
				try {
					p.Trigger('TaskStarted', 1);
				} catch (err) {
					code = err.code;
				}
				p.Trigger('my-event', 'fine');
				const seen = p.Get('my-event');
				p.Release();
				[code, seen]
				",
			)
			.expect("eval failed");
		assert_eq!(
			result,
			Value::List(vec![Value::Int(400), Value::from("fine")])
		);
	}

	#[test]
	fn status_shape() {
		let mut iso = test_iso();
		let result = iso
			.eval(
				r"
				const p = Plan('scripting-plan-4');
				p.Add('t', 0, 'scripting-echo', 1);
				const s = p.Status();
				const out = [s.plan, s.tasks.t];
				p.Release();
				out
				",
			)
			.expect("eval failed");
		assert_eq!(
			result,
			Value::List(vec![Value::from("Created"), Value::from("Created")])
		);
	}
}
