// Copyright © 2024 Stephan Kunz

//! Module `bridge` transfers values between the host world and the script
//! world, preserving type identity where the engine allows it.
//!
//! Containers are walked recursively; primitives never round-trip through
//! textual JSON, so integer widths survive the crossing. Byte sequences
//! cross as `Uint8Array` backing stores, bit-exact in both directions.

// region:		--- modules
use crate::error::Error;
use crate::registry::objects;
use crate::runtime::IsoId;
use operon_core::{
	error::Result,
	value::{HandleKind, HostFunction, HostPromise, ObjectHandle, Value},
};
use std::{collections::HashMap, sync::Arc};
// endregion:	--- modules

// region:		--- types
/// Key under which opaque object handles cross into the script world.
pub const HANDLE_KEY: &str = "__handle";

/// A script function held on behalf of the host.
pub struct ScriptFunction {
	/// id of the isolate the function lives in
	pub iso: String,
	/// the engine handle
	pub func: v8::Global<v8::Function>,
}

/// A script promise held on behalf of the host.
pub struct ScriptPromise {
	/// id of the isolate the promise lives in
	pub iso: String,
	/// the engine handle
	pub promise: v8::Global<v8::Promise>,
}
// endregion:	--- types

// region:		--- helpers
fn marshal_err(message: impl Into<String>) -> Box<dyn core::error::Error + Send + Sync + 'static> {
	Error::Marshal {
		message: message.into(),
	}
	.into()
}

/// Id of the isolate the scope belongs to.
#[must_use]
pub fn current_iso_id(scope: &v8::HandleScope<'_>) -> String {
	scope.get_slot::<IsoId>().map(|id| id.0.clone()).unwrap_or_default()
}

/// Throw a script exception carrying a typed `code` property.
pub fn throw(scope: &mut v8::HandleScope<'_>, code: u16, message: &str) {
	let text = v8::String::new(scope, message)
		.unwrap_or_else(|| v8::String::empty(scope));
	let exception = v8::Exception::error(scope, text);
	if let Ok(object) = v8::Local::<v8::Object>::try_from(exception) {
		if let Some(key) = v8::String::new(scope, "code") {
			let value = v8::Integer::new(scope, i32::from(code));
			object.set(scope, key.into(), value.into());
		}
	}
	scope.throw_exception(exception);
}

/// Throw a host error as a script exception, mapping known kinds to codes.
pub fn throw_error(
	scope: &mut v8::HandleScope<'_>,
	error: &(dyn core::error::Error + 'static),
) {
	let code = if let Some(script) = error.downcast_ref::<Error>() {
		match script {
			Error::Exception { code, .. } => *code,
			Error::Marshal { .. } => Error::INTERNAL,
		}
	} else if let Some(core) = error.downcast_ref::<operon_core::error::Error>() {
		match core {
			operon_core::error::Error::Validation { .. }
			| operon_core::error::Error::Duplicate { .. } => Error::VALIDATION,
			operon_core::error::Error::NotFound { .. } => Error::NOT_FOUND,
			_ => Error::INTERNAL,
		}
	} else {
		Error::INTERNAL
	};
	throw(scope, code, &error.to_string());
}

/// Convert a caught script exception into a host error.
pub fn exception_error(scope: &mut v8::TryCatch<'_, v8::HandleScope<'_>>) -> Error {
	let Some(exception) = scope.exception() else {
		return Error::Exception {
			code: Error::INTERNAL,
			message: "unknown exception".into(),
		};
	};
	scope.reset();

	let mut code = Error::INTERNAL;
	let mut message = exception.to_rust_string_lossy(scope);
	if let Ok(object) = v8::Local::<v8::Object>::try_from(exception) {
		if let Some(key) = v8::String::new(scope, "code") {
			if let Some(value) = object.get(scope, key.into()) {
				if value.is_int32() {
					code = u16::try_from(value.int32_value(scope).unwrap_or_default())
						.unwrap_or(Error::INTERNAL);
				}
			}
		}
		if let Some(key) = v8::String::new(scope, "message") {
			if let Some(value) = object.get(scope, key.into()) {
				if value.is_string() {
					message = value.to_rust_string_lossy(scope);
				}
			}
		}
	}
	Error::Exception { code, message }
}
// endregion:	--- helpers

// region:		--- to_js
/// Marshal a host [`Value`] into the script world.
///
/// # Errors
///   if a contained value cannot be expressed in the current isolate
#[allow(clippy::too_many_lines)]
pub fn to_js<'s>(
	scope: &mut v8::HandleScope<'s>,
	value: &Value,
) -> Result<v8::Local<'s, v8::Value>> {
	let result: v8::Local<v8::Value> = match value {
		Value::Null => v8::null(scope).into(),
		Value::Undefined => v8::undefined(scope).into(),
		Value::Bool(v) => v8::Boolean::new(scope, *v).into(),
		Value::Int(v) => v8::Integer::new(scope, *v).into(),
		Value::UInt(v) => v8::Integer::new_from_unsigned(scope, *v).into(),
		Value::Big(v) => v8::BigInt::new_from_i64(scope, *v).into(),
		Value::UBig(v) => v8::BigInt::new_from_u64(scope, *v).into(),
		Value::Float(v) => v8::Number::new(scope, *v).into(),
		Value::String(v) => v8::String::new(scope, v)
			.ok_or_else(|| marshal_err("string too long for the isolate"))?
			.into(),
		Value::Bytes(v) => {
			let store = v8::ArrayBuffer::new_backing_store_from_vec(v.clone()).make_shared();
			let buffer = v8::ArrayBuffer::with_backing_store(scope, &store);
			v8::Uint8Array::new(scope, buffer, 0, v.len())
				.ok_or_else(|| marshal_err("could not create byte array"))?
				.into()
		}
		Value::List(items) => {
			let array = v8::Array::new(scope, 0);
			for (index, item) in items.iter().enumerate() {
				let element = to_js(scope, item)?;
				array.set_index(
					scope,
					u32::try_from(index).map_err(|_| marshal_err("list too long"))?,
					element,
				);
			}
			array.into()
		}
		Value::Map(map) => {
			let object = v8::Object::new(scope);
			for (key, item) in map {
				let key = v8::String::new(scope, key)
					.ok_or_else(|| marshal_err("key too long for the isolate"))?;
				let element = to_js(scope, item)?;
				object.set(scope, key.into(), element);
			}
			object.into()
		}
		Value::Function(host_fn) => {
			let id = objects().register(Arc::new(host_fn.clone()));
			let data = v8::String::new(scope, &id)
				.ok_or_else(|| marshal_err("could not store function id"))?;
			v8::Function::builder(host_function_callback)
				.data(data.into())
				.build(scope)
				.ok_or_else(|| marshal_err("could not create function"))?
				.into()
		}
		Value::Promise(promise) => {
			let resolver = v8::PromiseResolver::new(scope)
				.ok_or_else(|| marshal_err("could not create promise"))?;
			match promise.state() {
				operon_core::value::PromiseState::Pending => {}
				operon_core::value::PromiseState::Resolved(settled) => {
					let settled = to_js(scope, &settled)?;
					resolver.resolve(scope, settled);
				}
				operon_core::value::PromiseState::Rejected(message) => {
					let text = v8::String::new(scope, &message)
						.unwrap_or_else(|| v8::String::empty(scope));
					let exception = v8::Exception::error(scope, text);
					resolver.reject(scope, exception);
				}
			}
			resolver.get_promise(scope).into()
		}
		Value::Handle(handle) => match handle.kind {
			HandleKind::Function => {
				let func = objects()
					.get_as::<ScriptFunction>(&handle.id)
					.ok_or_else(|| marshal_err("unknown function handle"))?;
				if func.iso != current_iso_id(scope) {
					return Err(marshal_err("function handle from another isolate"));
				}
				v8::Local::new(scope, &func.func).into()
			}
			HandleKind::Promise => {
				let promise = objects()
					.get_as::<ScriptPromise>(&handle.id)
					.ok_or_else(|| marshal_err("unknown promise handle"))?;
				if promise.iso != current_iso_id(scope) {
					return Err(marshal_err("promise handle from another isolate"));
				}
				v8::Local::new(scope, &promise.promise).into()
			}
			HandleKind::Object => {
				let object = v8::Object::new(scope);
				let key = v8::String::new(scope, HANDLE_KEY)
					.ok_or_else(|| marshal_err("could not store handle id"))?;
				let id = v8::String::new(scope, &handle.id)
					.ok_or_else(|| marshal_err("could not store handle id"))?;
				object.set(scope, key.into(), id.into());
				object.into()
			}
		},
	};
	Ok(result)
}

// Callback behind every marshaled host function.
fn host_function_callback(
	scope: &mut v8::HandleScope,
	args: v8::FunctionCallbackArguments,
	mut rv: v8::ReturnValue,
) {
	let id = args.data().to_rust_string_lossy(scope);
	let Some(host_fn) = objects().get_as::<HostFunction>(&id) else {
		throw(scope, Error::NOT_FOUND, "host function is gone");
		return;
	};

	let mut values = Vec::with_capacity(usize::try_from(args.length()).unwrap_or_default());
	for index in 0..args.length() {
		match from_js(scope, args.get(index)) {
			Ok(value) => values.push(value),
			Err(error) => {
				throw_error(scope, error.as_ref());
				return;
			}
		}
	}

	match host_fn.call(values) {
		Ok(result) => match to_js(scope, &result) {
			Ok(result) => rv.set(result),
			Err(error) => throw_error(scope, error.as_ref()),
		},
		Err(error) => throw_error(scope, error.as_ref()),
	}
}
// endregion:	--- to_js

// region:		--- from_js
/// Marshal a script value into the host world.
///
/// # Errors
///   if the value is of an unrecognized type
#[allow(clippy::too_many_lines)]
pub fn from_js(
	scope: &mut v8::HandleScope<'_>,
	value: v8::Local<'_, v8::Value>,
) -> Result<Value> {
	if value.is_null() {
		return Ok(Value::Null);
	}
	if value.is_undefined() {
		return Ok(Value::Undefined);
	}
	if value.is_boolean() {
		return Ok(Value::Bool(value.boolean_value(scope)));
	}
	if value.is_int32() {
		return Ok(Value::Int(value.int32_value(scope).unwrap_or_default()));
	}
	if value.is_number() {
		return Ok(Value::Float(value.number_value(scope).unwrap_or_default()));
	}
	if value.is_big_int() {
		let big = v8::Local::<v8::BigInt>::try_from(value)
			.map_err(|_| marshal_err("bigint cast failed"))?;
		let (signed, lossless) = big.i64_value();
		if lossless {
			return Ok(Value::Big(signed));
		}
		let (unsigned, lossless) = big.u64_value();
		if lossless {
			return Ok(Value::UBig(unsigned));
		}
		return Err(marshal_err("bigint exceeds 64 bit"));
	}
	if value.is_string() {
		return Ok(Value::String(value.to_rust_string_lossy(scope)));
	}
	if value.is_uint8_array() {
		let array = v8::Local::<v8::Uint8Array>::try_from(value)
			.map_err(|_| marshal_err("byte array cast failed"))?;
		let mut bytes = vec![0_u8; array.byte_length()];
		array.copy_contents(&mut bytes);
		return Ok(Value::Bytes(bytes));
	}
	if value.is_typed_array() {
		return Err(marshal_err("unsupported typed array"));
	}
	if value.is_array() {
		let array = v8::Local::<v8::Array>::try_from(value)
			.map_err(|_| marshal_err("array cast failed"))?;
		let length = array.length();
		let mut items = Vec::with_capacity(usize::try_from(length).unwrap_or_default());
		for index in 0..length {
			let element = array
				.get_index(scope, index)
				.ok_or_else(|| marshal_err("array element vanished"))?;
			items.push(from_js(scope, element)?);
		}
		return Ok(Value::List(items));
	}
	if value.is_function() {
		let func = v8::Local::<v8::Function>::try_from(value)
			.map_err(|_| marshal_err("function cast failed"))?;
		let id = objects().register(Arc::new(ScriptFunction {
			iso: current_iso_id(scope),
			func: v8::Global::new(scope, func),
		}));
		return Ok(Value::Handle(ObjectHandle::new(HandleKind::Function, id)));
	}
	if value.is_promise() {
		let promise = v8::Local::<v8::Promise>::try_from(value)
			.map_err(|_| marshal_err("promise cast failed"))?;
		let host = match promise.state() {
			v8::PromiseState::Pending => HostPromise::pending(),
			v8::PromiseState::Fulfilled => {
				let settled = promise.result(scope);
				HostPromise::resolved(from_js(scope, settled)?)
			}
			v8::PromiseState::Rejected => {
				let reason = promise.result(scope);
				HostPromise::rejected(reason.to_rust_string_lossy(scope))
			}
		};
		return Ok(Value::Promise(host));
	}
	if value.is_object() {
		let object = v8::Local::<v8::Object>::try_from(value)
			.map_err(|_| marshal_err("object cast failed"))?;

		// objects carrying a handle id cross back as opaque handles
		if let Some(key) = v8::String::new(scope, HANDLE_KEY) {
			if let Some(id) = object.get(scope, key.into()) {
				if id.is_string() {
					return Ok(Value::Handle(ObjectHandle::new(
						HandleKind::Object,
						id.to_rust_string_lossy(scope),
					)));
				}
			}
		}

		let Some(names) = object.get_own_property_names(scope, v8::GetPropertyNamesArgs::default())
		else {
			return Ok(Value::Map(HashMap::new()));
		};
		let mut map = HashMap::new();
		for index in 0..names.length() {
			let Some(name) = names.get_index(scope, index) else {
				continue;
			};
			let Some(element) = object.get(scope, name) else {
				continue;
			};
			map.insert(name.to_rust_string_lossy(scope), from_js(scope, element)?);
		}
		return Ok(Value::Map(map));
	}
	Err(marshal_err("unrecognized script value"))
}
// endregion:	--- from_js
