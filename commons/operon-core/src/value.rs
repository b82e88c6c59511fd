// Copyright © 2024 Stephan Kunz

//! Module `value` provides the tagged value model shared between the host
//! world and embedded scripts.
//!
//! Container values reduce to either a JSON-encodable form or an explicit
//! tagged variant (bytes, wide integers, function handle, promise handle),
//! so nothing round-trips through textual JSON except the struct path.

// region:		--- modules
use crate::error::{Error, Result};
use core::fmt::{Debug, Display};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::{collections::HashMap, sync::Arc};
// endregion:	--- modules

// region:		--- HostFunction
/// Signature of a host callable exposed to scripts.
pub type HostFn = dyn Fn(Vec<Value>) -> Result<Value> + Send + Sync;

/// A host-authored callable that can cross into the script world.
#[derive(Clone)]
pub struct HostFunction(Arc<HostFn>);

impl Debug for HostFunction {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("HostFunction").finish_non_exhaustive()
	}
}

impl HostFunction {
	/// Wrap a host closure.
	pub fn new<F>(f: F) -> Self
	where
		F: Fn(Vec<Value>) -> Result<Value> + Send + Sync + 'static,
	{
		Self(Arc::new(f))
	}

	/// Invoke the wrapped closure.
	///
	/// # Errors
	///   Error is propagated from the closure
	pub fn call(&self, args: Vec<Value>) -> Result<Value> {
		(self.0)(args)
	}

	fn ptr_eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.0, &other.0)
	}
}
// endregion:	--- HostFunction

// region:		--- HostPromise
/// Settlement state of a [`HostPromise`].
#[derive(Debug, Clone, PartialEq)]
pub enum PromiseState {
	/// Not settled yet
	Pending,
	/// Settled with a value
	Resolved(Value),
	/// Settled with an error message
	Rejected(String),
}

/// A host-side promise cell.
///
/// Crossing the bridge it becomes a script `Promise` in the matching
/// settlement state.
#[derive(Debug, Clone)]
pub struct HostPromise(Arc<Mutex<PromiseState>>);

impl Default for HostPromise {
	fn default() -> Self {
		Self::pending()
	}
}

impl HostPromise {
	/// An unsettled promise.
	#[must_use]
	pub fn pending() -> Self {
		Self(Arc::new(Mutex::new(PromiseState::Pending)))
	}

	/// An already resolved promise.
	#[must_use]
	pub fn resolved(value: Value) -> Self {
		Self(Arc::new(Mutex::new(PromiseState::Resolved(value))))
	}

	/// An already rejected promise.
	#[must_use]
	pub fn rejected(message: impl Into<String>) -> Self {
		Self(Arc::new(Mutex::new(PromiseState::Rejected(message.into()))))
	}

	/// Settle with a value. Settling twice keeps the first settlement.
	pub fn resolve(&self, value: Value) {
		let mut state = self.0.lock();
		if matches!(*state, PromiseState::Pending) {
			*state = PromiseState::Resolved(value);
		}
	}

	/// Settle with an error message. Settling twice keeps the first settlement.
	pub fn reject(&self, message: impl Into<String>) {
		let mut state = self.0.lock();
		if matches!(*state, PromiseState::Pending) {
			*state = PromiseState::Rejected(message.into());
		}
	}

	/// Current settlement state.
	#[must_use]
	pub fn state(&self) -> PromiseState {
		self.0.lock().clone()
	}

	fn ptr_eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.0, &other.0)
	}
}
// endregion:	--- HostPromise

// region:		--- ObjectHandle
/// Kind of object an [`ObjectHandle`] refers to.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum HandleKind {
	/// A script function held on behalf of the host
	Function,
	/// A script promise held on behalf of the host
	Promise,
	/// An arbitrary host object held on behalf of scripts
	Object,
}

/// An opaque reference into the object registry.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ObjectHandle {
	/// Registry id of the referenced entry
	pub id: String,
	/// Kind of the referenced object
	pub kind: HandleKind,
}

impl ObjectHandle {
	/// Create a handle for a registry id.
	pub fn new(kind: HandleKind, id: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			kind,
		}
	}
}
// endregion:	--- ObjectHandle

// region:		--- Value
/// A host value that can cross the bridge in either direction.
#[derive(Debug, Clone, Default)]
pub enum Value {
	/// nothing
	#[default]
	Null,
	/// explicitly undefined (distinct from [`Value::Null`] on the script side)
	Undefined,
	/// boolean
	Bool(bool),
	/// signed integer up to 32 bit
	Int(i32),
	/// unsigned integer up to 32 bit
	UInt(u32),
	/// signed 64 bit integer, a `bigint` on the script side
	Big(i64),
	/// unsigned 64 bit integer, a `bigint` on the script side
	UBig(u64),
	/// floating point number
	Float(f64),
	/// string
	String(String),
	/// byte sequence, a `Uint8Array` on the script side
	Bytes(Vec<u8>),
	/// ordered list of values
	List(Vec<Value>),
	/// string-keyed map of values
	Map(HashMap<String, Value>),
	/// host callable
	Function(HostFunction),
	/// host promise
	Promise(HostPromise),
	/// opaque reference to a registered object
	Handle(ObjectHandle),
}

impl PartialEq for Value {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(Self::Null, Self::Null) | (Self::Undefined, Self::Undefined) => true,
			(Self::Bool(a), Self::Bool(b)) => a == b,
			(Self::Int(a), Self::Int(b)) => a == b,
			(Self::UInt(a), Self::UInt(b)) => a == b,
			(Self::Big(a), Self::Big(b)) => a == b,
			(Self::UBig(a), Self::UBig(b)) => a == b,
			(Self::Float(a), Self::Float(b)) => a == b,
			(Self::String(a), Self::String(b)) => a == b,
			(Self::Bytes(a), Self::Bytes(b)) => a == b,
			(Self::List(a), Self::List(b)) => a == b,
			(Self::Map(a), Self::Map(b)) => a == b,
			(Self::Function(a), Self::Function(b)) => a.ptr_eq(b),
			(Self::Promise(a), Self::Promise(b)) => a.ptr_eq(b),
			(Self::Handle(a), Self::Handle(b)) => a == b,
			_ => false,
		}
	}
}

impl Display for Value {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		match self {
			Self::Null => write!(f, "null"),
			Self::Undefined => write!(f, "undefined"),
			Self::Bool(v) => write!(f, "{v}"),
			Self::Int(v) => write!(f, "{v}"),
			Self::UInt(v) => write!(f, "{v}"),
			Self::Big(v) => write!(f, "{v}"),
			Self::UBig(v) => write!(f, "{v}"),
			Self::Float(v) => write!(f, "{v}"),
			Self::String(v) => write!(f, "{v}"),
			Self::Bytes(v) => write!(f, "<{} bytes>", v.len()),
			Self::List(v) => write!(f, "<list of {}>", v.len()),
			Self::Map(v) => write!(f, "<map of {}>", v.len()),
			Self::Function(_) => write!(f, "<function>"),
			Self::Promise(_) => write!(f, "<promise>"),
			Self::Handle(h) => write!(f, "<handle {}>", h.id),
		}
	}
}

impl Value {
	/// `true` for [`Value::Null`] and [`Value::Undefined`].
	#[must_use]
	pub const fn is_nil(&self) -> bool {
		matches!(self, Self::Null | Self::Undefined)
	}

	/// Borrow the contained string, if any.
	#[must_use]
	pub fn as_str(&self) -> Option<&str> {
		match self {
			Self::String(s) => Some(s),
			_ => None,
		}
	}

	/// The contained boolean, if any.
	#[must_use]
	pub const fn as_bool(&self) -> Option<bool> {
		match self {
			Self::Bool(b) => Some(*b),
			_ => None,
		}
	}

	/// The contained integer widened to 64 bit, if any.
	#[must_use]
	pub fn as_i64(&self) -> Option<i64> {
		match self {
			Self::Int(v) => Some(i64::from(*v)),
			Self::UInt(v) => Some(i64::from(*v)),
			Self::Big(v) => Some(*v),
			Self::UBig(v) => i64::try_from(*v).ok(),
			_ => None,
		}
	}

	/// The contained number as a float, if any.
	#[must_use]
	#[allow(clippy::cast_precision_loss)]
	pub fn as_f64(&self) -> Option<f64> {
		match self {
			Self::Int(v) => Some(f64::from(*v)),
			Self::UInt(v) => Some(f64::from(*v)),
			Self::Big(v) => Some(*v as f64),
			Self::UBig(v) => Some(*v as f64),
			Self::Float(v) => Some(*v),
			_ => None,
		}
	}

	/// Serialize any host struct into a [`Value`] via its JSON form.
	///
	/// # Errors
	///   if the struct is not JSON-encodable
	pub fn encode<T>(value: &T) -> Result<Self>
	where
		T: Serialize,
	{
		let json = serde_json::to_value(value).map_err(|source| Error::Validation {
			message: source.to_string(),
		})?;
		Ok(Self::from(json))
	}

	/// Deserialize a host struct from a [`Value`] via its JSON form.
	///
	/// # Errors
	///   if the value contains non-JSON variants or does not match `T`
	pub fn decode<T>(&self) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let json = serde_json::Value::try_from(self)?;
		serde_json::from_value(json)
			.map_err(|source| {
				Error::Validation {
					message: source.to_string(),
				}
				.into()
			})
	}
}

impl From<bool> for Value {
	fn from(value: bool) -> Self {
		Self::Bool(value)
	}
}

impl From<i8> for Value {
	fn from(value: i8) -> Self {
		Self::Int(i32::from(value))
	}
}

impl From<i16> for Value {
	fn from(value: i16) -> Self {
		Self::Int(i32::from(value))
	}
}

impl From<i32> for Value {
	fn from(value: i32) -> Self {
		Self::Int(value)
	}
}

impl From<u8> for Value {
	fn from(value: u8) -> Self {
		Self::UInt(u32::from(value))
	}
}

impl From<u16> for Value {
	fn from(value: u16) -> Self {
		Self::UInt(u32::from(value))
	}
}

impl From<u32> for Value {
	fn from(value: u32) -> Self {
		Self::UInt(value)
	}
}

impl From<i64> for Value {
	fn from(value: i64) -> Self {
		Self::Big(value)
	}
}

impl From<u64> for Value {
	fn from(value: u64) -> Self {
		Self::UBig(value)
	}
}

impl From<f32> for Value {
	fn from(value: f32) -> Self {
		Self::Float(f64::from(value))
	}
}

impl From<f64> for Value {
	fn from(value: f64) -> Self {
		Self::Float(value)
	}
}

impl From<&str> for Value {
	fn from(value: &str) -> Self {
		Self::String(value.into())
	}
}

impl From<String> for Value {
	fn from(value: String) -> Self {
		Self::String(value)
	}
}

impl From<Vec<u8>> for Value {
	fn from(value: Vec<u8>) -> Self {
		Self::Bytes(value)
	}
}

impl From<Vec<Self>> for Value {
	fn from(value: Vec<Self>) -> Self {
		Self::List(value)
	}
}

impl From<HashMap<String, Self>> for Value {
	fn from(value: HashMap<String, Self>) -> Self {
		Self::Map(value)
	}
}

impl From<serde_json::Value> for Value {
	fn from(value: serde_json::Value) -> Self {
		match value {
			serde_json::Value::Null => Self::Null,
			serde_json::Value::Bool(v) => Self::Bool(v),
			serde_json::Value::Number(n) => n.as_i64().map_or_else(
				|| {
					n.as_u64().map_or_else(
						|| Self::Float(n.as_f64().unwrap_or_default()),
						Self::UBig,
					)
				},
				|i| i32::try_from(i).map_or(Self::Big(i), Self::Int),
			),
			serde_json::Value::String(s) => Self::String(s),
			serde_json::Value::Array(items) => {
				Self::List(items.into_iter().map(Self::from).collect())
			}
			serde_json::Value::Object(map) => Self::Map(
				map.into_iter()
					.map(|(k, v)| (k, Self::from(v)))
					.collect(),
			),
		}
	}
}

impl TryFrom<&Value> for serde_json::Value {
	type Error = Box<dyn core::error::Error + Send + Sync + 'static>;

	fn try_from(value: &Value) -> Result<Self> {
		match value {
			Value::Null | Value::Undefined => Ok(Self::Null),
			Value::Bool(v) => Ok(Self::Bool(*v)),
			Value::Int(v) => Ok(Self::from(*v)),
			Value::UInt(v) => Ok(Self::from(*v)),
			Value::Big(v) => Ok(Self::from(*v)),
			Value::UBig(v) => Ok(Self::from(*v)),
			Value::Float(v) => Ok(serde_json::Number::from_f64(*v)
				.map_or(Self::Null, Self::Number)),
			Value::String(v) => Ok(Self::String(v.clone())),
			Value::Bytes(v) => Ok(Self::Array(
				v.iter().map(|b| Self::from(*b)).collect(),
			)),
			Value::List(items) => {
				let mut result = Vec::with_capacity(items.len());
				for item in items {
					result.push(Self::try_from(item)?);
				}
				Ok(Self::Array(result))
			}
			Value::Map(map) => {
				let mut result = serde_json::Map::with_capacity(map.len());
				for (k, v) in map {
					result.insert(k.clone(), Self::try_from(v)?);
				}
				Ok(Self::Object(result))
			}
			Value::Function(_) | Value::Promise(_) | Value::Handle(_) => {
				Err(Error::Validation {
					message: "value is not JSON-encodable".into(),
				}
				.into())
			}
		}
	}
}
// endregion:	--- Value
