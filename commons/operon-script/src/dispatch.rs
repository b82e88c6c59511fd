// Copyright © 2024 Stephan Kunz

//! Module `dispatch` runs a list of work items concurrently: `All` waits for
//! everyone, `Any` triggers on the first success, `Race` on the first
//! completion.
//!
//! Every worker runs behind a panic barrier; a panic becomes an error string
//! in the item's result slot and never propagates. The dispatcher joins every
//! worker before returning, even after a trigger fired. When the trigger
//! fires, the remaining items' cancellation tokens are cancelled so
//! cooperative processes can stop early.

// region:		--- modules
use crate::process::processes;
use crate::share::Share;
use operon_core::{
	error::{Error, Result},
	value::Value,
};
use std::{
	any::Any,
	collections::HashMap,
	panic::{catch_unwind, AssertUnwindSafe},
	string::ToString,
	sync::mpsc,
	thread,
};
use tokio_util::sync::CancellationToken;
use tracing::warn;
// endregion:	--- modules

// region:		--- types
/// Which completion triggers the early cancellation of the remaining items.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DispatchMode {
	/// no trigger, wait for everyone
	All,
	/// the first success with non-nil data
	Any,
	/// the first completion, success or failure
	Race,
}

/// One unit of work: a process name and its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
	/// name of the process to execute
	pub process: String,
	/// positional arguments
	pub args: Vec<Value>,
}

impl WorkItem {
	/// Create a work item.
	pub fn new(process: impl Into<String>, args: Vec<Value>) -> Self {
		Self {
			process: process.into(),
			args,
		}
	}

	/// Build a work item from a `{process, args}` map value.
	///
	/// # Errors
	///   if the value has no process name
	pub fn from_value(value: &Value) -> Result<Self> {
		let Value::Map(map) = value else {
			return Err(Error::Validation {
				message: "work item must be an object".into(),
			}
			.into());
		};
		let process = map
			.get("process")
			.or_else(|| map.get("name"))
			.and_then(Value::as_str)
			.ok_or_else(|| Error::Validation {
				message: "work item needs a process name".into(),
			})?
			.to_string();
		let args = match map.get("args") {
			Some(Value::List(items)) => items.clone(),
			None | Some(Value::Null) => Vec::new(),
			Some(other) => vec![other.clone()],
		};
		Ok(Self { process, args })
	}
}

/// Result slot of one work item.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResult {
	/// the process result, if the item succeeded
	pub data: Option<Value>,
	/// the failure diagnostic, if the item failed
	pub error: Option<String>,
	/// position of the item in the input list
	pub index: usize,
}

impl DispatchResult {
	/// The slot as a `{data, error?, index}` map value.
	#[must_use]
	pub fn to_value(&self) -> Value {
		let mut map = HashMap::new();
		map.insert(
			"data".to_string(),
			self.data.clone().unwrap_or(Value::Null),
		);
		if let Some(error) = &self.error {
			map.insert("error".to_string(), Value::from(error.clone()));
		}
		map.insert(
			"index".to_string(),
			Value::Int(i32::try_from(self.index).unwrap_or_default()),
		);
		Value::Map(map)
	}
}
// endregion:	--- types

// region:		--- dispatch
/// Run every item, wait for everyone.
#[must_use]
pub fn parallel_all(items: &[WorkItem], share: &Share) -> Vec<DispatchResult> {
	run(DispatchMode::All, items, share)
}

/// Run every item, cancel the rest once the first succeeds with non-nil
/// data, still wait for everyone.
#[must_use]
pub fn parallel_any(items: &[WorkItem], share: &Share) -> Vec<DispatchResult> {
	run(DispatchMode::Any, items, share)
}

/// Run every item, cancel the rest on the first completion, still wait for
/// everyone.
#[must_use]
pub fn parallel_race(items: &[WorkItem], share: &Share) -> Vec<DispatchResult> {
	run(DispatchMode::Race, items, share)
}

pub(crate) fn run(
	mode: DispatchMode,
	items: &[WorkItem],
	share: &Share,
) -> Vec<DispatchResult> {
	if items.is_empty() {
		return Vec::new();
	}

	let trigger = CancellationToken::new();
	let (tx, rx) = mpsc::channel::<DispatchResult>();
	let mut workers = Vec::with_capacity(items.len());

	for (index, item) in items.iter().enumerate() {
		let slot_tx = tx.clone();
		let item = item.clone();
		let share = share.clone();
		let token = trigger.child_token();
		let worker = thread::Builder::new()
			.name(format!("dispatch-{index}"))
			.spawn(move || {
				let outcome =
					catch_unwind(AssertUnwindSafe(|| execute_item(&item, &share, token)));
				let slot = match outcome {
					Ok(Ok(data)) => DispatchResult {
						data: Some(data),
						error: None,
						index,
					},
					Ok(Err(error)) => DispatchResult {
						data: None,
						error: Some(error.to_string()),
						index,
					},
					Err(payload) => DispatchResult {
						data: None,
						error: Some(panic_message(payload.as_ref())),
						index,
					},
				};
				let _ = slot_tx.send(slot);
			});
		match worker {
			Ok(handle) => workers.push(handle),
			Err(error) => {
				warn!("could not spawn dispatch worker: {error}");
				let _ = tx.send(DispatchResult {
					data: None,
					error: Some(error.to_string()),
					index,
				});
			}
		}
	}
	drop(tx);

	let mut slots: Vec<Option<DispatchResult>> = items.iter().map(|_| None).collect();
	let mut triggered = false;
	while let Ok(slot) = rx.recv() {
		let wins = match mode {
			DispatchMode::All => false,
			DispatchMode::Any => {
				slot.error.is_none() && slot.data.as_ref().is_some_and(|data| !data.is_nil())
			}
			DispatchMode::Race => true,
		};
		let index = slot.index;
		slots[index] = Some(slot);
		if wins && !triggered {
			triggered = true;
			trigger.cancel();
		}
	}

	// no leaks: every worker is joined, even after a trigger
	for worker in workers {
		let _ = worker.join();
	}

	slots
		.into_iter()
		.enumerate()
		.map(|(index, slot)| {
			slot.unwrap_or(DispatchResult {
				data: None,
				error: Some("worker vanished".to_string()),
				index,
			})
		})
		.collect()
}

fn execute_item(item: &WorkItem, share: &Share, token: CancellationToken) -> Result<Value> {
	let handle = processes()
		.of(&item.process)?
		.with_share(share)
		.with_token(token);
	handle.execute(item.args.clone())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
	payload.downcast_ref::<&str>().map_or_else(
		|| {
			payload
				.downcast_ref::<String>()
				.cloned()
				.unwrap_or_else(|| "unknown panic".to_string())
		},
		ToString::to_string,
	)
}
// endregion:	--- dispatch
