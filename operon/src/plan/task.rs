// Copyright © 2024 Stephan Kunz

//! Module `task` provides the `Task` of a plan and the `TaskContext` handed
//! to its work callback.
//!
//! Every task owns a private 1-buffered signal channel and a cancellation
//! scope strictly nested within its plan's. The work callback cooperates:
//! it watches the signal stream and the scope and reacts promptly.

// region:		--- modules
use futures::future::BoxFuture;
use operon_core::{
	error::{Error, Result},
	task_signal::{signal_channel, try_task_signal, wait_for_task_signal, SignalReceiver, SignalSender},
	SharedSpace, TaskSignal, TaskState, Value,
};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
// endregion:	--- modules

// region:		--- types
/// Type definition for a task's work callback
pub type TaskCallback =
	Box<dyn FnMut(TaskContext) -> BoxFuture<'static, Result<Value>> + Send + Sync>;
/// Type definition for a task's atomic reference counted work callback
pub type ArcTaskCallback = Arc<tokio::sync::Mutex<TaskCallback>>;
// endregion:	--- types

// region:		--- TaskContext
/// Everything a work callback may touch while it runs.
#[derive(Clone)]
pub struct TaskContext {
	token: CancellationToken,
	space: Arc<SharedSpace>,
	signals: Arc<tokio::sync::Mutex<SignalReceiver>>,
	state: Arc<RwLock<TaskState>>,
}

impl core::fmt::Debug for TaskContext {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("TaskContext")
			.field("state", &self.state())
			.finish_non_exhaustive()
	}
}

impl TaskContext {
	/// The shared space of the plan.
	#[must_use]
	pub const fn space(&self) -> &Arc<SharedSpace> {
		&self.space
	}

	/// A clone of the task's cancellation scope.
	#[must_use]
	pub fn token(&self) -> CancellationToken {
		self.token.clone()
	}

	/// Whether the task's scope was cancelled.
	#[must_use]
	pub fn is_cancelled(&self) -> bool {
		self.token.is_cancelled()
	}

	/// Wait until the task's scope is cancelled.
	pub async fn cancelled(&self) {
		self.token.cancelled().await;
	}

	/// Non-blocking probe of the signal stream.
	#[must_use]
	pub fn try_signal(&self) -> Option<TaskSignal> {
		try_task_signal(&self.signals)
	}

	/// Wait for the next signal. [`None`] once the channel is closed.
	pub async fn next_signal(&self) -> Option<TaskSignal> {
		wait_for_task_signal(&self.signals).await
	}

	/// The task's current state.
	#[must_use]
	pub fn state(&self) -> TaskState {
		*self.state.read()
	}

	/// Update the task's state.
	pub fn set_state(&self, state: TaskState) {
		*self.state.write() = state;
	}

	/// Acknowledge a pause request: switch to `Paused`, park until `Resume`
	/// or `Stop` arrives, switch back to `Running` on `Resume`.
	///
	/// Returns the signal that ended the park. A closed channel or a
	/// cancelled scope count as [`TaskSignal::Stop`].
	pub async fn pause_until_resumed(&self) -> TaskSignal {
		self.set_state(TaskState::Paused);
		loop {
			tokio::select! {
				signal = self.next_signal() => match signal {
					Some(TaskSignal::Resume) => {
						self.set_state(TaskState::Running);
						return TaskSignal::Resume;
					}
					Some(TaskSignal::Stop) | None => return TaskSignal::Stop,
					Some(TaskSignal::Pause) => {}
				},
				() = self.cancelled() => return TaskSignal::Stop,
			}
		}
	}
}
// endregion:	--- TaskContext

// region:		--- Task
/// One unit of work within a plan.
pub struct Task {
	id: String,
	wave: u32,
	callback: ArcTaskCallback,
	state: Arc<RwLock<TaskState>>,
	data: Arc<RwLock<Option<Value>>>,
	signal_tx: Mutex<Option<SignalSender>>,
	signals: Arc<tokio::sync::Mutex<SignalReceiver>>,
	token: CancellationToken,
}

impl core::fmt::Debug for Task {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Task")
			.field("id", &self.id)
			.field("wave", &self.wave)
			.field("state", &self.state())
			.finish_non_exhaustive()
	}
}

impl Task {
	/// Create a task whose cancellation scope is a child of `parent`.
	#[must_use]
	pub fn new(
		id: impl Into<String>,
		wave: u32,
		callback: TaskCallback,
		parent: &CancellationToken,
	) -> Self {
		let (tx, rx) = signal_channel();
		Self {
			id: id.into(),
			wave,
			callback: Arc::new(tokio::sync::Mutex::new(callback)),
			state: Arc::new(RwLock::new(TaskState::Created)),
			data: Arc::new(RwLock::new(None)),
			signal_tx: Mutex::new(Some(tx)),
			signals: Arc::new(tokio::sync::Mutex::new(rx)),
			token: parent.child_token(),
		}
	}

	/// The task's id.
	#[must_use]
	pub fn id(&self) -> &str {
		&self.id
	}

	/// The task's wave order.
	#[must_use]
	pub const fn wave(&self) -> u32 {
		self.wave
	}

	/// The task's current state.
	#[must_use]
	pub fn state(&self) -> TaskState {
		*self.state.read()
	}

	/// The task's opaque result data.
	#[must_use]
	pub fn data(&self) -> Option<Value> {
		self.data.read().clone()
	}

	pub(crate) fn set_state(&self, state: TaskState) {
		*self.state.write() = state;
	}

	pub(crate) fn set_data(&self, data: Option<Value>) {
		*self.data.write() = data;
	}

	/// Enqueue a signal, waiting while the single buffer slot is taken.
	///
	/// # Errors
	///   if the channel was closed
	pub(crate) async fn send_signal(&self, signal: TaskSignal) -> Result<()> {
		let tx = self.signal_tx.lock().clone();
		match tx {
			Some(tx) => tx.send(signal).await.map_err(|_| {
				Error::State {
					operation: "send_signal",
					state: "closed".into(),
				}
				.into()
			}),
			None => Err(Error::State {
				operation: "send_signal",
				state: "closed".into(),
			}
			.into()),
		}
	}

	/// Enqueue a signal without waiting, dropping it when the slot is taken.
	pub(crate) fn try_send_signal(&self, signal: TaskSignal) {
		if let Some(tx) = self.signal_tx.lock().as_ref() {
			let _ = tx.try_send(signal);
		}
	}

	/// Close the signal channel; further sends fail.
	pub(crate) fn close_signals(&self) {
		self.signal_tx.lock().take();
	}

	/// Cancel the task's scope.
	pub(crate) fn cancel(&self) {
		self.token.cancel();
	}

	/// The pieces a worker needs to drive this task.
	pub(crate) fn worker_parts(&self, space: Arc<SharedSpace>) -> (ArcTaskCallback, TaskContext) {
		(
			self.callback.clone(),
			TaskContext {
				token: self.token.clone(),
				space,
				signals: self.signals.clone(),
				state: self.state.clone(),
			},
		)
	}
}
// endregion:	--- Task

#[cfg(test)]
mod tests {
	use super::*;

	// check, that the auto traits are available
	const fn is_normal<T: Sized + Send + Sync>() {}

	#[test]
	const fn normal_types() {
		is_normal::<Task>();
		is_normal::<TaskContext>();
	}

	#[tokio::test]
	async fn scope_is_nested() {
		let parent = CancellationToken::new();
		let task = Task::new(
			"t",
			0,
			Box::new(|_ctx| Box::pin(async { Ok(Value::Null) })),
			&parent,
		);
		let (_, ctx) = task.worker_parts(Arc::new(SharedSpace::new()));
		assert!(!ctx.is_cancelled());
		parent.cancel();
		assert!(ctx.is_cancelled());
	}

	#[tokio::test]
	async fn closed_channel_rejects_signals() {
		let parent = CancellationToken::new();
		let task = Task::new(
			"t",
			0,
			Box::new(|_ctx| Box::pin(async { Ok(Value::Null) })),
			&parent,
		);
		task.close_signals();
		assert!(task.send_signal(TaskSignal::Pause).await.is_err());
	}

	#[tokio::test]
	async fn pause_resume_round_trip() {
		let parent = CancellationToken::new();
		let task = Task::new(
			"t",
			0,
			Box::new(|_ctx| Box::pin(async { Ok(Value::Null) })),
			&parent,
		);
		let (_, ctx) = task.worker_parts(Arc::new(SharedSpace::new()));

		task.send_signal(TaskSignal::Resume).await.expect("send failed");
		let parked = tokio::spawn(async move { ctx.pause_until_resumed().await });
		let ended = parked.await.expect("join failed");
		assert_eq!(ended, TaskSignal::Resume);
		assert_eq!(task.state(), TaskState::Running);
	}
}
