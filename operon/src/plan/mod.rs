// Copyright © 2024 Stephan Kunz

//! Module `plan` provides the multi-wave task orchestrator.
//!
//! A plan runs its tasks in ascending wave order with a strict barrier
//! between waves: wave N+1 does not begin until every worker of wave N has
//! terminated. Within a wave, tasks run concurrently and may observe each
//! other's writes to the shared space. Lifecycle control works through
//! signals plus polling at the configured status check interval.

// region:		--- modules
/// The plan registry
pub mod registry;
/// Task and task context
pub mod task;

use crate::error::OperonError;
use futures::FutureExt;
use indexmap::IndexMap;
use operon_core::{
	error::{Error, Result},
	space::{EVENT_RELEASED, EVENT_TASK_COMPLETED, EVENT_TASK_ERROR, EVENT_TASK_STARTED},
	PlanState, SharedSpace, TaskSignal, TaskState, Value,
};
use operon_script::processes;
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, Level};

pub use task::{ArcTaskCallback, Task, TaskCallback, TaskContext};
// endregion:	--- modules

// region:		--- PlanOptions
/// The closed option set of a plan.
#[derive(Debug, Clone, Copy)]
pub struct PlanOptions {
	/// polling interval for signal acknowledgement
	pub status_check_interval: Duration,
}

impl Default for PlanOptions {
	fn default() -> Self {
		Self {
			status_check_interval: Duration::from_millis(10),
		}
	}
}
// endregion:	--- PlanOptions

// region:		--- PlanBuilder
/// Builder for a [`Plan`].
pub struct PlanBuilder {
	id: String,
	space: Option<Arc<SharedSpace>>,
	parent: Option<CancellationToken>,
	options: PlanOptions,
}

impl PlanBuilder {
	/// Use an existing shared space instead of a fresh one.
	#[must_use]
	pub fn space(mut self, space: Arc<SharedSpace>) -> Self {
		self.space = Some(space);
		self
	}

	/// Nest the plan's cancellation scope below `parent`.
	#[must_use]
	pub fn parent(mut self, parent: &CancellationToken) -> Self {
		self.parent = Some(parent.clone());
		self
	}

	/// Override the signal acknowledgement polling interval.
	#[must_use]
	pub const fn status_check_interval(mut self, interval: Duration) -> Self {
		self.options.status_check_interval = interval;
		self
	}

	/// Create the plan.
	#[must_use]
	pub fn build(self) -> Plan {
		let parent = self.parent.unwrap_or_default();
		Plan {
			id: self.id,
			space: self.space.unwrap_or_default(),
			state: RwLock::new(PlanState::Created),
			tasks: RwLock::new(IndexMap::new()),
			token: parent.child_token(),
			options: self.options,
		}
	}
}
// endregion:	--- PlanBuilder

// region:		--- Plan
/// A multi-wave task orchestrator over a shared space.
pub struct Plan {
	id: String,
	space: Arc<SharedSpace>,
	state: RwLock<PlanState>,
	tasks: RwLock<IndexMap<String, Arc<Task>>>,
	token: CancellationToken,
	options: PlanOptions,
}

impl core::fmt::Debug for Plan {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Plan")
			.field("id", &self.id)
			.field("state", &self.state())
			.field("tasks", &self.tasks.read().len())
			.finish_non_exhaustive()
	}
}

impl Plan {
	/// A builder for a plan with the given id.
	#[must_use]
	pub fn builder(id: impl Into<String>) -> PlanBuilder {
		PlanBuilder {
			id: id.into(),
			space: None,
			parent: None,
			options: PlanOptions::default(),
		}
	}

	/// The plan's id.
	#[must_use]
	pub fn id(&self) -> &str {
		&self.id
	}

	/// The plan's shared space.
	#[must_use]
	pub const fn space(&self) -> &Arc<SharedSpace> {
		&self.space
	}

	/// The plan's current state.
	#[must_use]
	pub fn state(&self) -> PlanState {
		*self.state.read()
	}

	/// Add a task under `id` at the given wave order.
	///
	/// # Errors
	///   if a task with the same id exists
	pub fn add_task(&self, id: impl Into<String>, wave: u32, callback: TaskCallback) -> Result<()> {
		let id = id.into();
		let mut tasks = self.tasks.write();
		if tasks.contains_key(&id) {
			return Err(Error::Duplicate {
				what: "task",
				id,
			}
			.into());
		}
		let task = Arc::new(Task::new(id.clone(), wave, callback, &self.token));
		tasks.insert(id, task);
		Ok(())
	}

	/// Add a task that resolves and executes a registered process.
	///
	/// The worker honors a pending pause or stop before it starts; the
	/// execution itself is one synchronous unit.
	///
	/// # Errors
	///   if a task with the same id exists
	pub fn add_process_task(
		&self,
		id: impl Into<String>,
		wave: u32,
		process: impl Into<String>,
		args: Vec<Value>,
	) -> Result<()> {
		let process = process.into();
		self.add_task(
			id,
			wave,
			Box::new(move |ctx: TaskContext| {
				let process = process.clone();
				let args = args.clone();
				async move {
					match ctx.try_signal() {
						Some(TaskSignal::Stop) => {
							return Err(Error::Cancelled {
								cause: "stopped before start".into(),
							}
							.into());
						}
						Some(TaskSignal::Pause) => {
							if ctx.pause_until_resumed().await == TaskSignal::Stop {
								return Err(Error::Cancelled {
									cause: "stopped while paused".into(),
								}
								.into());
							}
						}
						Some(TaskSignal::Resume) | None => {}
					}
					if ctx.is_cancelled() {
						return Err(Error::Cancelled {
							cause: "plan scope cancelled".into(),
						}
						.into());
					}

					let handle = processes().of(&process)?.with_token(ctx.token());
					let worker = tokio::task::spawn_blocking(move || handle.execute(args));
					worker.await.map_err(|source| Error::Worker {
						source: Box::new(source),
					})?
				}
				.boxed()
			}),
		)
	}

	/// Remove the task under `id`, stopping it when it runs.
	///
	/// Safe to call at any time.
	///
	/// # Errors
	///   if no task with the id exists
	pub fn remove_task(&self, id: &str) -> Result<()> {
		let task = self
			.tasks
			.write()
			.shift_remove(id)
			.ok_or_else(|| Error::NotFound {
				what: "task",
				id: id.to_string(),
			})?;
		if task.state() == TaskState::Running {
			task.try_send_signal(TaskSignal::Stop);
		}
		task.cancel();
		task.close_signals();
		Ok(())
	}

	/// Execute every wave in ascending order with a strict barrier.
	///
	/// # Errors
	///   the first worker error, or the cancellation cause when the scope
	///   was cancelled between waves
	#[instrument(level = Level::DEBUG, skip_all, fields(plan = %self.id))]
	pub async fn start(&self) -> Result<()> {
		{
			let mut state = self.state.write();
			match *state {
				PlanState::Created | PlanState::Paused => *state = PlanState::Running,
				other => {
					return Err(Error::State {
						operation: "start",
						state: other.to_string(),
					}
					.into());
				}
			}
		}

		let max_wave = self.tasks.read().values().map(|task| task.wave()).max();
		let Some(max_wave) = max_wave else {
			self.enter_terminal(PlanState::Completed);
			return Ok(());
		};

		for wave in 0..=max_wave {
			if self.token.is_cancelled() {
				self.enter_terminal(PlanState::Failed);
				return Err(Error::Cancelled {
					cause: "plan scope cancelled".into(),
				}
				.into());
			}

			let wave_tasks: Vec<Arc<Task>> = self
				.tasks
				.read()
				.values()
				.filter(|task| task.wave() == wave && !task.state().is_terminal())
				.cloned()
				.collect();
			if wave_tasks.is_empty() {
				continue;
			}
			debug!("wave {wave} with {} tasks", wave_tasks.len());

			let mut workers = JoinSet::new();
			for task in wave_tasks {
				workers.spawn(run_task(self.id.clone(), task, self.space.clone()));
			}

			// the barrier: every worker of this wave terminates here
			let mut first_error: Option<Box<dyn core::error::Error + Send + Sync>> = None;
			while let Some(joined) = workers.join_next().await {
				match joined {
					Ok((_, Ok(_))) => {}
					Ok((task_id, Err(error))) => {
						debug!("task {task_id} failed with {error}");
						if first_error.is_none() {
							first_error = Some(error);
						}
					}
					Err(error) => {
						if first_error.is_none() {
							first_error = Some(error.into());
						}
					}
				}
			}
			if let Some(error) = first_error {
				self.enter_terminal(PlanState::Failed);
				return Err(error);
			}
		}

		if self.state() == PlanState::Destroyed {
			return Err(Error::Cancelled {
				cause: "plan stopped".into(),
			}
			.into());
		}
		if self.token.is_cancelled() {
			self.enter_terminal(PlanState::Failed);
			return Err(Error::Cancelled {
				cause: "plan scope cancelled".into(),
			}
			.into());
		}
		self.enter_terminal(PlanState::Completed);
		Ok(())
	}

	/// Pause every running task and await the acknowledgements.
	///
	/// # Errors
	///   if the plan is not running
	#[instrument(level = Level::DEBUG, skip_all, fields(plan = %self.id))]
	pub async fn pause(&self) -> Result<()> {
		{
			let state = self.state.read();
			if *state != PlanState::Running {
				return Err(Error::State {
					operation: "pause",
					state: state.to_string(),
				}
				.into());
			}
		}

		self.signal_and_poll(TaskState::Running, TaskSignal::Pause, |state| {
			state != TaskState::Running
		})
		.await;

		let mut state = self.state.write();
		if *state == PlanState::Running {
			*state = PlanState::Paused;
		}
		Ok(())
	}

	/// Resume every paused task and await the acknowledgements.
	///
	/// # Errors
	///   if the plan is not paused
	#[instrument(level = Level::DEBUG, skip_all, fields(plan = %self.id))]
	pub async fn resume(&self) -> Result<()> {
		{
			let state = self.state.read();
			if *state != PlanState::Paused {
				return Err(Error::State {
					operation: "resume",
					state: state.to_string(),
				}
				.into());
			}
		}

		self.signal_and_poll(TaskState::Paused, TaskSignal::Resume, |state| {
			state != TaskState::Paused
		})
		.await;

		let mut state = self.state.write();
		if *state == PlanState::Paused {
			*state = PlanState::Running;
		}
		Ok(())
	}

	/// Stop every running or paused task, cancel the plan's scope and close
	/// all signal channels.
	///
	/// # Errors
	///   if the plan is already in a terminal state
	#[instrument(level = Level::DEBUG, skip_all, fields(plan = %self.id))]
	pub async fn stop(&self) -> Result<()> {
		{
			let state = self.state.read();
			if state.is_terminal() {
				return Err(Error::State {
					operation: "stop",
					state: state.to_string(),
				}
				.into());
			}
		}

		let targets: Vec<Arc<Task>> = self
			.tasks
			.read()
			.values()
			.filter(|task| {
				matches!(task.state(), TaskState::Running | TaskState::Paused)
			})
			.cloned()
			.collect();
		let interval = self.options.status_check_interval;
		let mut workers = JoinSet::new();
		for task in targets {
			workers.spawn(async move {
				let _ = task.send_signal(TaskSignal::Stop).await;
				while !task.state().is_terminal() {
					tokio::time::sleep(interval).await;
				}
			});
		}
		while workers.join_next().await.is_some() {}

		self.token.cancel();
		// stop wins against a concurrently finishing wave
		*self.state.write() = PlanState::Destroyed;
		for task in self.tasks.read().values() {
			task.close_signals();
		}
		Ok(())
	}

	/// Clear the shared space and drop all task references.
	///
	/// The plan must not be used afterwards.
	pub fn release(&self) {
		let _ = self.space.set(EVENT_RELEASED, Value::from(self.id.clone()));
		let _ = self.space.clear();
		self.tasks.write().clear();
		self.token.cancel();
		// release invalidates the plan whatever state it reached
		*self.state.write() = PlanState::Destroyed;
		let _ = registry::remove(&self.id);
	}

	/// Publish an event on the shared space.
	///
	/// # Errors
	///   reserved for future backing stores, currently always ok
	pub fn trigger(&self, event: impl Into<String>, data: Value) -> Result<()> {
		self.space.set(event, data)
	}

	/// Snapshot of the plan state and every task's state.
	#[must_use]
	pub fn status(&self) -> (PlanState, HashMap<String, TaskState>) {
		let tasks = self
			.tasks
			.read()
			.iter()
			.map(|(id, task)| (id.clone(), task.state()))
			.collect();
		(self.state(), tasks)
	}

	/// The state of the task under `id`.
	///
	/// # Errors
	///   if no task with the id exists
	pub fn task_status(&self, id: &str) -> Result<TaskState> {
		self.tasks
			.read()
			.get(id)
			.map(|task| task.state())
			.ok_or_else(|| {
				Error::NotFound {
					what: "task",
					id: id.to_string(),
				}
				.into()
			})
	}

	/// The opaque result data of the task under `id`.
	///
	/// # Errors
	///   if no task with the id exists
	pub fn task_data(&self, id: &str) -> Result<Option<Value>> {
		self.tasks
			.read()
			.get(id)
			.map(|task| task.data())
			.ok_or_else(|| {
				Error::NotFound {
					what: "task",
					id: id.to_string(),
				}
				.into()
			})
	}

	// Terminal states are absorbing.
	fn enter_terminal(&self, to: PlanState) {
		let mut state = self.state.write();
		if !state.is_terminal() {
			*state = to;
		}
	}

	// Send `signal` to every task in `from` and poll each at the status
	// check interval until `done` holds for its state.
	async fn signal_and_poll(
		&self,
		from: TaskState,
		signal: TaskSignal,
		done: fn(TaskState) -> bool,
	) {
		let targets: Vec<Arc<Task>> = self
			.tasks
			.read()
			.values()
			.filter(|task| task.state() == from)
			.cloned()
			.collect();
		let interval = self.options.status_check_interval;
		let mut workers = JoinSet::new();
		for task in targets {
			workers.spawn(async move {
				let _ = task.send_signal(signal).await;
				while !done(task.state()) && !task.state().is_terminal() {
					tokio::time::sleep(interval).await;
				}
			});
		}
		while workers.join_next().await.is_some() {}
	}
}

// Drive one task through its work callback and publish the outcome.
async fn run_task(
	plan_id: String,
	task: Arc<Task>,
	space: Arc<SharedSpace>,
) -> (String, Result<Value>) {
	task.set_state(TaskState::Running);
	let _ = space.set(EVENT_TASK_STARTED, event_payload(&plan_id, task.id(), None));

	let (callback, ctx) = task.worker_parts(space.clone());
	let result = {
		let mut callback = callback.lock().await;
		(*callback)(ctx).await
	};

	match &result {
		Ok(value) => {
			task.set_state(TaskState::Completed);
			task.set_data(Some(value.clone()));
			let _ = space.set(
				EVENT_TASK_COMPLETED,
				event_payload(&plan_id, task.id(), None),
			);
		}
		Err(error) => {
			task.set_state(TaskState::Failed);
			task.set_data(Some(Value::from(error.to_string())));
			let _ = space.set(
				EVENT_TASK_ERROR,
				event_payload(&plan_id, task.id(), Some(error.to_string())),
			);
		}
	}
	(task.id().to_string(), result)
}

fn event_payload(plan_id: &str, task_id: &str, error: Option<String>) -> Value {
	let mut map = HashMap::new();
	map.insert("plan".to_string(), Value::from(plan_id));
	map.insert("task".to_string(), Value::from(task_id));
	if let Some(error) = error {
		map.insert("error".to_string(), Value::from(error));
	}
	Value::Map(map)
}

/// Create a plan from a [`crate::config::Config`].
///
/// # Errors
///   if a plan with the same id is already registered
pub fn new_plan(
	parent: &CancellationToken,
	id: impl Into<String>,
	space: Arc<SharedSpace>,
	config: &crate::config::Config,
) -> core::result::Result<Arc<Plan>, OperonError> {
	let plan = Arc::new(
		Plan::builder(id)
			.space(space)
			.parent(parent)
			.status_check_interval(config.status_check_interval())
			.build(),
	);
	registry::register(plan.clone()).map_err(|error| OperonError::Plan(error.to_string()))?;
	Ok(plan)
}
// endregion:	--- Plan

#[cfg(test)]
mod tests {
	use super::*;
	use operon_script::ProcessRequest;
	use std::time::Instant;

	// check, that the auto traits are available
	const fn is_normal<T: Sized + Send + Sync>() {}

	#[test]
	const fn normal_types() {
		is_normal::<Plan>();
		is_normal::<PlanOptions>();
	}

	fn register_fixtures() {
		processes().register("plan-echo", |request: &ProcessRequest| {
			Ok(request.args.first().cloned().unwrap_or_default())
		});
		processes().register("plan-add", |request: &ProcessRequest| {
			let a = request.args.first().and_then(Value::as_i64).unwrap_or_default();
			let b = request.args.get(1).and_then(Value::as_i64).unwrap_or_default();
			Ok(Value::Int(i32::try_from(a + b).unwrap_or_default()))
		});
	}

	#[tokio::test]
	async fn two_waves_with_processes() {
		register_fixtures();
		let plan = Plan::builder("p-two-waves").build();
		plan.add_process_task("t1", 0, "plan-echo", vec![Value::from("hi")])
			.expect("add failed");
		plan.add_process_task("t2", 1, "plan-add", vec![Value::Int(1), Value::Int(2)])
			.expect("add failed");

		plan.start().await.expect("start failed");

		assert_eq!(plan.state(), PlanState::Completed);
		assert_eq!(plan.task_status("t1").expect("missing"), TaskState::Completed);
		assert_eq!(plan.task_status("t2").expect("missing"), TaskState::Completed);
		assert_eq!(plan.task_data("t2").expect("missing"), Some(Value::Int(3)));
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn tasks_of_a_wave_run_concurrently() {
		let plan = Plan::builder("p-concurrent").build();
		for id in ["a", "b", "c"] {
			plan.add_task(
				id,
				0,
				Box::new(|_ctx| {
					async {
						tokio::time::sleep(Duration::from_millis(300)).await;
						Ok(Value::Null)
					}
					.boxed()
				}),
			)
			.expect("add failed");
		}

		let started = Instant::now();
		plan.start().await.expect("start failed");
		assert!(started.elapsed() < Duration::from_millis(600));
	}

	#[tokio::test]
	async fn waves_are_barriers() {
		let plan = Plan::builder("p-barrier").build();
		plan.add_task(
			"producer",
			0,
			Box::new(|ctx: TaskContext| {
				async move {
					tokio::time::sleep(Duration::from_millis(50)).await;
					ctx.space().set("made", Value::Int(7))?;
					Ok(Value::Null)
				}
				.boxed()
			}),
		)
		.expect("add failed");
		plan.add_task(
			"consumer",
			1,
			Box::new(|ctx: TaskContext| {
				async move {
					// the producer's wave fully drained before this one began
					ctx.space()
						.get("made")
						.ok_or_else(|| {
							Error::NotFound {
								what: "key",
								id: "made".into(),
							}
							.into()
						})
				}
				.boxed()
			}),
		)
		.expect("add failed");

		plan.start().await.expect("start failed");
		assert_eq!(
			plan.task_data("consumer").expect("missing"),
			Some(Value::Int(7))
		);
	}

	#[tokio::test]
	async fn first_error_short_circuits() {
		let plan = Plan::builder("p-fail").build();
		plan.add_task(
			"bad",
			0,
			Box::new(|_ctx| {
				async {
					Err(Error::Validation {
						message: "broken".into(),
					}
					.into())
				}
				.boxed()
			}),
		)
		.expect("add failed");
		plan.add_task(
			"never",
			1,
			Box::new(|_ctx| async { Ok(Value::Null) }.boxed()),
		)
		.expect("add failed");

		let error = plan.start().await.expect_err("no error");
		assert!(error.to_string().contains("broken"));
		assert_eq!(plan.state(), PlanState::Failed);
		assert_eq!(plan.task_status("bad").expect("missing"), TaskState::Failed);
		// the second wave never began
		assert_eq!(plan.task_status("never").expect("missing"), TaskState::Created);
	}

	#[tokio::test]
	async fn duplicate_and_missing_task_ids() {
		let plan = Plan::builder("p-ids").build();
		plan.add_task("t", 0, Box::new(|_ctx| async { Ok(Value::Null) }.boxed()))
			.expect("add failed");
		assert!(plan
			.add_task("t", 1, Box::new(|_ctx| async { Ok(Value::Null) }.boxed()))
			.is_err());
		assert!(plan.remove_task("missing").is_err());
		plan.remove_task("t").expect("remove failed");
		assert!(plan.task_status("t").is_err());
	}

	#[tokio::test]
	async fn start_twice_is_rejected() {
		let plan = Arc::new(Plan::builder("p-twice").build());
		plan.add_task(
			"t",
			0,
			Box::new(|_ctx| {
				async {
					tokio::time::sleep(Duration::from_millis(100)).await;
					Ok(Value::Null)
				}
				.boxed()
			}),
		)
		.expect("add failed");

		let runner = {
			let plan = plan.clone();
			tokio::spawn(async move { plan.start().await })
		};
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert!(plan.start().await.is_err());
		runner.await.expect("join failed").expect("start failed");
		// terminal states are absorbing
		assert!(plan.start().await.is_err());
	}

	#[tokio::test]
	async fn parent_cancellation_fails_the_plan() {
		let parent = CancellationToken::new();
		let plan = Arc::new(Plan::builder("p-cancel").parent(&parent).build());
		plan.add_task(
			"slow",
			0,
			Box::new(|_ctx| {
				async {
					tokio::time::sleep(Duration::from_millis(50)).await;
					Ok(Value::Null)
				}
				.boxed()
			}),
		)
		.expect("add failed");
		plan.add_task(
			"never",
			1,
			Box::new(|_ctx| async { Ok(Value::Null) }.boxed()),
		)
		.expect("add failed");

		let runner = {
			let plan = plan.clone();
			tokio::spawn(async move { plan.start().await })
		};
		tokio::time::sleep(Duration::from_millis(10)).await;
		parent.cancel();

		let error = runner.await.expect("join failed").expect_err("no error");
		assert!(error.to_string().contains("cancelled"));
		assert_eq!(plan.state(), PlanState::Failed);
		assert_eq!(plan.task_status("never").expect("missing"), TaskState::Created);
	}

	#[tokio::test]
	async fn release_clears_everything() {
		register_fixtures();
		let plan = Plan::builder("p-release").build();
		let space = plan.space().clone();
		plan.add_process_task("t", 0, "plan-echo", vec![Value::Int(1)])
			.expect("add failed");
		plan.start().await.expect("start failed");
		assert!(!space.is_empty());

		plan.release();
		assert!(space.is_empty());
		assert!(plan.task_status("t").is_err());
		assert_eq!(plan.state(), PlanState::Destroyed);
	}

	#[tokio::test]
	async fn status_snapshot() {
		let plan = Plan::builder("p-status").build();
		plan.add_task("t", 0, Box::new(|_ctx| async { Ok(Value::Null) }.boxed()))
			.expect("add failed");
		let (state, tasks) = plan.status();
		assert_eq!(state, PlanState::Created);
		assert_eq!(tasks.get("t"), Some(&TaskState::Created));
	}
}
