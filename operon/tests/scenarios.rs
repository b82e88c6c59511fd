// Copyright © 2024 Stephan Kunz

//! End to end scenarios over the public surface.

use futures::FutureExt;
use operon::prelude::*;
use std::sync::mpsc;
use std::time::{Duration, Instant};

fn register_fixtures() {
	processes().register("it-echo", |request: &ProcessRequest| {
		Ok(request.args.first().cloned().unwrap_or_default())
	});
	processes().register("it-add", |request: &ProcessRequest| {
		let a = request.args.first().and_then(Value::as_i64).unwrap_or_default();
		let b = request.args.get(1).and_then(Value::as_i64).unwrap_or_default();
		Ok(Value::Int(i32::try_from(a + b).unwrap_or_default()))
	});
}

#[tokio::test]
async fn plan_with_two_waves() {
	register_fixtures();
	let plan = Plan::builder("it-two-waves").build();
	plan.add_process_task("t1", 0, "it-echo", vec![Value::from("hi")])
		.expect("add failed");
	plan.add_process_task("t2", 1, "it-add", vec![Value::Int(1), Value::Int(2)])
		.expect("add failed");

	plan.start().await.expect("start failed");

	assert_eq!(plan.task_status("t1").expect("missing"), TaskState::Completed);
	assert_eq!(plan.task_status("t2").expect("missing"), TaskState::Completed);
	assert_eq!(plan.task_data("t2").expect("missing"), Some(Value::Int(3)));
}

#[tokio::test(flavor = "multi_thread")]
async fn parallel_wave_timing() {
	let plan = Plan::builder("it-timing").build();
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
	assert!(
		started.elapsed() < Duration::from_millis(600),
		"wave did not run concurrently"
	);
}

#[tokio::test(flavor = "multi_thread")]
async fn pause_resume_stop_lifecycle() {
	let plan = Arc::new(
		Plan::builder("it-lifecycle")
			.status_check_interval(Duration::from_millis(5))
			.build(),
	);
	plan.add_task(
		"looper",
		0,
		Box::new(|ctx: TaskContext| {
			async move {
				loop {
					if ctx.is_cancelled() {
						return Ok(Value::Null);
					}
					match ctx.try_signal() {
						Some(TaskSignal::Stop) => return Ok(Value::Null),
						Some(TaskSignal::Pause) => {
							if ctx.pause_until_resumed().await == TaskSignal::Stop {
								return Ok(Value::Null);
							}
						}
						Some(TaskSignal::Resume) | None => {}
					}
					tokio::time::sleep(Duration::from_millis(5)).await;
				}
			}
			.boxed()
		}),
	)
	.expect("add failed");

	let runner = {
		let plan = plan.clone();
		tokio::spawn(async move { plan.start().await })
	};
	tokio::time::sleep(Duration::from_millis(30)).await;
	assert_eq!(plan.state(), PlanState::Running);

	let paused_at = Instant::now();
	plan.pause().await.expect("pause failed");
	assert!(paused_at.elapsed() < Duration::from_millis(100));
	assert_eq!(plan.state(), PlanState::Paused);
	assert_eq!(plan.task_status("looper").expect("missing"), TaskState::Paused);

	plan.resume().await.expect("resume failed");
	assert_eq!(plan.state(), PlanState::Running);
	assert_eq!(plan.task_status("looper").expect("missing"), TaskState::Running);

	plan.stop().await.expect("stop failed");
	assert_eq!(plan.state(), PlanState::Destroyed);
	assert!(plan.task_status("looper").expect("missing").is_terminal());

	// the start worker has returned as well
	let _ = runner.await.expect("join failed");
}

#[test]
fn subscription_fan_out() {
	let space = SharedSpace::new();
	let (tx1, rx1) = mpsc::channel();
	let (tx2, rx2) = mpsc::channel();
	for tx in [tx1, tx2] {
		space
			.subscribe(
				"k",
				Box::new(move |key, value| {
					let _ = tx.send((key.to_string(), value.cloned()));
					Ok(())
				}),
			)
			.expect("subscribe failed");
	}

	space.set("k", Value::from("v1")).expect("set failed");
	for rx in [&rx1, &rx2] {
		let (key, value) = rx
			.recv_timeout(Duration::from_millis(100))
			.expect("no notification");
		assert_eq!((key.as_str(), value), ("k", Some(Value::from("v1"))));
	}

	space.delete("k").expect("delete failed");
	for rx in [&rx1, &rx2] {
		let (_, value) = rx
			.recv_timeout(Duration::from_millis(100))
			.expect("no notification");
		assert_eq!(value, None);
	}

	space.unsubscribe("k").expect("unsubscribe failed");
	space.set("k", Value::from("v2")).expect("set failed");
	assert!(rx1.recv_timeout(Duration::from_millis(100)).is_err());
	assert!(rx2.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn dispatch_ordering_from_script() {
	register_fixtures();
	let mut iso = Iso::new(0, &[]);
	let result = iso
		.eval(
			r"
			const out = All([
				{process: 'it-echo', args: ['a']},
				{process: 'it-echo', args: ['b']},
				{process: 'it-add', args: [1, 2]},
			]);
			out.map((r) => [r.data, r.index])
			",
		)
		.expect("eval failed");
	assert_eq!(
		result,
		Value::List(vec![
			Value::List(vec![Value::from("a"), Value::Int(0)]),
			Value::List(vec![Value::from("b"), Value::Int(1)]),
			Value::List(vec![Value::Int(3), Value::Int(2)]),
		])
	);
}

#[test]
fn use_releases_exactly_once_under_exception() {
	let mut iso = Iso::new(0, &[]);
	let result = iso
		.eval(
			r"
			globalThis.counter = 0;
			function Ctor() {
				this.__release = function () { globalThis.counter += 1; };
			}
			let caught = '';
			try {
				Use(Ctor, (o) => { throw 'e'; });
			} catch (err) {
				caught = err;
			}
			[caught, globalThis.counter]
			",
		)
		.expect("eval failed");
	assert_eq!(result, Value::List(vec![Value::from("e"), Value::Int(1)]));
}

#[test]
fn scripted_plan_over_the_pool() {
	register_fixtures();
	let config = Config::default();
	let pool = script_pool(&config).expect("pool failed");

	let mut iso = pool
		.select_iso(Duration::from_millis(500))
		.expect("select failed");
	let share = Share {
		sid: "it-session".into(),
		..Share::default()
	};
	iso.set_share(&share).expect("set_share failed");

	let result = iso
		.eval(
			r"
			const p = Plan('it-scripted');
			p.Add('one', 0, 'it-echo', 'x');
			p.Run();
			const data = p.TaskData('one');
			p.Release();
			data
			",
		)
		.expect("eval failed");
	assert_eq!(result, Value::from("x"));

	pool.unlock(iso);
	pool.stop();
}

#[tokio::test]
async fn snapshot_restore_is_observationally_identical() {
	let space = Arc::new(SharedSpace::new());
	space.set("a", Value::Int(1)).expect("set failed");
	space.set("b", Value::from("two")).expect("set failed");

	let snapshot = space.snapshot();
	space.set("a", Value::Int(99)).expect("set failed");
	space.restore(Some(snapshot.clone())).expect("restore failed");

	assert_eq!(space.snapshot(), snapshot);
}
