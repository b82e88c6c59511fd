// Copyright © 2024 Stephan Kunz

//! Module `pool` provides isolate acquisition under two policies.
//!
//! `Standard` hands out a fresh isolate per acquire and disposes it on
//! release. `Performance` keeps a bounded pool: lazy growth up to `max_size`,
//! shrink back toward `min_size` on release, and eviction of isolates whose
//! heap estimate exceeds `heap_available_size` before the next acquire
//! returns one.
//!
//! An isolate is never shared: `select_iso` moves it to the caller, `unlock`
//! moves it back, so double release is unrepresentable.

// region:		--- modules
use crate::runtime::{GlobalsInstaller, Iso};
use core::fmt::Debug;
use operon_core::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::{
	collections::VecDeque,
	sync::OnceLock,
	time::{Duration, Instant},
};
use tracing::{debug, instrument, Level};
// endregion:	--- modules

// region:		--- configuration
/// Pool policy, fixed at startup.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum PoolMode {
	/// fresh isolate per acquire, disposed on release
	#[default]
	Standard,
	/// bounded pool with reuse and health eviction
	Performance,
}

/// Sizing of the pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
	/// the policy
	pub mode: PoolMode,
	/// idle isolates kept around under the performance policy
	pub min_size: usize,
	/// upper bound of concurrently live isolates under the performance policy
	pub max_size: usize,
	/// heap estimate above which an isolate is evicted
	pub heap_available_size: usize,
	/// hard per-isolate heap ceiling, set at creation time (0: engine default)
	pub heap_size_limit: usize,
}

impl Default for PoolConfig {
	fn default() -> Self {
		Self {
			mode: PoolMode::Standard,
			min_size: 2,
			max_size: 10,
			heap_available_size: 524_288_000,
			heap_size_limit: 1_518_338_048,
		}
	}
}
// endregion:	--- configuration

// region:		--- IsoPool
struct PoolInner {
	idle: VecDeque<Iso>,
	total: usize,
	stopped: bool,
}

/// Isolate pool, one per process.
pub struct IsoPool {
	config: PoolConfig,
	installers: Vec<GlobalsInstaller>,
	inner: Mutex<PoolInner>,
	available: Condvar,
}

impl Debug for IsoPool {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("IsoPool")
			.field("mode", &self.config.mode)
			.field("total", &self.inner.lock().total)
			.finish_non_exhaustive()
	}
}

impl IsoPool {
	/// Create a pool with the base globals only.
	#[must_use]
	pub fn new(config: PoolConfig) -> Self {
		Self::with_installers(config, Vec::new())
	}

	/// Create a pool whose isolates carry additional globals.
	#[must_use]
	pub fn with_installers(config: PoolConfig, installers: Vec<GlobalsInstaller>) -> Self {
		let mut idle = VecDeque::new();
		if config.mode == PoolMode::Performance {
			for _ in 0..config.min_size {
				idle.push_back(Iso::new(config.heap_size_limit, &installers));
			}
		}
		let total = idle.len();
		Self {
			config,
			installers,
			inner: Mutex::new(PoolInner {
				idle,
				total,
				stopped: false,
			}),
			available: Condvar::new(),
		}
	}

	/// The pool's configuration.
	#[must_use]
	pub const fn config(&self) -> &PoolConfig {
		&self.config
	}

	/// Acquire an isolate within `timeout`.
	///
	/// # Errors
	///   [`Error::Timeout`] when the deadline passes, [`Error::State`] when
	///   the pool was stopped
	#[instrument(level = Level::TRACE, skip_all)]
	pub fn select_iso(&self, timeout: Duration) -> Result<Iso> {
		if self.config.mode == PoolMode::Standard {
			return Ok(Iso::new(self.config.heap_size_limit, &self.installers));
		}

		let deadline = Instant::now() + timeout;
		let mut inner = self.inner.lock();
		loop {
			if inner.stopped {
				return Err(Error::State {
					operation: "select_iso",
					state: "stopped".into(),
				}
				.into());
			}

			// unhealthy isolates are removed before an acquire returns
			while let Some(iso) = inner.idle.pop_front() {
				if iso.healthy() && iso.heap_used() <= self.config.heap_available_size {
					return Ok(iso);
				}
				debug!("evicting isolate {}", iso.id());
				inner.total -= 1;
				drop(iso);
			}

			if inner.total < self.config.max_size {
				inner.total += 1;
				drop(inner);
				return Ok(Iso::new(self.config.heap_size_limit, &self.installers));
			}

			let remaining = deadline.saturating_duration_since(Instant::now());
			if remaining.is_zero() {
				return Err(Error::Timeout { waited: timeout }.into());
			}
			let _ = self.available.wait_for(&mut inner, remaining);
		}
	}

	/// Return an isolate to the pool.
	#[instrument(level = Level::TRACE, skip_all)]
	pub fn unlock(&self, mut iso: Iso) {
		if self.config.mode == PoolMode::Standard {
			drop(iso);
			return;
		}

		if iso.update_heap() > self.config.heap_available_size {
			iso.mark_unhealthy();
		}

		let mut inner = self.inner.lock();
		if inner.stopped || !iso.healthy() || inner.idle.len() >= self.config.min_size {
			inner.total -= 1;
			drop(iso);
		} else {
			inner.idle.push_back(iso);
		}
		drop(inner);
		self.available.notify_one();
	}

	/// Tear down all idle isolates and refuse further acquisition.
	pub fn stop(&self) {
		let mut inner = self.inner.lock();
		inner.stopped = true;
		let drained = inner.idle.len();
		inner.idle.clear();
		inner.total -= drained;
		drop(inner);
		self.available.notify_all();
	}

	/// Number of idle isolates.
	#[must_use]
	pub fn idle_count(&self) -> usize {
		self.inner.lock().idle.len()
	}

	/// Number of live isolates, idle or handed out.
	#[must_use]
	pub fn total_count(&self) -> usize {
		self.inner.lock().total
	}
}

/// Initialize the process-wide pool. Fails when called twice.
///
/// # Errors
///   [`Error::Duplicate`] when a pool was already initialized
pub fn init_pool(config: PoolConfig, installers: Vec<GlobalsInstaller>) -> Result<&'static IsoPool> {
	let pool = global_pool();
	let mut initialized = false;
	let pool = pool.get_or_init(|| {
		initialized = true;
		IsoPool::with_installers(config, installers)
	});
	if initialized {
		Ok(pool)
	} else {
		Err(Error::Duplicate {
			what: "isolate pool",
			id: "global".into(),
		}
		.into())
	}
}

/// The process-wide pool, if initialized.
#[must_use]
pub fn pool() -> Option<&'static IsoPool> {
	global_pool().get()
}

fn global_pool() -> &'static OnceLock<IsoPool> {
	static POOL: OnceLock<IsoPool> = OnceLock::new();
	&POOL
}
// endregion:	--- IsoPool

#[cfg(test)]
mod tests {
	use super::*;

	// check, that the auto traits are available
	const fn is_normal<T: Sized + Send + Sync>() {}

	#[test]
	const fn normal_types() {
		is_normal::<IsoPool>();
		is_normal::<PoolConfig>();
	}

	#[test]
	fn standard_hands_out_fresh_isolates() {
		let pool = IsoPool::new(PoolConfig::default());
		let a = pool.select_iso(Duration::from_millis(10)).expect("select failed");
		let b = pool.select_iso(Duration::from_millis(10)).expect("select failed");
		assert_ne!(a.id(), b.id());
		pool.unlock(a);
		pool.unlock(b);
		assert_eq!(pool.idle_count(), 0);
	}

	#[test]
	fn performance_reuses_isolates() {
		let config = PoolConfig {
			mode: PoolMode::Performance,
			min_size: 1,
			max_size: 2,
			heap_size_limit: 0,
			..PoolConfig::default()
		};
		let pool = IsoPool::new(config);
		assert_eq!(pool.idle_count(), 1);

		let a = pool.select_iso(Duration::from_millis(100)).expect("select failed");
		let id = a.id().to_string();
		pool.unlock(a);
		let b = pool.select_iso(Duration::from_millis(100)).expect("select failed");
		assert_eq!(b.id(), id);
		pool.unlock(b);
	}

	#[test]
	fn performance_acquire_deadline() {
		let config = PoolConfig {
			mode: PoolMode::Performance,
			min_size: 0,
			max_size: 1,
			heap_size_limit: 0,
			..PoolConfig::default()
		};
		let pool = IsoPool::new(config);
		let held = pool.select_iso(Duration::from_millis(100)).expect("select failed");

		let started = Instant::now();
		let error = pool
			.select_iso(Duration::from_millis(50))
			.expect_err("no deadline error");
		assert!(started.elapsed() >= Duration::from_millis(50));
		assert!(error.to_string().contains("deadline"));

		pool.unlock(held);
		let again = pool.select_iso(Duration::from_millis(100)).expect("select failed");
		pool.unlock(again);
	}

	#[test]
	fn unhealthy_isolates_are_evicted() {
		let config = PoolConfig {
			mode: PoolMode::Performance,
			min_size: 1,
			max_size: 2,
			heap_size_limit: 0,
			..PoolConfig::default()
		};
		let pool = IsoPool::new(config);
		let mut iso = pool.select_iso(Duration::from_millis(100)).expect("select failed");
		let id = iso.id().to_string();
		iso.mark_unhealthy();
		pool.unlock(iso);
		assert_eq!(pool.total_count(), 0);

		let fresh = pool.select_iso(Duration::from_millis(100)).expect("select failed");
		assert_ne!(fresh.id(), id);
		pool.unlock(fresh);
	}

	#[test]
	fn stopped_pool_refuses() {
		let config = PoolConfig {
			mode: PoolMode::Performance,
			min_size: 1,
			max_size: 2,
			heap_size_limit: 0,
			..PoolConfig::default()
		};
		let pool = IsoPool::new(config);
		pool.stop();
		assert_eq!(pool.total_count(), 0);
		assert!(pool.select_iso(Duration::from_millis(10)).is_err());
	}
}
