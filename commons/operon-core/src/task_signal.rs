// Copyright © 2024 Stephan Kunz

//! Signals delivered to a task's private channel.
//!
//! Every task owns a 1-buffered channel: one unread signal is always absorbed
//! without blocking the sender, a second one blocks until the task consumed
//! the first.

// region:		--- modules
use core::fmt::Display;
use tokio::sync::{
	mpsc::{Receiver, Sender},
	Mutex,
};
// endregion:	--- modules

// region:		--- types
/// Capacity of a task's signal channel.
pub const SIGNAL_CHANNEL_CAPACITY: usize = 1;

/// Sending side of a task's signal channel.
pub type SignalSender = Sender<TaskSignal>;
/// Receiving side of a task's signal channel.
pub type SignalReceiver = Receiver<TaskSignal>;

/// Create the signal channel for one task.
#[must_use]
pub fn signal_channel() -> (SignalSender, SignalReceiver) {
	tokio::sync::mpsc::channel(SIGNAL_CHANNEL_CAPACITY)
}
// endregion:	--- types

// region:		--- TaskSignal
/// Requests a plan can make towards a running task.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TaskSignal {
	/// Stop doing progress work, switch the own state to `Paused` and wait
	Pause,
	/// Switch the own state back to `Running` and continue
	Resume,
	/// Return promptly, with a cancellation error or ok
	Stop,
}

impl Display for TaskSignal {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		match self {
			Self::Pause => write!(f, "Pause"),
			Self::Resume => write!(f, "Resume"),
			Self::Stop => write!(f, "Stop"),
		}
	}
}

/// Wait for the next [`TaskSignal`] on a shared receiver.
///
/// Returns [`None`] once the sending side is gone.
pub async fn wait_for_task_signal(rx: &Mutex<SignalReceiver>) -> Option<TaskSignal> {
	rx.lock().await.recv().await
}

/// Non-blocking probe for a pending [`TaskSignal`].
pub fn try_task_signal(rx: &Mutex<SignalReceiver>) -> Option<TaskSignal> {
	rx.try_lock().ok().and_then(|mut rx| rx.try_recv().ok())
}
// endregion:	--- TaskSignal
