/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::{
	thread::{self, JoinHandle},
	time::{Duration, Instant},
};

use log::error;

use crate::error::DaemonError;

pub trait Worker
where
	Self: 'static + Send,
{
	fn run(&mut self) -> Result<(), DaemonError>;
}

pub fn register_worker(mut worker: impl Worker) -> JoinHandle<()> {
	thread::spawn(move || {
		if let Err(err) = worker.run() {
			error!("Worker crashed: {err}");
		}
	})
}

/// Joins a worker thread, giving up after the timeout. Stuck workers
/// are abandoned; the process is expected to be supervised
/// externally.
pub fn join_timeout(handle: JoinHandle<()>, timeout: Duration) -> bool {
	let deadline = Instant::now() + timeout;

	while !handle.is_finished() {
		if Instant::now() >= deadline {
			return false;
		}

		thread::sleep(Duration::from_millis(50));
	}

	handle.join().is_ok()
}
