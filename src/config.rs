/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::{
	path::PathBuf,
	time::Duration,
};

use serde::{Serialize, Deserialize};

use crate::error::DaemonError;

/// Runtime configuration for the daemon. How the values get here
/// (command line, config file) is the embedder's business; the
/// defaults below are usable as-is against a local hypervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	/// Supervisor liveness-check tick, in seconds.
	pub main_loop_interval: u64,

	/// HostMonitor sampling tick, in seconds.
	pub host_monitor_interval: u64,

	/// GuestManager discovery tick, in seconds.
	pub guest_manager_interval: u64,

	/// GuestMonitor sampling tick in threaded mode, in seconds.
	pub guest_monitor_interval: u64,

	/// PolicyEngine evaluation tick, in seconds.
	pub policy_engine_interval: u64,

	/// Capacity of each monitor's statistics ring.
	pub sample_history_length: usize,

	/// Path to a single policy file. Mutually exclusive with
	/// `policy_dir`.
	pub policy: Option<PathBuf>,

	/// Directory of `*.policy` fragments loaded in lexicographic
	/// order. Mutually exclusive with `policy`.
	pub policy_dir: Option<PathBuf>,

	/// Comma-separated controller names, dispatched in this order.
	pub controllers: String,

	/// Comma-separated collector names for the host monitor.
	pub host_collectors: String,

	/// Comma-separated collector names for each guest monitor.
	pub guest_collectors: String,

	/// When set, each guest gets a dedicated monitor thread;
	/// otherwise the guest manager collects cooperatively on its
	/// own tick.
	pub guest_manager_multi_thread: bool,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			main_loop_interval: 5,
			host_monitor_interval: 5,
			guest_manager_interval: 5,
			guest_monitor_interval: 5,
			policy_engine_interval: 10,
			sample_history_length: 10,

			policy: None,
			policy_dir: None,

			controllers: String::from("Balloon"),
			host_collectors: String::from("HostMemory"),
			guest_collectors: String::from("GuestMemory"),

			guest_manager_multi_thread: true,
		}
	}
}

impl Config {
	/// Only one of `policy` and `policy_dir` may be supplied.
	pub fn validate(&self) -> Result<(), DaemonError> {
		if self.policy.is_some() && self.policy_dir.is_some() {
			return Err(DaemonError::Config(
				"only one of 'policy' and 'policy-dir' may be specified".into()
			));
		}

		Ok(())
	}

	#[must_use]
	pub fn main_loop_tick(&self) -> Duration {
		Duration::from_secs(self.main_loop_interval)
	}

	#[must_use]
	pub fn host_monitor_tick(&self) -> Duration {
		Duration::from_secs(self.host_monitor_interval)
	}

	#[must_use]
	pub fn guest_manager_tick(&self) -> Duration {
		Duration::from_secs(self.guest_manager_interval)
	}

	#[must_use]
	pub fn guest_monitor_tick(&self) -> Duration {
		Duration::from_secs(self.guest_monitor_interval)
	}

	#[must_use]
	pub fn policy_engine_tick(&self) -> Duration {
		Duration::from_secs(self.policy_engine_interval)
	}
}
