/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::{
	sync::{
		Arc,
		atomic::{AtomicBool, Ordering},
	},
	thread,
	time::Duration,
};

use log::{error, info};

use crate::{
	collector::get_collectors,
	config::Config,
	entity::EntityRef,
	error::DaemonError,
	hypervisor::HypervisorRef,
	monitor::Monitor,
	policy::value::{Value, ValueMap},
	worker::Worker,
};

/// Periodic host-level statistics sampling on its own tick.
pub struct HostMonitor {
	monitor: Arc<Monitor>,
}

impl HostMonitor {
	#[must_use]
	pub fn new(config: &Config, hypervisor: &HypervisorRef) -> Self {
		let mut properties = ValueMap::new();

		// The monitor interval is visible to collectors that derive
		// per-second rates from it.
		properties.insert(
			"interval".into(),
			Value::Int(config.host_monitor_interval as i64),
		);

		let collectors = match get_collectors(
			&config.host_collectors,
			&properties,
			hypervisor,
		) {
			Ok(collectors) => collectors,

			Err(err) => {
				error!("Host Monitor initialization failed: {err}");
				Vec::new()
			},
		};

		let monitor = Monitor::new(
			"HostMonitor".into(),
			properties,
			collectors,
			config.sample_history_length,
		);

		HostMonitor {
			monitor: Arc::new(monitor),
		}
	}

	#[must_use]
	pub fn monitor(&self) -> &Arc<Monitor> {
		&self.monitor
	}

	#[must_use]
	pub fn interrogate(&self) -> Option<EntityRef> {
		self.monitor.interrogate()
	}

	#[must_use]
	pub fn is_ready(&self) -> bool {
		self.monitor.is_ready()
	}
}

pub struct HostMonitorWorker {
	monitor: Arc<Monitor>,
	interval: Duration,
	running: Arc<AtomicBool>,
}

impl HostMonitorWorker {
	#[must_use]
	pub fn new(
		host_monitor: &HostMonitor,
		config: &Config,
		running: Arc<AtomicBool>,
	) -> Self {
		HostMonitorWorker {
			monitor: host_monitor.monitor.clone(),
			interval: config.host_monitor_tick(),
			running,
		}
	}
}

impl Worker for HostMonitorWorker {
	fn run(&mut self) -> Result<(), DaemonError> {
		info!("Host Monitor starting");

		while self.running.load(Ordering::Relaxed) && self.monitor.should_run() {
			self.monitor.collect();
			thread::sleep(self.interval);
		}

		info!("Host Monitor ending");
		Ok(())
	}
}
