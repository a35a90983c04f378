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
	hypervisor::{GuestInfo, HypervisorRef},
	monitor::Monitor,
	policy::value::{Value, ValueMap},
	worker::Worker,
};

/// Statistics sampling for one running guest. In threaded mode a
/// dedicated `GuestMonitorWorker` drives it; in cooperative mode
/// the guest manager calls `collect` on its own tick.
pub struct GuestMonitor {
	monitor: Arc<Monitor>,
	interval: Duration,
}

impl GuestMonitor {
	#[must_use]
	pub fn new(config: &Config, info: &GuestInfo, hypervisor: &HypervisorRef) -> Self {
		let mut properties = ValueMap::new();
		properties.insert("uuid".into(), Value::from(info.uuid.clone()));
		properties.insert("name".into(), Value::from(info.name.clone()));

		if let Some(pid) = info.pid {
			properties.insert("pid".into(), Value::Int(i64::from(pid)));
		}

		let collectors = match get_collectors(
			&config.guest_collectors,
			&properties,
			hypervisor,
		) {
			Ok(collectors) => collectors,

			Err(err) => {
				error!("Guest Monitor initialization failed: {err}");
				Vec::new()
			},
		};

		let monitor = Monitor::new(
			format!("GuestMonitor-{}", info.name),
			properties,
			collectors,
			config.sample_history_length,
		);

		GuestMonitor {
			monitor: Arc::new(monitor),
			interval: config.guest_monitor_tick(),
		}
	}

	#[must_use]
	pub fn monitor(&self) -> &Arc<Monitor> {
		&self.monitor
	}

	pub fn collect(&self) {
		self.monitor.collect();
	}

	#[must_use]
	pub fn interrogate(&self) -> Option<EntityRef> {
		self.monitor.interrogate()
	}

	#[must_use]
	pub fn is_ready(&self) -> bool {
		self.monitor.is_ready()
	}

	#[must_use]
	pub fn should_run(&self) -> bool {
		self.monitor.should_run()
	}

	pub fn terminate(&self) {
		self.monitor.terminate();
	}

	/// Structured access to the guest name without touching the
	/// hypervisor interface.
	#[must_use]
	pub fn guest_name(&self) -> Option<String> {
		match self.monitor.properties().get("name") {
			Some(Value::Str(name)) => Some(name.clone()),
			_ => None,
		}
	}
}

pub struct GuestMonitorWorker {
	monitor: Arc<Monitor>,
	interval: Duration,
	running: Arc<AtomicBool>,
	label: String,
}

impl GuestMonitorWorker {
	#[must_use]
	pub fn new(guest_monitor: &GuestMonitor, running: Arc<AtomicBool>) -> Self {
		let label = guest_monitor
			.guest_name()
			.map_or_else(|| String::from("guest"), |name| format!("guest:{name}"));

		GuestMonitorWorker {
			monitor: guest_monitor.monitor.clone(),
			interval: guest_monitor.interval,
			running,
			label,
		}
	}
}

impl Worker for GuestMonitorWorker {
	fn run(&mut self) -> Result<(), DaemonError> {
		info!("{} starting", self.label);

		while self.running.load(Ordering::Relaxed) && self.monitor.should_run() {
			self.monitor.collect();
			thread::sleep(self.interval);
		}

		info!("{} ending", self.label);
		Ok(())
	}
}
