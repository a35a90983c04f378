/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::{
	collections::HashMap,
	sync::{
		Arc,
		atomic::{AtomicBool, Ordering},
	},
	thread::{self, JoinHandle},
	time::Duration,
};

use log::{debug, error, info};
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::{
	config::Config,
	entity::EntityRef,
	error::DaemonError,
	hypervisor::{GuestId, HypervisorRef},
	monitor::{GuestMonitor, GuestMonitorWorker},
	optional::Optional,
	worker::{Worker, join_timeout, register_worker},
};

const GUEST_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Tracks the guests currently running under the hypervisor and
/// owns their monitor lifecycles. An entry exists iff the
/// hypervisor listed the guest and its initial info call succeeded.
pub struct GuestManager {
	config: Config,
	hypervisor: HypervisorRef,
	running: Arc<AtomicBool>,

	guests: Mutex<HashMap<GuestId, GuestEntry>>,
	multi_thread: bool,
}

struct GuestEntry {
	monitor: Arc<GuestMonitor>,
	worker: Option<JoinHandle<()>>,
}

impl GuestManager {
	#[must_use]
	pub fn new(
		config: &Config,
		hypervisor: HypervisorRef,
		running: Arc<AtomicBool>,
	) -> Self {
		GuestManager {
			config: config.clone(),
			hypervisor,
			running,

			guests: Mutex::new(HashMap::new()),
			multi_thread: config.guest_manager_multi_thread,
		}
	}

	/// One discovery pass: spawn monitors for new guests, reap dead
	/// ones and, in cooperative mode, sample every live monitor.
	/// An unavailable hypervisor skips the whole tick.
	pub fn tick(&self) {
		let Optional::Present(ids) = self.hypervisor.get_vm_list() else {
			return;
		};

		self.spawn_guest_monitors(&ids);
		self.check_guests(&ids);

		if !self.multi_thread {
			self.collect_all();
		}
	}

	/// The monitor constructor may block on the hypervisor, so the
	/// untracked set is computed first and the registry lock is not
	/// held during construction.
	fn spawn_guest_monitors(&self, ids: &[GuestId]) {
		let tracked = {
			let guests = self.guests.lock();

			ids.iter()
				.filter(|id| !guests.contains_key(*id))
				.cloned()
				.collect::<Vec<GuestId>>()
		};

		for id in tracked {
			let Optional::Present(info) = self.hypervisor.get_vm_info(&id) else {
				error!("Failed to get guest:{id} information -- monitor can't start");
				continue;
			};

			let monitor = Arc::new(GuestMonitor::new(
				&self.config,
				&info,
				&self.hypervisor,
			));

			if !monitor.should_run() {
				continue;
			}

			let worker = self.multi_thread.then(|| {
				register_worker(GuestMonitorWorker::new(
					&monitor,
					self.running.clone(),
				))
			});

			let mut guests = self.guests.lock();

			if !guests.contains_key(&id) {
				debug!("added monitor for guest {id}");

				guests.insert(id, GuestEntry {
					monitor,
					worker,
				});
			}
		}
	}

	fn check_guests(&self, ids: &[GuestId]) {
		let mut guests = self.guests.lock();

		guests.retain(|id, entry| {
			let listed = ids.contains(id);

			match &entry.worker {
				// The worker has already exited; nothing to stop.
				Some(worker) if worker.is_finished() => {
					debug!("removed monitor for dead guest {id}");
					false
				},

				_ if !listed => {
					debug!("removed monitor for guest {id}");
					entry.monitor.terminate();
					false
				},

				_ => true,
			}
		});
	}

	fn collect_all(&self) {
		let guests = self.guests.lock();

		guests.par_iter().for_each(|(_, entry)| {
			if entry.monitor.should_run() {
				entry.monitor.collect();
			}
		});
	}

	/// Snapshot entities of all ready guest monitors, keyed by
	/// guest id.
	#[must_use]
	pub fn interrogate(&self) -> HashMap<GuestId, EntityRef> {
		let guests = self.guests.lock();

		guests
			.iter()
			.filter_map(|(id, entry)| {
				entry.monitor
					.interrogate()
					.map(|entity| (id.clone(), entity))
			})
			.collect()
	}

	#[must_use]
	pub fn active_guest_names(&self) -> Vec<String> {
		let guests = self.guests.lock();

		let mut names = guests
			.values()
			.filter(|entry| entry.monitor.is_ready())
			.filter_map(|entry| entry.monitor.guest_name())
			.collect::<Vec<String>>();

		names.sort();
		names
	}

	#[must_use]
	pub fn tracked_count(&self) -> usize {
		self.guests.lock().len()
	}

	/// Drains the registry, joining each worker briefly. A stuck
	/// worker is abandoned rather than blocking shutdown.
	pub fn shutdown(&self) {
		let drained = {
			let mut guests = self.guests.lock();
			guests.drain().collect::<Vec<(GuestId, GuestEntry)>>()
		};

		for (id, entry) in drained {
			entry.monitor.terminate();

			if let Some(worker) = entry.worker {
				if !join_timeout(worker, GUEST_JOIN_TIMEOUT) {
					debug!("abandoned monitor worker for guest {id}");
				}
			}
		}
	}
}

pub struct GuestManagerWorker {
	manager: Arc<GuestManager>,
	interval: Duration,
	running: Arc<AtomicBool>,
}

impl GuestManagerWorker {
	#[must_use]
	pub fn new(
		manager: Arc<GuestManager>,
		config: &Config,
		running: Arc<AtomicBool>,
	) -> Self {
		GuestManagerWorker {
			manager,
			interval: config.guest_manager_tick(),
			running,
		}
	}
}

impl Worker for GuestManagerWorker {
	fn run(&mut self) -> Result<(), DaemonError> {
		info!("Guest Manager starting");

		while self.running.load(Ordering::Relaxed) {
			self.manager.tick();
			thread::sleep(self.interval);
		}

		self.manager.shutdown();

		info!("Guest Manager ending");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::sync::{Arc, atomic::AtomicBool};

	use crate::{
		config::Config,
		hypervisor::mock::MockHypervisor,
		manager::GuestManager,
		policy::value::Value,
	};

	fn cooperative_manager(mock: &Arc<MockHypervisor>) -> GuestManager {
		let config = Config {
			guest_manager_multi_thread: false,
			..Config::default()
		};

		GuestManager::new(
			&config,
			mock.clone(),
			Arc::new(AtomicBool::new(true)),
		)
	}

	#[test]
	fn it_spawns_monitors_for_new_guests() {
		let mock = Arc::new(MockHypervisor::new());
		mock.add_default_vm("vm-1");
		mock.add_default_vm("vm-2");

		let manager = cooperative_manager(&mock);
		manager.tick();

		assert_eq!(manager.tracked_count(), 2);

		let entities = manager.interrogate();
		assert_eq!(entities.len(), 2);

		let entity = &entities["vm-1"];
		assert_eq!(entity.stat("mem_unused"), Value::Int(512));
	}

	#[test]
	fn it_reaps_guests_that_disappear() {
		let mock = Arc::new(MockHypervisor::new());
		mock.add_default_vm("vm-1");
		mock.add_default_vm("vm-2");

		let manager = cooperative_manager(&mock);
		manager.tick();
		assert_eq!(manager.tracked_count(), 2);

		mock.remove_vm("vm-2");
		manager.tick();

		assert_eq!(manager.tracked_count(), 1);
		assert!(manager.interrogate().contains_key("vm-1"));
	}

	#[test]
	fn it_skips_ticks_when_the_hypervisor_is_unavailable() {
		let mock = Arc::new(MockHypervisor::new());
		mock.add_default_vm("vm-1");

		let manager = cooperative_manager(&mock);
		manager.tick();
		assert_eq!(manager.tracked_count(), 1);

		mock.set_unavailable(true);
		manager.tick();

		// The tracked set is untouched while the list is missing.
		assert_eq!(manager.tracked_count(), 1);
	}

	#[test]
	fn it_ignores_guests_without_info() {
		let mock = Arc::new(MockHypervisor::new());

		mock.add_vm("vm-broken", crate::hypervisor::mock::MockVm::default());

		let manager = cooperative_manager(&mock);
		manager.tick();

		assert_eq!(manager.tracked_count(), 0);
	}

	#[test]
	fn it_lists_ready_guest_names() {
		let mock = Arc::new(MockHypervisor::new());
		mock.add_default_vm("1");
		mock.add_default_vm("2");

		let manager = cooperative_manager(&mock);
		manager.tick();

		assert_eq!(manager.active_guest_names(), ["vm-1", "vm-2"]);
	}

	#[test]
	fn it_drains_the_registry_on_shutdown() {
		let mock = Arc::new(MockHypervisor::new());
		mock.add_default_vm("vm-1");

		let manager = cooperative_manager(&mock);
		manager.tick();

		manager.shutdown();
		assert_eq!(manager.tracked_count(), 0);
	}
}
