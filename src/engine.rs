/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::{
	fs,
	path::Path,
	sync::{
		Arc,
		atomic::{AtomicBool, Ordering},
	},
	thread,
	time::Duration,
};

use log::{error, info, warn};
use parking_lot::Mutex;

use crate::{
	config::Config,
	controller::{Controller, get_controllers},
	entity::EntityRef,
	error::DaemonError,
	hypervisor::HypervisorRef,
	manager::GuestManager,
	monitor::HostMonitor,
	policy::PolicyStore,
	worker::Worker,
};

/// Per-tick orchestrator: samples host and guest entities, runs the
/// policy over them and feeds the outputs to the controllers.
pub struct PolicyEngine {
	config: Config,

	host_monitor: Arc<HostMonitor>,
	guest_manager: Arc<GuestManager>,
	store: Arc<PolicyStore>,

	controllers: Mutex<Vec<Box<dyn Controller>>>,
}

impl PolicyEngine {
	#[must_use]
	pub fn new(
		config: &Config,
		hypervisor: &HypervisorRef,
		host_monitor: Arc<HostMonitor>,
		guest_manager: Arc<GuestManager>,
	) -> Self {
		let engine = PolicyEngine {
			config: config.clone(),

			host_monitor,
			guest_manager,
			store: Arc::new(PolicyStore::new()),

			controllers: Mutex::new(get_controllers(&config.controllers, hypervisor)),
		};

		engine.load_policy();
		engine
	}

	#[must_use]
	pub fn store(&self) -> &Arc<PolicyStore> {
		&self.store
	}

	/// Loads the configured policy file or directory into the
	/// store. Missing configuration is not an error; the store then
	/// evaluates its `"0"` placeholder.
	pub fn load_policy(&self) -> bool {
		if let Some(path) = &self.config.policy {
			return self.read_policy(path, None);
		}

		if let Some(dir) = &self.config.policy_dir {
			return self.load_policy_dir(dir);
		}

		true
	}

	fn read_policy(&self, path: &Path, name: Option<&str>) -> bool {
		let text = match fs::read_to_string(path) {
			Ok(text) => text,

			Err(err) => {
				warn!("Unable to read policy file {}: {err}", path.display());
				return false;
			},
		};

		self.store.set_policy(name, Some(&text))
	}

	fn load_policy_dir(&self, dir: &Path) -> bool {
		let entries = match fs::read_dir(dir) {
			Ok(entries) => entries,

			Err(err) => {
				warn!("Unable to read directory {}: {err}", dir.display());
				return false;
			},
		};

		let mut names = entries
			.filter_map(|entry| entry.ok())
			.filter_map(|entry| entry.file_name().into_string().ok())
			.filter(|name| !name.starts_with('.') && name.ends_with(".policy"))
			.collect::<Vec<String>>();

		names.sort();

		for name in names {
			let fragment = name.trim_end_matches(".policy").to_owned();
			self.read_policy(&dir.join(&name), Some(&fragment));
		}

		true
	}

	pub fn rpc_reset_policy(&self) -> bool {
		self.store.clear();
		self.load_policy()
	}

	#[must_use]
	pub fn rpc_get_policy(&self) -> String {
		self.store.get_string()
	}

	pub fn rpc_set_policy(&self, text: &str) -> bool {
		self.store.set_policy(None, Some(text))
	}

	pub fn rpc_set_named_policy(&self, name: &str, text: Option<&str>) -> bool {
		self.store.set_policy(Some(name), text)
	}

	/// One control tick. Controllers observe exactly the snapshot
	/// the evaluator ran against, and a failing controller does not
	/// stop the ones after it.
	pub fn do_controls(&self) {
		let Some(host) = self.host_monitor.interrogate() else {
			return;
		};

		let entities = self.guest_manager.interrogate();

		let mut ids = entities.keys().cloned().collect::<Vec<String>>();
		ids.sort();

		let guests = ids
			.iter()
			.filter_map(|id| entities.get(id).cloned())
			.collect::<Vec<EntityRef>>();

		if !self.store.evaluate(&host, &guests) {
			return;
		}

		let mut controllers = self.controllers.lock();

		for controller in controllers.iter_mut() {
			if let Err(err) = controller.process(&host, &guests) {
				error!("Controller {} failed: {err}", controller.name());
			}
		}
	}
}

pub struct PolicyEngineWorker {
	engine: Arc<PolicyEngine>,
	interval: Duration,
	running: Arc<AtomicBool>,
}

impl PolicyEngineWorker {
	#[must_use]
	pub fn new(
		engine: Arc<PolicyEngine>,
		config: &Config,
		running: Arc<AtomicBool>,
	) -> Self {
		PolicyEngineWorker {
			engine,
			interval: config.policy_engine_tick(),
			running,
		}
	}
}

impl Worker for PolicyEngineWorker {
	fn run(&mut self) -> Result<(), DaemonError> {
		info!("Policy Engine starting");

		while self.running.load(Ordering::Relaxed) {
			thread::sleep(self.interval);

			if !self.running.load(Ordering::Relaxed) {
				break;
			}

			self.engine.do_controls();
		}

		info!("Policy Engine ending");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::{
		fs,
		sync::{Arc, atomic::AtomicBool},
	};

	use tempfile::tempdir;

	use crate::{
		config::Config,
		engine::PolicyEngine,
		hypervisor::{HypervisorRef, mock::MockHypervisor},
		manager::GuestManager,
		monitor::HostMonitor,
	};

	fn engine_fixture(
		config: Config,
		mock: &Arc<MockHypervisor>,
	) -> (PolicyEngine, Arc<HostMonitor>, Arc<GuestManager>) {
		let hypervisor: HypervisorRef = mock.clone();
		let running = Arc::new(AtomicBool::new(true));

		let host_monitor = Arc::new(HostMonitor::new(&config, &hypervisor));

		let guest_manager = Arc::new(GuestManager::new(
			&config,
			hypervisor.clone(),
			running,
		));

		let engine = PolicyEngine::new(
			&config,
			&hypervisor,
			host_monitor.clone(),
			guest_manager.clone(),
		);

		(engine, host_monitor, guest_manager)
	}

	fn tick_config() -> Config {
		Config {
			host_collectors: String::from("HostTime"),
			guest_collectors: String::from("GuestMemory, GuestBalloon"),
			guest_manager_multi_thread: false,
			controllers: String::from("Balloon"),
			..Config::default()
		}
	}

	#[test]
	fn it_dispatches_policy_outputs_to_controllers() {
		let mock = Arc::new(MockHypervisor::new());
		mock.add_default_vm("vm-1");

		let (engine, host_monitor, guest_manager) =
			engine_fixture(tick_config(), &mock);

		let ok = engine.rpc_set_policy("
			(with Guests guest
				(guest.SetControl \"balloon_target\"
					(/ (guest.Stat \"balloon_cur\") 2)))
		");

		assert!(ok);

		host_monitor.monitor().collect();
		guest_manager.tick();
		engine.do_controls();

		assert_eq!(mock.balloon_targets(), [(String::from("vm-1"), 512)]);
	}

	#[test]
	fn it_skips_ticks_without_a_host_sample() {
		let mock = Arc::new(MockHypervisor::new());
		mock.add_default_vm("vm-1");

		let (engine, _host_monitor, guest_manager) =
			engine_fixture(tick_config(), &mock);

		engine.rpc_set_policy("
			(with Guests guest (guest.SetControl \"balloon_target\" 1))
		");

		guest_manager.tick();
		engine.do_controls();

		assert!(mock.balloon_targets().is_empty());
	}

	#[test]
	fn it_skips_controllers_on_policy_errors() {
		let mock = Arc::new(MockHypervisor::new());
		mock.add_default_vm("vm-1");

		let (engine, host_monitor, guest_manager) =
			engine_fixture(tick_config(), &mock);

		assert!(engine.rpc_set_policy("(+ 1 undefined_symbol)"));

		host_monitor.monitor().collect();
		guest_manager.tick();
		engine.do_controls();

		assert!(mock.balloon_targets().is_empty());
	}

	#[test]
	fn it_loads_policy_fragments_from_a_directory() {
		let dir = tempdir().unwrap();

		fs::write(dir.path().join("10_first.policy"), "(+ 1 1)").unwrap();
		fs::write(dir.path().join("20_second.policy"), "(- 1 1)").unwrap();
		fs::write(dir.path().join(".hidden.policy"), "(bad")
			.unwrap();
		fs::write(dir.path().join("notes.txt"), "not a policy").unwrap();

		let config = Config {
			policy_dir: Some(dir.path().to_path_buf()),
			..tick_config()
		};

		let mock = Arc::new(MockHypervisor::new());
		let (engine, _, _) = engine_fixture(config, &mock);

		assert_eq!(engine.rpc_get_policy(), "(+ 1 1)\n(- 1 1)");

		let strings = engine.store().get_strings();
		assert!(strings.contains_key("10_first"));
		assert!(strings.contains_key("20_second"));
	}

	#[test]
	fn it_reloads_policies_on_reset() {
		let dir = tempdir().unwrap();
		fs::write(dir.path().join("10_first.policy"), "(+ 1 1)").unwrap();

		let config = Config {
			policy_dir: Some(dir.path().to_path_buf()),
			..tick_config()
		};

		let mock = Arc::new(MockHypervisor::new());
		let (engine, _, _) = engine_fixture(config, &mock);

		engine.rpc_set_named_policy("50_extra", Some("(* 2 2)"));
		assert_eq!(engine.store().get_strings().len(), 2);

		assert!(engine.rpc_reset_policy());
		assert_eq!(engine.rpc_get_policy(), "(+ 1 1)");
	}
}
