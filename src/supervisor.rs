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

use crossbeam_channel::Receiver;
use log::{error, info};

use crate::{
	config::Config,
	engine::{PolicyEngine, PolicyEngineWorker},
	error::DaemonError,
	hypervisor::HypervisorRef,
	manager::{GuestManager, GuestManagerWorker},
	monitor::{HostMonitor, HostMonitorWorker},
	rpc::{RpcClient, RpcEnvelope, RpcHandler, RpcServer, rpc_channel},
	worker::{join_timeout, register_worker},
};

const RPC_JOIN_TIMEOUT: Duration = Duration::from_secs(5);
const ENGINE_JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const MANAGER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);
const HOST_MONITOR_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds the worker hierarchy, watches its liveness and
/// coordinates shutdown. `run` blocks the calling thread until the
/// running flag drops, which happens on `shutdown` or when any
/// supervised worker dies.
pub struct Supervisor {
	config: Config,
	running: Arc<AtomicBool>,

	host_monitor: Arc<HostMonitor>,
	guest_manager: Arc<GuestManager>,
	engine: Arc<PolicyEngine>,

	rpc_client: RpcClient,
	rpc_listener: Option<Receiver<RpcEnvelope>>,
}

impl Supervisor {
	pub fn new(config: Config, hypervisor: HypervisorRef) -> Result<Self, DaemonError> {
		config.validate()?;

		let running = Arc::new(AtomicBool::new(true));

		let host_monitor = Arc::new(HostMonitor::new(&config, &hypervisor));

		let guest_manager = Arc::new(GuestManager::new(
			&config,
			hypervisor.clone(),
			running.clone(),
		));

		let engine = Arc::new(PolicyEngine::new(
			&config,
			&hypervisor,
			host_monitor.clone(),
			guest_manager.clone(),
		));

		let (rpc_client, rpc_listener) = rpc_channel();

		Ok(Supervisor {
			config,
			running,

			host_monitor,
			guest_manager,
			engine,

			rpc_client,
			rpc_listener: Some(rpc_listener),
		})
	}

	/// A handle for submitting RPC requests while `run` is active.
	#[must_use]
	pub fn rpc_client(&self) -> RpcClient {
		self.rpc_client.clone()
	}

	/// Shared flag that ends `run` when lowered; clone it before
	/// moving the supervisor onto its own thread.
	#[must_use]
	pub fn running_flag(&self) -> Arc<AtomicBool> {
		self.running.clone()
	}

	pub fn shutdown(&self) {
		self.running.store(false, Ordering::Relaxed);
	}

	pub fn run(&mut self) -> Result<(), DaemonError> {
		info!("Daemon starting");
		self.running.store(true, Ordering::Relaxed);

		let host_handle = register_worker(HostMonitorWorker::new(
			&self.host_monitor,
			&self.config,
			self.running.clone(),
		));

		let manager_handle = register_worker(GuestManagerWorker::new(
			self.guest_manager.clone(),
			&self.config,
			self.running.clone(),
		));

		let engine_handle = register_worker(PolicyEngineWorker::new(
			self.engine.clone(),
			&self.config,
			self.running.clone(),
		));

		let rpc_handle = self.rpc_listener.take().map(|listener| {
			let handler = RpcHandler::new(
				self.host_monitor.clone(),
				self.guest_manager.clone(),
				self.engine.clone(),
			);

			register_worker(RpcServer::new(
				listener,
				handler,
				self.running.clone(),
			))
		});

		while self.running.load(Ordering::Relaxed) {
			thread::sleep(self.config.main_loop_tick());

			if !self.running.load(Ordering::Relaxed) {
				break;
			}

			let worker_died = host_handle.is_finished()
				|| manager_handle.is_finished()
				|| engine_handle.is_finished()
				|| rpc_handle.as_ref().is_some_and(|handle| handle.is_finished());

			if worker_died {
				error!("A supervised thread has exited");
				self.running.store(false, Ordering::Relaxed);
			}
		}

		info!("Shutting down RPC server.");

		if let Some(handle) = rpc_handle {
			info!("Waiting for RPC server thread.");
			join_timeout(handle, RPC_JOIN_TIMEOUT);
		}

		info!("Waiting for policy engine thread.");
		join_timeout(engine_handle, ENGINE_JOIN_TIMEOUT);

		info!("Waiting for guest manager thread.");
		join_timeout(manager_handle, MANAGER_JOIN_TIMEOUT);

		info!("Waiting for host monitor thread.");
		join_timeout(host_handle, HOST_MONITOR_JOIN_TIMEOUT);

		info!("Daemon ending");
		Ok(())
	}
}
