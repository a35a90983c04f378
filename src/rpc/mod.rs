/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

pub mod codec;

use std::{
	collections::BTreeMap,
	sync::{
		Arc,
		atomic::{AtomicBool, Ordering},
	},
	time::Duration,
};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use log::{info, warn};

use crate::{
	engine::PolicyEngine,
	entity::Sample,
	error::DaemonError,
	manager::GuestManager,
	monitor::HostMonitor,
	policy::value::ValueMap,
	worker::Worker,
};

pub use crate::rpc::codec::{CodecError, decode_statistics, encode_statistics};

/// The daemon's request surface. The wire transport is the
/// embedder's concern; requests arrive over a channel with a reply
/// sender attached.
#[derive(Debug, Clone)]
pub enum Request {
	Ping,
	GetStatistics,
	GetActiveGuests,
	GetPolicy,
	SetPolicy(String),
	GetNamedPolicies,
	SetNamedPolicy {
		name: String,
		text: Option<String>,
	},
	ResetPolicies,
	SetVerbosity(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
	Bool(bool),
	Text(String),
	Names(Vec<String>),
	Policies(BTreeMap<String, String>),
	Statistics(StatisticsPayload),
}

/// The latest host sample plus the latest sample of every ready
/// guest, keyed by guest name.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsPayload {
	pub host: Sample,
	pub guests: BTreeMap<String, Sample>,
}

pub type RpcEnvelope = (Request, Sender<Response>);

pub struct RpcHandler {
	host_monitor: Arc<HostMonitor>,
	guest_manager: Arc<GuestManager>,
	engine: Arc<PolicyEngine>,
}

impl RpcHandler {
	#[must_use]
	pub fn new(
		host_monitor: Arc<HostMonitor>,
		guest_manager: Arc<GuestManager>,
		engine: Arc<PolicyEngine>,
	) -> Self {
		RpcHandler {
			host_monitor,
			guest_manager,
			engine,
		}
	}

	pub fn dispatch(&self, request: &Request) -> Response {
		match request {
			Request::Ping => {
				info!("ping()");
				Response::Bool(true)
			},

			Request::GetStatistics => {
				info!("getStatistics()");
				Response::Statistics(self.statistics())
			},

			Request::GetActiveGuests => {
				info!("getActiveGuests()");
				Response::Names(self.guest_manager.active_guest_names())
			},

			Request::GetPolicy => {
				info!("getPolicy()");
				Response::Text(self.engine.rpc_get_policy())
			},

			Request::SetPolicy(text) => {
				info!("setPolicy()");
				Response::Bool(self.engine.rpc_set_policy(text))
			},

			Request::GetNamedPolicies => {
				info!("getNamedPolicies()");
				Response::Policies(self.engine.store().get_strings())
			},

			Request::SetNamedPolicy { name, text } => {
				info!("setNamedPolicy()");
				Response::Bool(self.engine.rpc_set_named_policy(name, text.as_deref()))
			},

			Request::ResetPolicies => {
				info!("resetPolicies()");
				Response::Bool(self.engine.rpc_reset_policy())
			},

			Request::SetVerbosity(level) => {
				info!("setVerbosity()");
				Response::Bool(set_verbosity(level))
			},
		}
	}

	fn statistics(&self) -> StatisticsPayload {
		let host = self.host_monitor
			.interrogate()
			.and_then(|entity| entity.latest_sample().cloned())
			.unwrap_or(Sample {
				timestamp: 0,
				fields: ValueMap::new(),
			});

		let guests = self.guest_manager
			.interrogate()
			.into_values()
			.filter_map(|entity| {
				let name = entity.name()?;
				let sample = entity.latest_sample().cloned()?;

				Some((name, sample))
			})
			.collect();

		StatisticsPayload {
			host,
			guests,
		}
	}
}

fn set_verbosity(level: &str) -> bool {
	let level = match level.to_lowercase().as_str() {
		"debug" => log::LevelFilter::Debug,
		"info" => log::LevelFilter::Info,
		"warn" | "warning" => log::LevelFilter::Warn,
		"error" | "critical" => log::LevelFilter::Error,
		"off" | "quiet" => log::LevelFilter::Off,
		_ => return false,
	};

	log::set_max_level(level);
	true
}

/// Hands requests to the daemon and waits for the reply.
#[derive(Clone)]
pub struct RpcClient {
	sender: Sender<RpcEnvelope>,
}

impl RpcClient {
	#[must_use]
	pub fn call(&self, request: Request) -> Option<Response> {
		let (reply, receiver) = bounded(1);

		self.sender.send((request, reply)).ok()?;
		receiver.recv().ok()
	}
}

/// The RPC server worker: drains the request channel, dispatching
/// each request in isolation so one bad request never takes the
/// server down.
pub struct RpcServer {
	listener: Receiver<RpcEnvelope>,
	handler: RpcHandler,
	running: Arc<AtomicBool>,
}

pub fn rpc_channel() -> (RpcClient, Receiver<RpcEnvelope>) {
	let (sender, receiver) = unbounded();

	let client = RpcClient {
		sender,
	};

	(client, receiver)
}

impl RpcServer {
	#[must_use]
	pub fn new(
		listener: Receiver<RpcEnvelope>,
		handler: RpcHandler,
		running: Arc<AtomicBool>,
	) -> Self {
		RpcServer {
			listener,
			handler,
			running,
		}
	}
}

impl Worker for RpcServer {
	fn run(&mut self) -> Result<(), DaemonError> {
		info!("RPC server starting");

		while self.running.load(Ordering::Relaxed) {
			let envelope = match self.listener.recv_timeout(Duration::from_millis(250)) {
				Ok(envelope) => envelope,
				Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
				Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
			};

			let (request, reply) = envelope;
			let response = self.handler.dispatch(&request);

			if reply.send(response).is_err() {
				warn!("RPC caller went away before the reply");
			}
		}

		info!("RPC server ending");
		Ok(())
	}
}
