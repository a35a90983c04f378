/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

mod host;
mod guest;

use std::{
	collections::VecDeque,
	sync::atomic::{AtomicBool, Ordering},
};

use kwik::time;
use log::warn;
use parking_lot::Mutex;

use crate::{
	collector::Collector,
	entity::{Entity, EntityRef, Sample},
	policy::value::ValueMap,
};

pub use crate::monitor::{
	guest::{GuestMonitor, GuestMonitorWorker},
	host::{HostMonitor, HostMonitorWorker},
};

/// Collects statistics through a set of collectors into a bounded
/// sample ring and exposes point-in-time entity snapshots. The data
/// lock guards the ring only; collectors run outside it so a slow
/// hypervisor call never blocks `interrogate`.
pub struct Monitor {
	name: String,
	properties: ValueMap,

	collectors: Mutex<Vec<Box<dyn Collector>>>,
	data: Mutex<MonitorData>,

	history_length: usize,
	running: AtomicBool,
	runnable: bool,
}

#[derive(Default)]
struct MonitorData {
	samples: VecDeque<Sample>,
	generation: u64,
	misses: u64,
	ready: bool,
}

impl Monitor {
	#[must_use]
	pub fn new(
		name: String,
		properties: ValueMap,
		collectors: Vec<Box<dyn Collector>>,
		history_length: usize,
	) -> Self {
		let runnable = !collectors.is_empty();

		Monitor {
			name,
			properties,

			collectors: Mutex::new(collectors),
			data: Mutex::new(MonitorData::default()),

			history_length,
			running: AtomicBool::new(true),
			runnable,
		}
	}

	#[must_use]
	pub fn name(&self) -> &str {
		&self.name
	}

	#[must_use]
	pub fn properties(&self) -> &ValueMap {
		&self.properties
	}

	/// Runs every collector and appends the merged sample when all
	/// required fields are present. A failing collector is isolated:
	/// it logs and the others still contribute.
	pub fn collect(&self) {
		let mut collectors = self.collectors.lock();
		let mut fields = ValueMap::new();
		let mut required = Vec::new();

		for collector in collectors.iter_mut() {
			required.extend_from_slice(collector.required_fields());

			match collector.collect() {
				Ok(data) => fields.extend(data),

				Err(err) => {
					warn!("{}: collector {} failed: {err}", self.name, collector.name());
				},
			}
		}

		drop(collectors);

		let missing = required
			.iter()
			.filter(|field| !fields.contains_key(**field))
			.copied()
			.collect::<Vec<&str>>();

		let mut data = self.data.lock();

		if !missing.is_empty() {
			data.misses += 1;
			warn!("{}: incomplete sample, missing fields {missing:?}", self.name);
			return;
		}

		let sample = Sample {
			timestamp: time::timestamp(),
			fields,
		};

		if data.samples.len() >= self.history_length {
			data.samples.pop_front();
		}

		data.samples.push_back(sample);
		data.generation += 1;
		data.ready = true;
	}

	/// A snapshot entity over the current ring, or `None` until the
	/// first complete sample has been accepted.
	#[must_use]
	pub fn interrogate(&self) -> Option<EntityRef> {
		let data = self.data.lock();

		if !data.ready {
			return None;
		}

		let statistics = data.samples
			.iter()
			.cloned()
			.collect::<Vec<Sample>>();

		Some(Entity::new(self.properties.clone(), statistics))
	}

	#[must_use]
	pub fn is_ready(&self) -> bool {
		self.data.lock().ready
	}

	#[must_use]
	pub fn generation(&self) -> u64 {
		self.data.lock().generation
	}

	#[must_use]
	pub fn misses(&self) -> u64 {
		self.data.lock().misses
	}

	#[must_use]
	pub fn should_run(&self) -> bool {
		self.runnable && self.running.load(Ordering::Relaxed)
	}

	pub fn terminate(&self) {
		self.running.store(false, Ordering::Relaxed);
	}
}
