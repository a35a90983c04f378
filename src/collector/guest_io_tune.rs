/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use log::debug;

use crate::{
	collector::{Collector, CollectorError},
	hypervisor::{HypervisorRef, IoTuneEntry, IoTuneMap},
	optional::Optional,
	policy::value::{Value, ValueMap},
};

const REQUIRED: [&str; 2] = ["io_tune", "io_tune_current"];

/// Joins the per-device I/O tuning policy with the applied state.
/// `io_tune` carries the policy-scoped device list (with its
/// guaranteed/maximum envelopes); `io_tune_current` the applied
/// state the IoTune controller diffs against.
pub struct GuestIoTune {
	uuid: String,
	hypervisor: HypervisorRef,
	optional: bool,

	info_available: bool,
}

impl GuestIoTune {
	#[must_use]
	pub fn new(uuid: String, hypervisor: HypervisorRef, optional: bool) -> Self {
		GuestIoTune {
			uuid,
			hypervisor,
			optional,

			info_available: true,
		}
	}

	fn stats_error(&mut self, msg: &str) {
		if self.info_available {
			debug!("{msg}");
		}

		self.info_available = false;
	}
}

impl Collector for GuestIoTune {
	fn name(&self) -> &'static str {
		"GuestIoTune"
	}

	fn required_fields(&self) -> &'static [&'static str] {
		match self.optional {
			true => &[],
			false => &REQUIRED,
		}
	}

	fn optional_fields(&self) -> &'static [&'static str] {
		match self.optional {
			true => &REQUIRED,
			false => &[],
		}
	}

	fn collect(&mut self) -> Result<ValueMap, CollectorError> {
		let Optional::Present(policies) = self.hypervisor.get_vm_io_tune_policy(&self.uuid) else {
			self.stats_error("getVmIoTunePolicy() is not ready");
			return Ok(ValueMap::new());
		};

		let Optional::Present(states) = self.hypervisor.get_vm_io_tune(&self.uuid) else {
			self.stats_error("getVmIoTune() is not ready");
			return Ok(ValueMap::new());
		};

		self.info_available = true;

		let mut devices = Vec::new();
		let mut current = Vec::new();

		for policy in policies {
			// Devices match on path first (two absent paths compare
			// equal), then by name when either side lacks a path.
			let state = states.iter().find(|state| {
				if policy.path == state.path {
					return true;
				}

				(policy.path.is_none() || state.path.is_none())
					&& policy.name == state.name
			});

			// Ignore policy entries whose device no longer exists.
			let Some(state) = state else {
				continue;
			};

			let device = ValueMap::from([
				("name".to_owned(), Value::from(state.name.clone())),
				("path".to_owned(), path_value(&state.path)),
				("ioTune".to_owned(), tune_map_value(&state.io_tune)),
				("guaranteed".to_owned(), tune_map_value(&policy.guaranteed)),
				("maximum".to_owned(), tune_map_value(&policy.maximum)),
			]);

			devices.push(Value::Map(device));
			current.push(entry_value(state));
		}

		Ok(ValueMap::from([
			("io_tune".to_owned(), Value::List(devices)),
			("io_tune_current".to_owned(), Value::List(current)),
		]))
	}
}

fn path_value(path: &Option<String>) -> Value {
	match path {
		Some(path) => Value::from(path.clone()),
		None => Value::Nil,
	}
}

fn tune_map_value(map: &IoTuneMap) -> Value {
	Value::Map(
		map.iter()
			.map(|(key, value)| (key.clone(), Value::Int(*value)))
			.collect()
	)
}

fn entry_value(entry: &IoTuneEntry) -> Value {
	Value::Map(ValueMap::from([
		("name".to_owned(), Value::from(entry.name.clone())),
		("path".to_owned(), path_value(&entry.path)),
		("ioTune".to_owned(), tune_map_value(&entry.io_tune)),
	]))
}
