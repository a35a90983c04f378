/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use log::{info, warn};

use crate::{
	controller::{Controller, guest_uuid},
	entity::EntityRef,
	error::DaemonError,
	hypervisor::{HypervisorRef, IoTuneEntry, IoTuneMap},
	policy::value::{Value, ValueMap, equals},
};

/// Pushes per-device I/O limits. The desired list comes from the
/// `io_tune` control when the policy wrote one and from the
/// collector's `io_tune` statistic otherwise; each device is
/// compared positionally against `io_tune_current` on its `ioTune`
/// submap and only changed entries are pushed, as one batch.
pub struct IoTune {
	hypervisor: HypervisorRef,
}

impl IoTune {
	#[must_use]
	pub fn new(hypervisor: HypervisorRef) -> Self {
		IoTune {
			hypervisor,
		}
	}

	fn process_guest(&self, guest: &EntityRef) {
		let desired = match guest.get_control("io_tune") {
			Value::Nil => guest.stat("io_tune"),
			control => control,
		};

		let (Value::List(desired), Value::List(previous)) =
			(desired, guest.stat("io_tune_current"))
		else {
			return;
		};

		if desired.is_empty() || previous.is_empty() {
			return;
		}

		let mut changed = Vec::new();

		for (index, device) in desired.iter().enumerate() {
			let Value::Map(device) = device else {
				continue;
			};

			let current_tune = previous
				.get(index)
				.and_then(|entry| match entry {
					Value::Map(entry) => entry.get("ioTune"),
					_ => None,
				});

			let desired_tune = device.get("ioTune");

			let unchanged = match (desired_tune, current_tune) {
				(Some(desired), Some(current)) => equals(desired, current),
				_ => false,
			};

			if unchanged {
				continue;
			}

			if let Some(entry) = device_entry(device) {
				changed.push(entry);
			}
		}

		if changed.is_empty() {
			return;
		}

		let Some(uuid) = guest_uuid(guest) else {
			return;
		};

		let name = guest.name().unwrap_or_default();
		info!("IoTune guest:{name} updating {} devices", changed.len());

		if let Err(err) = self.hypervisor.set_vm_io_tune(&uuid, changed) {
			warn!("Error while tuning io of guest:{name}: {err}");
		}
	}
}

fn device_entry(device: &ValueMap) -> Option<IoTuneEntry> {
	let Value::Str(name) = device.get("name")? else {
		return None;
	};

	let path = match device.get("path") {
		Some(Value::Str(path)) => Some(path.clone()),
		_ => None,
	};

	let Value::Map(tune) = device.get("ioTune")? else {
		return None;
	};

	let io_tune = tune
		.iter()
		.filter_map(|(key, value)| match value {
			Value::Int(value) => Some((key.clone(), *value)),
			_ => None,
		})
		.collect::<IoTuneMap>();

	Some(IoTuneEntry {
		name: name.clone(),
		path,
		io_tune,
	})
}

impl Controller for IoTune {
	fn name(&self) -> &'static str {
		"IoTune"
	}

	fn process(
		&mut self,
		_host: &EntityRef,
		guests: &[EntityRef],
	) -> Result<(), DaemonError> {
		for guest in guests {
			self.process_guest(guest);
		}

		Ok(())
	}
}
