/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

mod balloon;
mod cpu_tune;
mod io_tune;
mod ksm;

use log::warn;
use num_traits::AsPrimitive;

use crate::{
	entity::EntityRef,
	error::DaemonError,
	hypervisor::HypervisorRef,
	policy::value::Value,
};

pub use crate::controller::{
	balloon::Balloon,
	cpu_tune::CpuTune,
	io_tune::IoTune,
	ksm::Ksm,
};

/// An actuator reading the control variables the policy wrote and
/// pushing the deltas through the hypervisor interface.
pub trait Controller: Send {
	fn name(&self) -> &'static str;

	fn process(
		&mut self,
		host: &EntityRef,
		guests: &[EntityRef],
	) -> Result<(), DaemonError>;
}

/// Instantiates the configured controllers in order. Unknown names
/// log a warning and are skipped.
pub fn get_controllers(
	list: &str,
	hypervisor: &HypervisorRef,
) -> Vec<Box<dyn Controller>> {
	let mut controllers: Vec<Box<dyn Controller>> = Vec::new();

	for name in list.split(',') {
		let name = name.trim();

		if name.is_empty() {
			continue;
		}

		match name {
			"Balloon" => controllers.push(Box::new(Balloon::new(hypervisor.clone()))),
			"CpuTune" => controllers.push(Box::new(CpuTune::new(hypervisor.clone()))),
			"IoTune" => controllers.push(Box::new(IoTune::new(hypervisor.clone()))),
			"KSM" => controllers.push(Box::new(Ksm::new(hypervisor.clone()))),

			_ => warn!("Unable to import controller: {name}"),
		}
	}

	controllers
}

/// Integer coercion for policy outputs: floats truncate toward
/// zero the way the controllers have always applied them.
#[must_use]
pub fn control_int(value: &Value) -> Option<i64> {
	match value {
		Value::Int(value) => Some(*value),
		Value::Float(value) => Some(value.as_()),
		Value::Bool(value) => Some(i64::from(*value)),
		_ => None,
	}
}

/// The guest uuid every per-guest controller keys its calls by.
#[must_use]
pub fn guest_uuid(guest: &EntityRef) -> Option<String> {
	match guest.prop("uuid") {
		Value::Str(uuid) => Some(uuid),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use crate::{
		controller::get_controllers,
		hypervisor::{HypervisorRef, mock::MockHypervisor},
	};

	#[test]
	fn it_builds_controllers_in_configured_order() {
		let hypervisor: HypervisorRef = Arc::new(MockHypervisor::new());
		let controllers = get_controllers("Balloon, KSM, CpuTune, IoTune", &hypervisor);

		let names = controllers
			.iter()
			.map(|controller| controller.name())
			.collect::<Vec<&str>>();

		assert_eq!(names, ["Balloon", "KSM", "CpuTune", "IoTune"]);
	}

	#[test]
	fn it_skips_unknown_controllers() {
		let hypervisor: HypervisorRef = Arc::new(MockHypervisor::new());
		let controllers = get_controllers("Balloon, Bogus", &hypervisor);

		assert_eq!(controllers.len(), 1);
	}
}
