/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use log::{info, warn};

use crate::{
	controller::{Controller, control_int, guest_uuid},
	entity::EntityRef,
	error::DaemonError,
	hypervisor::HypervisorRef,
	policy::value::{Value, equals},
};

/// Applies the policy's vcpu bandwidth outputs: `vcpu_quota` is the
/// maximum allowed bandwidth and `vcpu_period` the enforcement
/// interval, both in microseconds.
pub struct CpuTune {
	hypervisor: HypervisorRef,
}

impl CpuTune {
	#[must_use]
	pub fn new(hypervisor: HypervisorRef) -> Self {
		CpuTune {
			hypervisor,
		}
	}

	fn process_guest(&self, guest: &EntityRef) {
		let prev_quota = guest.stat("vcpu_quota");
		let prev_period = guest.stat("vcpu_period");

		let quota = get_changed_val(guest.get_control("vcpu_quota"), prev_quota.clone());
		let period = get_changed_val(guest.get_control("vcpu_period"), prev_period.clone());

		if equals(&quota, &prev_quota) && equals(&period, &prev_period) {
			return;
		}

		let (Some(quota), Some(period)) = (control_int(&quota), control_int(&period)) else {
			return;
		};

		let Some(uuid) = guest_uuid(guest) else {
			return;
		};

		let name = guest.name().unwrap_or_default();

		info!(
			"CpuTune guest:{name} from quota:{prev_quota:?} period:{prev_period:?} \
			to quota:{quota} period:{period}",
		);

		if let Err(err) = self.hypervisor.set_vm_cpu_tune(&uuid, quota, period) {
			warn!("Error while tuning cpu of guest:{name}: {err}");
		}
	}
}

/// A nil output means the policy opted out of changing this value,
/// so the previous one is carried forward.
fn get_changed_val(val: Value, prev_val: Value) -> Value {
	if !val.is_nil() && !equals(&val, &prev_val) {
		return val;
	}

	prev_val
}

impl Controller for CpuTune {
	fn name(&self) -> &'static str {
		"CpuTune"
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

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use crate::{
		controller::{Controller, cpu_tune::{CpuTune, get_changed_val}},
		entity::{Entity, EntityRef, Sample},
		hypervisor::mock::MockHypervisor,
		policy::value::{Value, ValueMap},
	};

	fn guest_with_tuning(quota: i64, period: i64) -> EntityRef {
		Entity::new(
			ValueMap::from([
				("uuid".to_owned(), Value::from("uuid-1")),
				("name".to_owned(), Value::from("vm-1")),
			]),
			vec![Sample {
				timestamp: 0,
				fields: ValueMap::from([
					("vcpu_quota".to_owned(), Value::Int(quota)),
					("vcpu_period".to_owned(), Value::Int(period)),
				]),
			}],
		)
	}

	fn host() -> EntityRef {
		Entity::new(ValueMap::new(), Vec::new())
	}

	#[test]
	fn it_keeps_previous_values_on_nil() {
		assert_eq!(
			get_changed_val(Value::Nil, Value::Int(5)),
			Value::Int(5),
		);

		assert_eq!(
			get_changed_val(Value::Int(7), Value::Int(5)),
			Value::Int(7),
		);

		assert_eq!(
			get_changed_val(Value::Int(5), Value::Int(5)),
			Value::Int(5),
		);
	}

	#[test]
	fn it_pushes_changed_pairs() {
		let hypervisor = Arc::new(MockHypervisor::new());
		let mut controller = CpuTune::new(hypervisor.clone());

		let guest = guest_with_tuning(-1, 100_000);
		guest.set_control("vcpu_quota", Value::Int(50_000));

		controller.process(&host(), &[guest]).unwrap();

		assert_eq!(
			hypervisor.cpu_tunes(),
			[(String::from("uuid-1"), 50_000, 100_000)],
		);
	}

	#[test]
	fn it_skips_unchanged_pairs() {
		let hypervisor = Arc::new(MockHypervisor::new());
		let mut controller = CpuTune::new(hypervisor.clone());

		let guest = guest_with_tuning(-1, 100_000);
		guest.set_control("vcpu_quota", Value::Int(-1));

		controller.process(&host(), &[guest]).unwrap();

		assert!(hypervisor.cpu_tunes().is_empty());
	}

	#[test]
	fn it_truncates_float_outputs() {
		let hypervisor = Arc::new(MockHypervisor::new());
		let mut controller = CpuTune::new(hypervisor.clone());

		let guest = guest_with_tuning(-1, 100_000);
		guest.set_control("vcpu_quota", Value::Float(25_000.75));

		controller.process(&host(), &[guest]).unwrap();

		assert_eq!(
			hypervisor.cpu_tunes(),
			[(String::from("uuid-1"), 25_000, 100_000)],
		);
	}
}
