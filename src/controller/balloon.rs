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
};

/// Pushes per-guest balloon targets written by the policy. The
/// target is clamped into the guest's [balloon_min, balloon_max]
/// window and only pushed when it differs from the current size.
pub struct Balloon {
	hypervisor: HypervisorRef,
}

impl Balloon {
	#[must_use]
	pub fn new(hypervisor: HypervisorRef) -> Self {
		Balloon {
			hypervisor,
		}
	}

	fn process_guest(&self, guest: &EntityRef) {
		// nil means the policy opted out of ballooning this guest.
		let Some(target) = control_int(&guest.get_control("balloon_target")) else {
			return;
		};

		let Some(current) = control_int(&guest.stat("balloon_cur")) else {
			return;
		};

		let mut target = target;

		if let Some(min) = control_int(&guest.stat("balloon_min")) {
			target = target.max(min);
		}

		if let Some(max) = control_int(&guest.stat("balloon_max")) {
			target = target.min(max);
		}

		if target == current || target < 0 {
			return;
		}

		let Some(uuid) = guest_uuid(guest) else {
			return;
		};

		let name = guest.name().unwrap_or_default();
		info!("Ballooning guest:{name} from {current} to {target}");

		if let Err(err) = self.hypervisor.set_vm_balloon_target(&uuid, target as u64) {
			warn!("Error while ballooning guest:{name}: {err}");
		}
	}
}

impl Controller for Balloon {
	fn name(&self) -> &'static str {
		"Balloon"
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
		controller::{Controller, balloon::Balloon},
		entity::{Entity, EntityRef, Sample},
		hypervisor::mock::MockHypervisor,
		policy::value::{Value, ValueMap},
	};

	fn guest_with_balloon(cur: i64) -> EntityRef {
		Entity::new(
			ValueMap::from([
				("uuid".to_owned(), Value::from("uuid-1")),
				("name".to_owned(), Value::from("vm-1")),
			]),
			vec![Sample {
				timestamp: 0,
				fields: ValueMap::from([
					("balloon_cur".to_owned(), Value::Int(cur)),
					("balloon_min".to_owned(), Value::Int(256)),
					("balloon_max".to_owned(), Value::Int(2048)),
				]),
			}],
		)
	}

	fn host() -> EntityRef {
		Entity::new(ValueMap::new(), Vec::new())
	}

	#[test]
	fn it_pushes_changed_targets() {
		let hypervisor = Arc::new(MockHypervisor::new());
		let mut controller = Balloon::new(hypervisor.clone());

		let guest = guest_with_balloon(1024);
		guest.set_control("balloon_target", Value::Int(512));

		controller.process(&host(), &[guest]).unwrap();

		assert_eq!(hypervisor.balloon_targets(), [(String::from("uuid-1"), 512)]);
	}

	#[test]
	fn it_skips_guests_without_a_target() {
		let hypervisor = Arc::new(MockHypervisor::new());
		let mut controller = Balloon::new(hypervisor.clone());

		controller.process(&host(), &[guest_with_balloon(1024)]).unwrap();

		assert!(hypervisor.balloon_targets().is_empty());
	}

	#[test]
	fn it_skips_unchanged_targets() {
		let hypervisor = Arc::new(MockHypervisor::new());
		let mut controller = Balloon::new(hypervisor.clone());

		let guest = guest_with_balloon(1024);
		guest.set_control("balloon_target", Value::Int(1024));

		controller.process(&host(), &[guest]).unwrap();

		assert!(hypervisor.balloon_targets().is_empty());
	}

	#[test]
	fn it_clamps_targets_to_the_balloon_window() {
		let hypervisor = Arc::new(MockHypervisor::new());
		let mut controller = Balloon::new(hypervisor.clone());

		let low = guest_with_balloon(1024);
		low.set_control("balloon_target", Value::Int(1));

		let high = guest_with_balloon(1024);
		high.set_control("balloon_target", Value::Int(1_000_000));

		controller.process(&host(), &[low, high]).unwrap();

		assert_eq!(hypervisor.balloon_targets(), [
			(String::from("uuid-1"), 256),
			(String::from("uuid-1"), 2048),
		]);
	}

	#[test]
	fn it_truncates_float_targets() {
		let hypervisor = Arc::new(MockHypervisor::new());
		let mut controller = Balloon::new(hypervisor.clone());

		let guest = guest_with_balloon(1024);
		guest.set_control("balloon_target", Value::Float(512.9));

		controller.process(&host(), &[guest]).unwrap();

		assert_eq!(hypervisor.balloon_targets(), [(String::from("uuid-1"), 512)]);
	}
}
