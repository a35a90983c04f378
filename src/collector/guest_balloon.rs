/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use log::debug;

use crate::{
	collector::{Collector, CollectorError},
	hypervisor::HypervisorRef,
	optional::Optional,
	policy::value::{Value, ValueMap},
};

const REQUIRED: [&str; 3] = ["balloon_cur", "balloon_max", "balloon_min"];

/// Collects the guest's balloon sizes through the hypervisor
/// interface.
pub struct GuestBalloon {
	uuid: String,
	hypervisor: HypervisorRef,
	optional: bool,

	info_available: bool,
}

impl GuestBalloon {
	#[must_use]
	pub fn new(uuid: String, hypervisor: HypervisorRef, optional: bool) -> Self {
		GuestBalloon {
			uuid,
			hypervisor,
			optional,

			info_available: true,
		}
	}
}

impl Collector for GuestBalloon {
	fn name(&self) -> &'static str {
		"GuestBalloon"
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
		let Optional::Present(info) = self.hypervisor.get_vm_balloon_info(&self.uuid) else {
			if self.info_available {
				debug!("getVmBalloonInfo() is not ready for {}", self.uuid);
			}

			self.info_available = false;
			return Ok(ValueMap::new());
		};

		self.info_available = true;

		Ok(ValueMap::from([
			("balloon_cur".to_owned(), Value::from(info.balloon_cur)),
			("balloon_max".to_owned(), Value::from(info.balloon_max)),
			("balloon_min".to_owned(), Value::from(info.balloon_min)),
		]))
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use crate::{
		collector::{Collector, guest_balloon::GuestBalloon},
		hypervisor::mock::MockHypervisor,
		policy::value::Value,
	};

	#[test]
	fn it_collects_balloon_fields() {
		let hypervisor = Arc::new(MockHypervisor::new());
		hypervisor.add_default_vm("uuid-1");

		let mut collector = GuestBalloon::new(
			"uuid-1".into(),
			hypervisor,
			false,
		);

		let data = collector.collect().unwrap();

		assert_eq!(data["balloon_cur"], Value::Int(1024));
		assert_eq!(data["balloon_max"], Value::Int(2048));
		assert_eq!(data["balloon_min"], Value::Int(256));
	}
}
