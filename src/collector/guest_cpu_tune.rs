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

const REQUIRED: [&str; 4] = [
	"vcpu_quota", "vcpu_period", "vcpu_user_limit", "vcpu_count",
];

/// Collects the guest's current CPU bandwidth tuning and the user
/// selected consumption limit.
pub struct GuestCpuTune {
	uuid: String,
	hypervisor: HypervisorRef,

	info_available: bool,
}

impl GuestCpuTune {
	#[must_use]
	pub fn new(uuid: String, hypervisor: HypervisorRef) -> Self {
		GuestCpuTune {
			uuid,
			hypervisor,

			info_available: true,
		}
	}
}

impl Collector for GuestCpuTune {
	fn name(&self) -> &'static str {
		"GuestCpuTune"
	}

	fn required_fields(&self) -> &'static [&'static str] {
		&REQUIRED
	}

	fn collect(&mut self) -> Result<ValueMap, CollectorError> {
		let Optional::Present(info) = self.hypervisor.get_vm_cpu_tune_info(&self.uuid) else {
			if self.info_available {
				debug!("getVmCpuTuneInfo() is not ready for {}", self.uuid);
			}

			self.info_available = false;
			return Ok(ValueMap::new());
		};

		self.info_available = true;

		Ok(ValueMap::from([
			("vcpu_quota".to_owned(), Value::Int(info.vcpu_quota)),
			("vcpu_period".to_owned(), Value::Int(info.vcpu_period)),
			("vcpu_user_limit".to_owned(), Value::Int(info.vcpu_user_limit)),
			("vcpu_count".to_owned(), Value::Int(i64::from(info.vcpu_count))),
		]))
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use crate::{
		collector::{Collector, guest_cpu_tune::GuestCpuTune},
		hypervisor::mock::MockHypervisor,
		policy::value::Value,
	};

	#[test]
	fn it_collects_cpu_tune_fields() {
		let hypervisor = Arc::new(MockHypervisor::new());
		hypervisor.add_default_vm("uuid-1");

		let mut collector = GuestCpuTune::new("uuid-1".into(), hypervisor);
		let data = collector.collect().unwrap();

		assert_eq!(data["vcpu_quota"], Value::Int(-1));
		assert_eq!(data["vcpu_period"], Value::Int(100_000));
		assert_eq!(data["vcpu_count"], Value::Int(2));
	}

	#[test]
	fn it_returns_empty_data_when_info_missing() {
		let hypervisor = Arc::new(MockHypervisor::new());

		let mut collector = GuestCpuTune::new("uuid-9".into(), hypervisor);
		assert!(collector.collect().unwrap().is_empty());
	}
}
