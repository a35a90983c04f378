/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use log::warn;

use crate::{
	collector::{Collector, CollectorError},
	hypervisor::HypervisorRef,
	policy::value::{Value, ValueMap},
};

const REQUIRED: [&str; 6] = [
	"mem_available", "mem_unused", "major_fault",
	"minor_fault", "swap_in", "swap_out",
];

const OPTIONAL: [&str; 2] = ["swap_total", "swap_usage"];

const ALL: [&str; 8] = [
	"mem_available", "mem_unused", "major_fault",
	"minor_fault", "swap_in", "swap_out",
	"swap_total", "swap_usage",
];

/// Collects guest memory statistics through the hypervisor
/// interface. The optional variant reports every field as optional
/// so the policy can still run while the guest agent is down.
pub struct GuestMemory {
	uuid: String,
	hypervisor: HypervisorRef,
	optional: bool,

	stats_available: bool,
}

impl GuestMemory {
	#[must_use]
	pub fn new(uuid: String, hypervisor: HypervisorRef, optional: bool) -> Self {
		if let Err(err) = hypervisor.start_vm_memory_stats(&uuid) {
			warn!("startVmMemoryStats({uuid}): {err}");
		}

		GuestMemory {
			uuid,
			hypervisor,
			optional,

			stats_available: true,
		}
	}

	/// Reports an outage once instead of flooding the log on every
	/// tick; recovery re-arms the warning.
	fn stats_error(&mut self, msg: &str) {
		if self.stats_available {
			warn!("{msg}");
		}

		self.stats_available = false;
	}
}

impl Collector for GuestMemory {
	fn name(&self) -> &'static str {
		"GuestMemory"
	}

	fn required_fields(&self) -> &'static [&'static str] {
		match self.optional {
			true => &[],
			false => &REQUIRED,
		}
	}

	fn optional_fields(&self) -> &'static [&'static str] {
		match self.optional {
			true => &ALL,
			false => &OPTIONAL,
		}
	}

	fn collect(&mut self) -> Result<ValueMap, CollectorError> {
		let stats = match self.hypervisor.get_vm_memory_stats(&self.uuid) {
			Ok(stats) => stats,

			Err(err) => {
				// Another collector may still provide these fields;
				// the monitor detects truly missing ones.
				self.stats_error(&format!("getVmMemoryStats(): {err}"));
				return Ok(ValueMap::new());
			},
		};

		self.stats_available = true;

		let mut data = ValueMap::from([
			("mem_available".to_owned(), Value::from(stats.mem_available)),
			("mem_unused".to_owned(), Value::from(stats.mem_unused)),
			("major_fault".to_owned(), Value::from(stats.major_fault)),
			("minor_fault".to_owned(), Value::from(stats.minor_fault)),
			("swap_in".to_owned(), Value::from(stats.swap_in)),
			("swap_out".to_owned(), Value::from(stats.swap_out)),
		]);

		if let Some(swap_total) = stats.swap_total {
			data.insert("swap_total".into(), Value::from(swap_total));
		}

		if let Some(swap_usage) = stats.swap_usage {
			data.insert("swap_usage".into(), Value::from(swap_usage));
		}

		Ok(data)
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use crate::{
		collector::{Collector, guest_memory::GuestMemory},
		hypervisor::mock::{MockHypervisor, MockVm, guest_info, memory_stats},
		policy::value::Value,
	};

	#[test]
	fn it_collects_memory_fields() {
		let hypervisor = Arc::new(MockHypervisor::new());

		hypervisor.add_vm("uuid-1", MockVm {
			info: Some(guest_info("1")),
			memory: Some(memory_stats(512)),
			..MockVm::default()
		});

		let mut collector = GuestMemory::new(
			"uuid-1".into(),
			hypervisor,
			false,
		);

		let data = collector.collect().unwrap();

		assert_eq!(data["mem_unused"], Value::Int(512));
		assert_eq!(data["mem_available"], Value::Int(2048));
		assert_eq!(data["swap_total"], Value::Int(1024));
	}

	#[test]
	fn it_returns_empty_data_when_stats_unavailable() {
		let hypervisor = Arc::new(MockHypervisor::new());

		let mut collector = GuestMemory::new(
			"uuid-unknown".into(),
			hypervisor,
			false,
		);

		let data = collector.collect().unwrap();
		assert!(data.is_empty());
	}
}
