/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

mod host_memory;
mod host_cpu;
mod host_time;
mod guest_memory;
mod guest_balloon;
mod guest_cpu_tune;
mod guest_io_tune;

use thiserror::Error;

use crate::{
	error::DaemonError,
	hypervisor::HypervisorRef,
	policy::value::{Value, ValueMap},
};

pub use crate::collector::{
	host_memory::HostMemory,
	host_cpu::HostCpu,
	host_time::HostTime,
	guest_memory::GuestMemory,
	guest_balloon::GuestBalloon,
	guest_cpu_tune::GuestCpuTune,
	guest_io_tune::GuestIoTune,
};

#[derive(Debug, Error)]
pub enum CollectorError {
	#[error("{0}")]
	Unavailable(String),

	#[error(transparent)]
	Io(#[from] std::io::Error),
}

/// One metric family read into a monitor's sample. A collector that
/// cannot produce data this tick contributes an empty map; the
/// monitor decides whether the merged sample is complete.
pub trait Collector: Send {
	fn name(&self) -> &'static str;

	/// Fields that must be present for a sample to be accepted.
	fn required_fields(&self) -> &'static [&'static str];

	fn optional_fields(&self) -> &'static [&'static str] {
		&[]
	}

	fn collect(&mut self) -> Result<ValueMap, CollectorError>;
}

/// Instantiates the named collectors from a comma-separated config
/// list. An unknown name fails construction, which in turn marks
/// the owning monitor as not runnable.
pub fn get_collectors(
	list: &str,
	properties: &ValueMap,
	hypervisor: &HypervisorRef,
) -> Result<Vec<Box<dyn Collector>>, DaemonError> {
	let mut collectors: Vec<Box<dyn Collector>> = Vec::new();

	for name in list.split(',') {
		let name = name.trim();

		if name.is_empty() {
			continue;
		}

		let collector: Box<dyn Collector> = match name {
			"HostMemory" => Box::new(HostMemory::new()),
			"HostCpu" => Box::new(HostCpu::new()),
			"HostTime" => Box::new(HostTime::new()),

			"GuestMemory" => {
				Box::new(GuestMemory::new(guest_uuid(properties)?, hypervisor.clone(), false))
			},

			"GuestMemoryOptional" => {
				Box::new(GuestMemory::new(guest_uuid(properties)?, hypervisor.clone(), true))
			},

			"GuestBalloon" => {
				Box::new(GuestBalloon::new(guest_uuid(properties)?, hypervisor.clone(), false))
			},

			"GuestBalloonOptional" => {
				Box::new(GuestBalloon::new(guest_uuid(properties)?, hypervisor.clone(), true))
			},

			"GuestCpuTune" => {
				Box::new(GuestCpuTune::new(guest_uuid(properties)?, hypervisor.clone()))
			},

			"GuestIoTune" => {
				Box::new(GuestIoTune::new(guest_uuid(properties)?, hypervisor.clone(), false))
			},

			"GuestIoTuneOptional" => {
				Box::new(GuestIoTune::new(guest_uuid(properties)?, hypervisor.clone(), true))
			},

			_ => return Err(DaemonError::UnknownCollector(name.to_owned())),
		};

		collectors.push(collector);
	}

	Ok(collectors)
}

fn guest_uuid(properties: &ValueMap) -> Result<String, DaemonError> {
	match properties.get("uuid") {
		Some(Value::Str(uuid)) => Ok(uuid.clone()),

		_ => Err(DaemonError::Config(
			"guest collectors require a uuid property".into()
		)),
	}
}
