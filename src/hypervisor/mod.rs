/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

mod cache;

#[cfg(test)]
pub mod mock;

use std::{
	collections::BTreeMap,
	sync::Arc,
};

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::optional::Optional;

pub use crate::hypervisor::cache::TimedCache;

pub type GuestId = String;
pub type HypervisorRef = Arc<dyn HypervisorInterface>;

/// Per-device I/O limit map, e.g. `total_bytes_sec`, `read_iops_sec`.
pub type IoTuneMap = BTreeMap<String, i64>;

#[derive(Debug, Error)]
pub enum HypervisorError {
	#[error("hypervisor unavailable: {0}")]
	Unavailable(String),

	#[error("VM {0} does not exist")]
	VmNotFound(String),

	#[error("{0}")]
	Operation(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuestInfo {
	pub uuid: String,
	pub name: String,
	pub pid: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
	pub mem_available: u64,
	pub mem_unused: u64,
	pub major_fault: u64,
	pub minor_fault: u64,
	pub swap_in: u64,
	pub swap_out: u64,
	pub swap_total: Option<u64>,
	pub swap_usage: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BalloonInfo {
	pub balloon_cur: u64,
	pub balloon_max: u64,
	pub balloon_min: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpuTuneInfo {
	pub vcpu_quota: i64,
	pub vcpu_period: i64,
	pub vcpu_user_limit: i64,
	pub vcpu_count: u32,
}

/// One entry of the user-configured I/O tuning policy for a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoTunePolicy {
	pub name: String,
	pub path: Option<String>,
	pub guaranteed: IoTuneMap,
	pub maximum: IoTuneMap,
}

/// The applied I/O tuning of one device; also the shape pushed back
/// through `set_vm_io_tune`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoTuneEntry {
	pub name: String,
	pub path: Option<String>,
	pub io_tune: IoTuneMap,
}

/// Host-wide KSM knobs. Only the set fields are pushed; the kernel
/// keeps its current value for the rest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct KsmTuneParams {
	pub run: Option<i64>,
	pub pages_to_scan: Option<i64>,
	pub sleep_millisecs: Option<i64>,
	pub merge_across_nodes: Option<i64>,
}

/// The narrow interface the core consumes. Adapters wrap transient
/// transport failures so that a getter surfaces "information
/// unavailable this tick" (`Missing`) rather than an error that
/// would kill the calling worker; setters report failures as
/// `HypervisorError`.
pub trait HypervisorInterface: Send + Sync {
	fn get_vm_list(&self) -> Optional<Vec<GuestId>>;

	fn get_vm_info(&self, id: &str) -> Optional<GuestInfo>;

	fn start_vm_memory_stats(&self, uuid: &str) -> Result<(), HypervisorError>;

	fn get_vm_memory_stats(&self, uuid: &str) -> Result<MemoryStats, HypervisorError>;

	fn get_vm_balloon_info(&self, uuid: &str) -> Optional<BalloonInfo>;

	fn set_vm_balloon_target(&self, uuid: &str, target: u64) -> Result<(), HypervisorError>;

	fn get_vm_cpu_tune_info(&self, uuid: &str) -> Optional<CpuTuneInfo>;

	fn set_vm_cpu_tune(&self, uuid: &str, quota: i64, period: i64) -> Result<(), HypervisorError>;

	fn get_vm_io_tune_policy(&self, id: &str) -> Optional<Vec<IoTunePolicy>>;

	fn get_vm_io_tune(&self, id: &str) -> Optional<Vec<IoTuneEntry>>;

	fn set_vm_io_tune(&self, id: &str, tunables: Vec<IoTuneEntry>) -> Result<(), HypervisorError>;

	fn ksm_tune(&self, params: &KsmTuneParams) -> Result<(), HypervisorError>;
}
