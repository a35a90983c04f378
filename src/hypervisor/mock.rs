/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::{
	hypervisor::{
		BalloonInfo,
		CpuTuneInfo,
		GuestId,
		GuestInfo,
		HypervisorError,
		HypervisorInterface,
		IoTuneEntry,
		IoTunePolicy,
		KsmTuneParams,
		MemoryStats,
	},
	optional::Optional,
};

/// An in-memory hypervisor used by the control-loop tests. Guests
/// are registered up front; every mutating call is recorded so tests
/// can assert what the controllers pushed.
#[derive(Default)]
pub struct MockHypervisor {
	state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
	vms: BTreeMap<GuestId, MockVm>,
	unavailable: bool,

	balloon_targets: Vec<(GuestId, u64)>,
	cpu_tunes: Vec<(GuestId, i64, i64)>,
	io_tunes: Vec<(GuestId, Vec<IoTuneEntry>)>,
	ksm_calls: Vec<KsmTuneParams>,
}

#[derive(Default, Clone)]
pub struct MockVm {
	pub info: Option<GuestInfo>,
	pub memory: Option<MemoryStats>,
	pub balloon: Option<BalloonInfo>,
	pub cpu_tune: Option<CpuTuneInfo>,
	pub io_tune_policy: Vec<IoTunePolicy>,
	pub io_tune: Vec<IoTuneEntry>,
}

// The uuid doubles as the registry key so that per-uuid getters
// resolve the same entry `get_vm_list` returned.
pub fn guest_info(id: &str) -> GuestInfo {
	GuestInfo {
		uuid: id.to_owned(),
		name: format!("vm-{id}"),
		pid: Some(1000),
	}
}

pub fn memory_stats(mem_unused: u64) -> MemoryStats {
	MemoryStats {
		mem_available: 4 * mem_unused,
		mem_unused,
		major_fault: 0,
		minor_fault: 10,
		swap_in: 0,
		swap_out: 0,
		swap_total: Some(1024),
		swap_usage: Some(0),
	}
}

impl MockHypervisor {
	#[must_use]
	pub fn new() -> Self {
		MockHypervisor::default()
	}

	pub fn add_vm(&self, id: &str, vm: MockVm) {
		self.state.lock().vms.insert(id.to_owned(), vm);
	}

	/// Registers a guest with sensible defaults for every getter.
	pub fn add_default_vm(&self, id: &str) {
		self.add_vm(id, MockVm {
			info: Some(guest_info(id)),
			memory: Some(memory_stats(512)),
			balloon: Some(BalloonInfo {
				balloon_cur: 1024,
				balloon_max: 2048,
				balloon_min: 256,
			}),
			cpu_tune: Some(CpuTuneInfo {
				vcpu_quota: -1,
				vcpu_period: 100_000,
				vcpu_user_limit: 100,
				vcpu_count: 2,
			}),
			io_tune_policy: Vec::new(),
			io_tune: Vec::new(),
		});
	}

	pub fn remove_vm(&self, id: &str) {
		self.state.lock().vms.remove(id);
	}

	pub fn set_unavailable(&self, unavailable: bool) {
		self.state.lock().unavailable = unavailable;
	}

	#[must_use]
	pub fn balloon_targets(&self) -> Vec<(GuestId, u64)> {
		self.state.lock().balloon_targets.clone()
	}

	#[must_use]
	pub fn cpu_tunes(&self) -> Vec<(GuestId, i64, i64)> {
		self.state.lock().cpu_tunes.clone()
	}

	#[must_use]
	pub fn io_tunes(&self) -> Vec<(GuestId, Vec<IoTuneEntry>)> {
		self.state.lock().io_tunes.clone()
	}

	#[must_use]
	pub fn ksm_calls(&self) -> Vec<KsmTuneParams> {
		self.state.lock().ksm_calls.clone()
	}

	fn lookup<T>(
		&self,
		id: &str,
		read: impl FnOnce(&MockVm) -> Option<T>,
	) -> Optional<T> {
		let state = self.state.lock();

		if state.unavailable {
			return Optional::Missing;
		}

		state.vms.get(id).and_then(read).into()
	}
}

impl HypervisorInterface for MockHypervisor {
	fn get_vm_list(&self) -> Optional<Vec<GuestId>> {
		let state = self.state.lock();

		if state.unavailable {
			return Optional::Missing;
		}

		Optional::Present(state.vms.keys().cloned().collect())
	}

	fn get_vm_info(&self, id: &str) -> Optional<GuestInfo> {
		self.lookup(id, |vm| vm.info.clone())
	}

	fn start_vm_memory_stats(&self, _uuid: &str) -> Result<(), HypervisorError> {
		Ok(())
	}

	fn get_vm_memory_stats(&self, uuid: &str) -> Result<MemoryStats, HypervisorError> {
		self.lookup(uuid, |vm| vm.memory)
			.or_raise(|| HypervisorError::VmNotFound(uuid.to_owned()))
	}

	fn get_vm_balloon_info(&self, uuid: &str) -> Optional<BalloonInfo> {
		self.lookup(uuid, |vm| vm.balloon)
	}

	fn set_vm_balloon_target(&self, uuid: &str, target: u64) -> Result<(), HypervisorError> {
		self.state.lock().balloon_targets.push((uuid.to_owned(), target));
		Ok(())
	}

	fn get_vm_cpu_tune_info(&self, uuid: &str) -> Optional<CpuTuneInfo> {
		self.lookup(uuid, |vm| vm.cpu_tune)
	}

	fn set_vm_cpu_tune(&self, uuid: &str, quota: i64, period: i64) -> Result<(), HypervisorError> {
		self.state.lock().cpu_tunes.push((uuid.to_owned(), quota, period));
		Ok(())
	}

	fn get_vm_io_tune_policy(&self, id: &str) -> Optional<Vec<IoTunePolicy>> {
		self.lookup(id, |vm| match vm.io_tune_policy.is_empty() {
			true => None,
			false => Some(vm.io_tune_policy.clone()),
		})
	}

	fn get_vm_io_tune(&self, id: &str) -> Optional<Vec<IoTuneEntry>> {
		self.lookup(id, |vm| match vm.io_tune.is_empty() {
			true => None,
			false => Some(vm.io_tune.clone()),
		})
	}

	fn set_vm_io_tune(&self, id: &str, tunables: Vec<IoTuneEntry>) -> Result<(), HypervisorError> {
		self.state.lock().io_tunes.push((id.to_owned(), tunables));
		Ok(())
	}

	fn ksm_tune(&self, params: &KsmTuneParams) -> Result<(), HypervisorError> {
		self.state.lock().ksm_calls.push(*params);
		Ok(())
	}
}
