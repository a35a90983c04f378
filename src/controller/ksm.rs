/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use log::{info, warn};

use crate::{
	controller::{Controller, control_int},
	entity::EntityRef,
	error::DaemonError,
	hypervisor::{HypervisorRef, KsmTuneParams},
};

/// Tunes the kernel same-page merging daemon. Host control
/// triggers are:
///   - ksm_run: 0 stop, 1 run, 2 unmerge shared pages
///   - ksm_pages_to_scan: pages scanned per work unit
///   - ksm_sleep_millisecs: sleep between scans
///   - ksm_merge_across_nodes: 1 across all nodes, 0 per NUMA node
pub struct Ksm {
	hypervisor: HypervisorRef,
	cur: KsmState,
}

#[derive(Clone, Copy, PartialEq)]
struct KsmState {
	run: i64,
	pages_to_scan: i64,
	sleep_millisecs: i64,
	merge_across_nodes: i64,
}

impl Ksm {
	#[must_use]
	pub fn new(hypervisor: HypervisorRef) -> Self {
		Ksm {
			hypervisor,

			// merge_across_nodes starts outside its 0/1 domain so
			// the first real policy output always triggers a push.
			cur: KsmState {
				run: 0,
				pages_to_scan: 0,
				sleep_millisecs: 0,
				merge_across_nodes: 8,
			},
		}
	}
}

impl Controller for Ksm {
	fn name(&self) -> &'static str {
		"KSM"
	}

	fn process(
		&mut self,
		host: &EntityRef,
		_guests: &[EntityRef],
	) -> Result<(), DaemonError> {
		let mut outputs = KsmTuneParams::default();

		let mut tune = |control: &str, cur: &mut i64, output: &mut Option<i64>| {
			let Some(value) = control_int(&host.get_control(control)) else {
				return;
			};

			if value != *cur {
				*output = Some(value);
				*cur = value;
			}
		};

		tune("ksm_run", &mut self.cur.run, &mut outputs.run);

		tune(
			"ksm_pages_to_scan",
			&mut self.cur.pages_to_scan,
			&mut outputs.pages_to_scan,
		);

		tune(
			"ksm_sleep_millisecs",
			&mut self.cur.sleep_millisecs,
			&mut outputs.sleep_millisecs,
		);

		tune(
			"ksm_merge_across_nodes",
			&mut self.cur.merge_across_nodes,
			&mut outputs.merge_across_nodes,
		);

		if outputs == KsmTuneParams::default() {
			return Ok(());
		}

		info!(
			"Updating KSM configuration: run:{} pages_to_scan:{} \
			sleep_millisecs:{} merge_across_nodes:{}",
			self.cur.run,
			self.cur.pages_to_scan,
			self.cur.sleep_millisecs,
			self.cur.merge_across_nodes,
		);

		if let Err(err) = self.hypervisor.ksm_tune(&outputs) {
			warn!("Error while tuning KSM: {err}");
		}

		Ok(())
	}
}
