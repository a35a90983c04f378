/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::{
	fs,
	path::PathBuf,
};

use crate::{
	collector::{Collector, CollectorError},
	policy::value::{Value, ValueMap},
};

const REQUIRED: [&str; 1] = ["cpu_count"];

/// Counts processors in /proc/cpuinfo into `cpu_count`.
pub struct HostCpu {
	cpuinfo: PathBuf,
}

impl HostCpu {
	#[must_use]
	pub fn new() -> Self {
		Self::with_path("/proc/cpuinfo".into())
	}

	#[must_use]
	pub fn with_path(cpuinfo: PathBuf) -> Self {
		HostCpu {
			cpuinfo,
		}
	}
}

impl Default for HostCpu {
	fn default() -> Self {
		Self::new()
	}
}

impl Collector for HostCpu {
	fn name(&self) -> &'static str {
		"HostCpu"
	}

	fn required_fields(&self) -> &'static [&'static str] {
		&REQUIRED
	}

	fn collect(&mut self) -> Result<ValueMap, CollectorError> {
		let contents = fs::read_to_string(&self.cpuinfo)?;

		let cpu_count = contents
			.lines()
			.filter(|line| line.starts_with("processor") && line.contains(':'))
			.count();

		Ok(ValueMap::from([
			("cpu_count".to_owned(), Value::Int(cpu_count as i64)),
		]))
	}
}
