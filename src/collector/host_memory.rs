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

const REQUIRED: [&str; 3] = ["mem_available", "mem_unused", "mem_free"];
const OPTIONAL: [&str; 3] = ["swap_in", "swap_out", "anon_pages"];

/// Reads host memory statistics from /proc/meminfo and swap activity
/// from /proc/vmstat. Swap fields are per-tick deltas of the kernel
/// counters, so they appear from the second sample onwards.
pub struct HostMemory {
	meminfo: PathBuf,
	vmstat: PathBuf,

	last_swap: Option<(i64, i64)>,
}

impl HostMemory {
	#[must_use]
	pub fn new() -> Self {
		Self::with_paths("/proc/meminfo".into(), "/proc/vmstat".into())
	}

	#[must_use]
	pub fn with_paths(meminfo: PathBuf, vmstat: PathBuf) -> Self {
		HostMemory {
			meminfo,
			vmstat,

			last_swap: None,
		}
	}
}

impl Default for HostMemory {
	fn default() -> Self {
		Self::new()
	}
}

impl Collector for HostMemory {
	fn name(&self) -> &'static str {
		"HostMemory"
	}

	fn required_fields(&self) -> &'static [&'static str] {
		&REQUIRED
	}

	fn optional_fields(&self) -> &'static [&'static str] {
		&OPTIONAL
	}

	fn collect(&mut self) -> Result<ValueMap, CollectorError> {
		let meminfo = fs::read_to_string(&self.meminfo)?;
		let vmstat = fs::read_to_string(&self.vmstat)?;

		let mut data = ValueMap::new();

		let mem_total = field_kib(&meminfo, "MemTotal");
		let mem_free = field_kib(&meminfo, "MemFree");
		let buffers = field_kib(&meminfo, "Buffers").unwrap_or(0);
		let cached = field_kib(&meminfo, "Cached").unwrap_or(0);
		let anon = field_kib(&meminfo, "AnonPages");

		if let Some(total) = mem_total {
			data.insert("mem_available".into(), Value::Int(total));
		}

		if let Some(free) = mem_free {
			data.insert("mem_unused".into(), Value::Int(free));
			data.insert("mem_free".into(), Value::Int(free + buffers + cached));
		}

		if let Some(anon) = anon {
			data.insert("anon_pages".into(), Value::Int(anon));
		}

		let swap_in = counter(&vmstat, "pswpin");
		let swap_out = counter(&vmstat, "pswpout");

		if let (Some(swap_in), Some(swap_out)) = (swap_in, swap_out) {
			if let Some((last_in, last_out)) = self.last_swap {
				data.insert("swap_in".into(), Value::Int(swap_in - last_in));
				data.insert("swap_out".into(), Value::Int(swap_out - last_out));
			}

			self.last_swap = Some((swap_in, swap_out));
		}

		Ok(data)
	}
}

fn field_kib(contents: &str, name: &str) -> Option<i64> {
	contents
		.lines()
		.find(|line| line.starts_with(name) && line[name.len()..].starts_with(':'))
		.and_then(|line| line[name.len() + 1..].trim().split(' ').next()?.parse().ok())
}

fn counter(contents: &str, name: &str) -> Option<i64> {
	contents
		.lines()
		.find_map(|line| line.strip_prefix(name))
		.and_then(|rest| rest.trim().parse().ok())
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use tempfile::NamedTempFile;

	use crate::{
		collector::{Collector, host_memory::HostMemory},
		policy::value::Value,
	};

	const MEMINFO: &str = "\
MemTotal:       16000 kB
MemFree:         4000 kB
Buffers:          100 kB
Cached:           900 kB
AnonPages:       2500 kB
";

	fn write_temp(contents: &str) -> NamedTempFile {
		let mut file = NamedTempFile::new().unwrap();
		file.write_all(contents.as_bytes()).unwrap();
		file
	}

	#[test]
	fn it_parses_meminfo_and_swap_deltas() {
		let meminfo = write_temp(MEMINFO);
		let vmstat = write_temp("pswpin 100\npswpout 50\n");

		let mut collector = HostMemory::with_paths(
			meminfo.path().into(),
			vmstat.path().into(),
		);

		let first = collector.collect().unwrap();

		assert_eq!(first["mem_available"], Value::Int(16000));
		assert_eq!(first["mem_unused"], Value::Int(4000));
		assert_eq!(first["mem_free"], Value::Int(5000));
		assert_eq!(first["anon_pages"], Value::Int(2500));
		assert!(!first.contains_key("swap_in"));

		let second = collector.collect().unwrap();

		assert_eq!(second["swap_in"], Value::Int(0));
		assert_eq!(second["swap_out"], Value::Int(0));
	}
}
