/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use dashmap::DashMap;
use kwik::time;

/// Time validity of adapter bulk-getter results, in milliseconds.
pub const CACHE_EXPIRATION: u64 = 5_000;

/// A small expiring result cache keyed by call signature, shared by
/// adapter bulk getters such as `getAllVmStats`. Expiry compares the
/// absolute time difference so a clock jumping backwards invalidates
/// entries instead of pinning them forever.
pub struct TimedCache<T> {
	entries: DashMap<String, (u64, T)>,
	expiration: u64,
}

impl<T> Default for TimedCache<T> {
	fn default() -> Self {
		TimedCache {
			entries: DashMap::new(),
			expiration: CACHE_EXPIRATION,
		}
	}
}

impl<T> TimedCache<T>
where
	T: Clone,
{
	#[must_use]
	pub fn new(expiration: u64) -> Self {
		TimedCache {
			entries: DashMap::new(),
			expiration,
		}
	}

	pub fn get_or_insert_with(&self, key: &str, fill: impl FnOnce() -> T) -> T {
		self.get_or_insert_at(time::timestamp(), key, fill)
	}

	fn get_or_insert_at(
		&self,
		now: u64,
		key: &str,
		fill: impl FnOnce() -> T,
	) -> T {
		if let Some(entry) = self.entries.get(key) {
			let (stamp, value) = entry.value();

			if now.abs_diff(*stamp) <= self.expiration {
				return value.clone();
			}
		}

		let value = fill();
		self.entries.insert(key.to_owned(), (now, value.clone()));

		value
	}

	pub fn clear(&self) {
		self.entries.clear();
	}
}
