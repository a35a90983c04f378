/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::collections::BTreeMap;

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::{
	entity::EntityRef,
	policy::{
		eval::Evaluator,
		parser::{Node, parse},
		value::Value,
	},
};

/// Fragment name used by the anonymous `setPolicy` operation. The
/// leading `50` keeps it in the middle of the lexicographic order so
/// named fragments can sort before or after it.
pub const DEFAULT_POLICY_NAME: &str = "50_main_";

/// Holds the named policy fragments and the compiled value tree of
/// their concatenation. A failed compile never disturbs the
/// previously good state.
#[derive(Default)]
pub struct PolicyStore {
	inner: Mutex<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
	strings: BTreeMap<String, String>,
	code: Vec<Node>,
}

impl StoreInner {
	/// Concatenates the fragments in name order. An empty store
	/// compiles `"0"` so the evaluator always has a valid tree.
	fn concatenated(&self) -> String {
		if self.strings.is_empty() {
			return String::from("0");
		}

		self.strings
			.values()
			.cloned()
			.collect::<Vec<String>>()
			.join("\n")
	}
}

impl PolicyStore {
	#[must_use]
	pub fn new() -> Self {
		PolicyStore::default()
	}

	/// Inserts, replaces or (with `text = None`) deletes a fragment,
	/// then recompiles the concatenation. On a compile failure the
	/// previous fragment set is restored and `false` is returned.
	pub fn set_policy(&self, name: Option<&str>, text: Option<&str>) -> bool {
		let name = name.unwrap_or(DEFAULT_POLICY_NAME);
		let mut inner = self.inner.lock();

		let old = inner.strings.get(name).cloned();

		match text {
			Some(text) => {
				inner.strings.insert(name.to_owned(), text.to_owned());
			},

			None => {
				if inner.strings.remove(name).is_some() {
					info!("Deleted policy '{name}'");
				}
			},
		}

		match parse(&inner.concatenated()) {
			Ok(code) => {
				inner.code = code;
			},

			Err(err) => {
				warn!("Unable to load policy: {err}");

				match old {
					Some(old) => inner.strings.insert(name.to_owned(), old),
					None => inner.strings.remove(name),
				};

				return false;
			},
		}

		if text.is_some_and(|text| !text.is_empty()) {
			info!("Loaded policy '{name}'");
		}

		true
	}

	pub fn clear(&self) {
		let mut inner = self.inner.lock();

		inner.strings.clear();
		inner.code.clear();
	}

	#[must_use]
	pub fn get_strings(&self) -> BTreeMap<String, String> {
		self.inner.lock().strings.clone()
	}

	#[must_use]
	pub fn get_string(&self) -> String {
		self.inner.lock().concatenated()
	}

	/// Runs the compiled policy against a host/guests snapshot. The
	/// store lock is held for the whole run, so the evaluator sees
	/// either the old tree in full or the new one in full. Each run
	/// uses a fresh evaluator so the scope stack is clean.
	pub fn evaluate(&self, host: &EntityRef, guests: &[EntityRef]) -> bool {
		let mut evaluator = Evaluator::new();

		let guest_list = guests
			.iter()
			.map(|guest| Value::Entity(guest.clone()))
			.collect::<Vec<Value>>();

		let bound = evaluator.stack
			.set("Host", Value::Entity(host.clone()), true)
			.and_then(|_| {
				evaluator.stack.set("Guests", Value::List(guest_list), true)
			});

		if let Err(err) = bound {
			error!("Policy error: {err}");
			return false;
		}

		let inner = self.inner.lock();
		let mut results = Vec::with_capacity(inner.code.len());

		for node in &inner.code {
			match evaluator.eval(node) {
				Ok(value) => results.push(value),

				Err(err) => {
					error!("Policy error: {err}");
					return false;
				},
			}
		}

		debug!("Results: {results:?}");
		true
	}
}
