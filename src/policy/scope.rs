/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::collections::HashMap;

use crate::{
	entity::entity_member,
	error::PolicyError,
	policy::value::Value,
};

/// The evaluator's lexical scope chain. The newest scope is
/// consulted first; dotted names resolve the head segment as a
/// binding and the remaining segments as entity members.
#[derive(Default)]
pub struct VariableStack {
	scopes: Vec<HashMap<String, Value>>,
}

impl VariableStack {
	#[must_use]
	pub fn new() -> Self {
		VariableStack {
			scopes: Vec::new(),
		}
	}

	pub fn enter_scope(&mut self) {
		self.scopes.push(HashMap::new());
	}

	pub fn leave_scope(&mut self) {
		self.scopes.pop();
	}

	#[must_use]
	pub fn depth(&self) -> usize {
		self.scopes.len()
	}

	/// Resolves a possibly dotted name. A scope that binds the head
	/// segment but cannot produce the requested member does not stop
	/// the search; outer scopes may still satisfy it.
	pub fn get(
		&self,
		name: &str,
		allow_undefined: bool,
		line: u32,
	) -> Result<Value, PolicyError> {
		let mut parts = name.split('.');
		let head = parts.next().unwrap_or_default();
		let rest = parts.collect::<Vec<&str>>();

		for scope in self.scopes.iter().rev() {
			let Some(value) = scope.get(head) else {
				continue;
			};

			if rest.is_empty() {
				return Ok(value.clone());
			}

			if let Some(value) = resolve_members(value, &rest) {
				return Ok(value);
			}
		}

		if allow_undefined {
			return Ok(Value::Nil);
		}

		Err(PolicyError::UndefinedSymbol(name.to_owned(), line))
	}

	/// With `alloc`, binds into the newest scope without overwriting
	/// an existing binding there (first write wins, and the winning
	/// value is returned). Without it, updates the nearest scope
	/// that already binds the name.
	pub fn set(
		&mut self,
		name: &str,
		value: Value,
		alloc: bool,
	) -> Result<Value, PolicyError> {
		if alloc {
			let scope = self.scopes
				.last_mut()
				.ok_or_else(|| PolicyError::UndefinedAssign(name.to_owned()))?;

			return Ok(scope
				.entry(name.to_owned())
				.or_insert(value)
				.clone());
		}

		for scope in self.scopes.iter_mut().rev() {
			if let Some(slot) = scope.get_mut(name) {
				*slot = value.clone();
				return Ok(value);
			}
		}

		Err(PolicyError::UndefinedAssign(name.to_owned()))
	}
}

fn resolve_members(value: &Value, segments: &[&str]) -> Option<Value> {
	let mut current = value.clone();

	for segment in segments {
		let Value::Entity(entity) = &current else {
			return None;
		};

		current = entity_member(entity, segment)?;
	}

	Some(current)
}
