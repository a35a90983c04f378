/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::{
	fmt::{self, Debug, Formatter},
	sync::Arc,
};

use parking_lot::Mutex;

use crate::{
	error::PolicyError,
	policy::value::{Value, ValueMap},
};

pub type EntityRef = Arc<Entity>;

/// One accepted statistics sample: a timestamp in milliseconds and
/// the union of the collectors' fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
	pub timestamp: u64,
	pub fields: ValueMap,
}

/// The policy-visible view of the host or of one guest: immutable
/// properties, a snapshot of the statistics ring, and the control
/// variables the policy writes for the controllers to read.
pub struct Entity {
	properties: ValueMap,
	statistics: Vec<Sample>,
	controls: Mutex<ValueMap>,
}

/// The methods an entity exposes to policy code.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntityMethod {
	Prop,
	Stat,
	StatAvg,
	Control,
	GetControl,
	SetControl,
	Name,
}

/// An entity method bound to its receiver, as produced by a dotted
/// symbol lookup such as `guest.Stat`.
#[derive(Clone)]
pub struct BoundMethod {
	pub entity: EntityRef,
	pub method: EntityMethod,
}

impl Entity {
	#[must_use]
	pub fn new(properties: ValueMap, statistics: Vec<Sample>) -> EntityRef {
		Arc::new(Entity {
			properties,
			statistics,
			controls: Mutex::new(ValueMap::new()),
		})
	}

	#[must_use]
	pub fn properties(&self) -> &ValueMap {
		&self.properties
	}

	#[must_use]
	pub fn statistics(&self) -> &[Sample] {
		&self.statistics
	}

	#[must_use]
	pub fn latest_sample(&self) -> Option<&Sample> {
		self.statistics.last()
	}

	#[must_use]
	pub fn prop(&self, name: &str) -> Value {
		self.properties.get(name).cloned().unwrap_or_default()
	}

	/// The most recently sampled value of a statistics field.
	#[must_use]
	pub fn stat(&self, name: &str) -> Value {
		self.latest_sample()
			.and_then(|sample| sample.fields.get(name).cloned())
			.unwrap_or_default()
	}

	/// The arithmetic mean of a field over the whole ring snapshot,
	/// considering numeric samples only.
	#[must_use]
	pub fn stat_avg(&self, name: &str) -> Value {
		let values = self.statistics
			.iter()
			.filter_map(|sample| match sample.fields.get(name) {
				Some(Value::Int(value)) => Some(*value as f64),
				Some(Value::Float(value)) => Some(*value),
				_ => None,
			})
			.collect::<Vec<f64>>();

		if values.is_empty() {
			return Value::Nil;
		}

		Value::Float(values.iter().sum::<f64>() / values.len() as f64)
	}

	pub fn set_control(&self, name: &str, value: Value) {
		self.controls.lock().insert(name.to_owned(), value);
	}

	/// Reads a control variable; `nil` when the policy never wrote it.
	#[must_use]
	pub fn get_control(&self, name: &str) -> Value {
		self.controls.lock().get(name).cloned().unwrap_or_default()
	}

	#[must_use]
	pub fn controls(&self) -> ValueMap {
		self.controls.lock().clone()
	}

	#[must_use]
	pub fn name(&self) -> Option<String> {
		match self.properties.get("name") {
			Some(Value::Str(name)) => Some(name.clone()),
			_ => None,
		}
	}
}

/// Member resolution for dotted symbols: the entity methods win,
/// then properties, then the latest sample's field of that name.
/// The statistics fallback is what lets a controller input such as
/// `guest.vcpu_quota` reach the collector output directly.
#[must_use]
pub fn entity_member(entity: &EntityRef, name: &str) -> Option<Value> {
	let method = match name {
		"Prop" => Some(EntityMethod::Prop),
		"Stat" => Some(EntityMethod::Stat),
		"StatAvg" => Some(EntityMethod::StatAvg),
		"Control" => Some(EntityMethod::Control),
		"GetControl" => Some(EntityMethod::GetControl),
		"SetControl" => Some(EntityMethod::SetControl),
		"name" => Some(EntityMethod::Name),
		_ => None,
	};

	if let Some(method) = method {
		return Some(Value::Method(BoundMethod {
			entity: entity.clone(),
			method,
		}));
	}

	if let Some(value) = entity.properties.get(name) {
		return Some(value.clone());
	}

	entity.latest_sample()
		.and_then(|sample| sample.fields.get(name))
		.cloned()
}

impl BoundMethod {
	pub fn invoke(&self, args: &[Value], line: u32) -> Result<Value, PolicyError> {
		match self.method {
			EntityMethod::Prop => Ok(self.entity.prop(&self.key(args, line)?)),
			EntityMethod::Stat => Ok(self.entity.stat(&self.key(args, line)?)),
			EntityMethod::StatAvg => Ok(self.entity.stat_avg(&self.key(args, line)?)),

			EntityMethod::Control | EntityMethod::GetControl => {
				Ok(self.entity.get_control(&self.key(args, line)?))
			},

			EntityMethod::SetControl => {
				if args.len() != 2 {
					return Err(PolicyError::Type(
						"SetControl expects a key and a value".into(),
						line,
					));
				}

				let Value::Str(key) = &args[0] else {
					return Err(PolicyError::Type(
						"SetControl expects a string key".into(),
						line,
					));
				};

				self.entity.set_control(key, args[1].clone());
				Ok(Value::Nil)
			},

			EntityMethod::Name => {
				if !args.is_empty() {
					return Err(PolicyError::Type(
						"name expects no arguments".into(),
						line,
					));
				}

				match self.entity.name() {
					Some(name) => Ok(Value::Str(name)),
					None => Ok(Value::Nil),
				}
			},
		}
	}

	fn key(&self, args: &[Value], line: u32) -> Result<String, PolicyError> {
		match args {
			[Value::Str(key)] => Ok(key.clone()),

			_ => Err(PolicyError::Type(
				format!("{:?} expects a string key", self.method),
				line,
			)),
		}
	}
}

impl Debug for Entity {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		match self.name() {
			Some(name) => write!(f, "<entity {name}>"),
			None => write!(f, "<entity>"),
		}
	}
}

impl Debug for BoundMethod {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		write!(f, "<method {:?} of {:?}>", self.method, self.entity)
	}
}

#[cfg(test)]
mod tests {
	use crate::{
		entity::{Entity, Sample, entity_member},
		policy::value::{Value, ValueMap},
	};

	fn entity_with_samples(fields: &[(&str, i64)]) -> crate::entity::EntityRef {
		let mut properties = ValueMap::new();
		properties.insert("name".into(), Value::from("vm-1"));
		properties.insert("uuid".into(), Value::from("uuid-1"));

		let samples = fields
			.iter()
			.enumerate()
			.map(|(index, (key, value))| Sample {
				timestamp: index as u64,
				fields: ValueMap::from([((*key).to_owned(), Value::Int(*value))]),
			})
			.collect();

		Entity::new(properties, samples)
	}

	#[test]
	fn it_reads_properties_and_stats() {
		let entity = entity_with_samples(&[("mem_unused", 100), ("mem_unused", 200)]);

		assert_eq!(entity.prop("name"), Value::from("vm-1"));
		assert_eq!(entity.prop("missing"), Value::Nil);
		assert_eq!(entity.stat("mem_unused"), Value::Int(200));
		assert_eq!(entity.stat("missing"), Value::Nil);
	}

	#[test]
	fn it_averages_numeric_samples() {
		let entity = entity_with_samples(&[("mem_unused", 100), ("mem_unused", 200)]);
		assert_eq!(entity.stat_avg("mem_unused"), Value::Float(150.0));
		assert_eq!(entity.stat_avg("missing"), Value::Nil);
	}

	#[test]
	fn it_round_trips_controls() {
		let entity = entity_with_samples(&[]);

		assert_eq!(entity.get_control("balloon_target"), Value::Nil);

		entity.set_control("balloon_target", Value::Int(512));
		assert_eq!(entity.get_control("balloon_target"), Value::Int(512));
	}

	#[test]
	fn it_resolves_members_with_stats_fallback() {
		let entity = entity_with_samples(&[("vcpu_quota", 1000)]);

		assert!(matches!(
			entity_member(&entity, "Stat"),
			Some(Value::Method(_)),
		));

		assert_eq!(
			entity_member(&entity, "uuid"),
			Some(Value::from("uuid-1")),
		);

		assert_eq!(
			entity_member(&entity, "vcpu_quota"),
			Some(Value::Int(1000)),
		);

		assert!(entity_member(&entity, "unknown").is_none());
	}
}
