/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::{
	cmp::Ordering,
	collections::BTreeMap,
	fmt::{self, Debug, Formatter},
};

use crate::{
	entity::{BoundMethod, EntityRef},
	error::PolicyError,
};

/// Field maps flowing between collectors, samples and controls.
pub type ValueMap = BTreeMap<String, Value>;

/// A value produced by evaluating policy code, or injected into the
/// evaluator's scope from the host side.
#[derive(Clone, Default)]
pub enum Value {
	#[default]
	Nil,
	Bool(bool),
	Int(i64),
	Float(f64),
	Str(String),
	List(Vec<Value>),
	Map(ValueMap),
	Entity(EntityRef),
	Method(BoundMethod),
	Extern(&'static ExternDef),
}

/// A host-provided function imported into the root scope. Arguments
/// arrive already evaluated.
pub struct ExternDef {
	pub name: &'static str,
	pub run: fn(&[Value], u32) -> Result<Value, PolicyError>,
}

enum Number {
	Int(i64),
	Float(f64),
}

impl Value {
	/// Empty string, `0`, `0.0`, `false` and `nil` are falsy;
	/// everything else is truthy.
	#[must_use]
	pub fn is_truthy(&self) -> bool {
		match self {
			Value::Nil => false,
			Value::Bool(value) => *value,
			Value::Int(value) => *value != 0,
			Value::Float(value) => *value != 0.0,
			Value::Str(value) => !value.is_empty(),
			_ => true,
		}
	}

	#[must_use]
	pub fn is_nil(&self) -> bool {
		matches!(self, Value::Nil)
	}

	#[must_use]
	pub fn type_name(&self) -> &'static str {
		match self {
			Value::Nil => "nil",
			Value::Bool(_) => "boolean",
			Value::Int(_) => "integer",
			Value::Float(_) => "float",
			Value::Str(_) => "string",
			Value::List(_) => "list",
			Value::Map(_) => "map",
			Value::Entity(_) => "entity",
			Value::Method(_) => "method",
			Value::Extern(_) => "function",
		}
	}

	/// Number of contained elements for sized values, used by the
	/// `null` builtin.
	#[must_use]
	pub fn len(&self) -> Option<usize> {
		match self {
			Value::Str(value) => Some(value.len()),
			Value::List(items) => Some(items.len()),
			Value::Map(map) => Some(map.len()),
			_ => None,
		}
	}

	/// Integer view used where the controllers and a few builtins
	/// require an integral operand. Floats are not silently
	/// truncated.
	#[must_use]
	pub fn as_int(&self) -> Option<i64> {
		match self {
			Value::Int(value) => Some(*value),
			Value::Bool(value) => Some(i64::from(*value)),
			_ => None,
		}
	}

	fn as_number(&self) -> Option<Number> {
		match self {
			Value::Int(value) => Some(Number::Int(*value)),
			Value::Float(value) => Some(Number::Float(*value)),
			Value::Bool(value) => Some(Number::Int(i64::from(*value))),
			_ => None,
		}
	}
}

fn type_err(op: &str, lhs: &Value, rhs: &Value, line: u32) -> PolicyError {
	PolicyError::Type(
		format!("cannot {op} {} and {}", lhs.type_name(), rhs.type_name()),
		line,
	)
}

/// Numeric promotion for a binary operation: two integers stay
/// integral, any float operand promotes both sides.
fn promote(lhs: &Value, rhs: &Value) -> Option<(Number, Number)> {
	let lhs = lhs.as_number()?;
	let rhs = rhs.as_number()?;

	match (lhs, rhs) {
		(Number::Int(a), Number::Int(b)) => Some((Number::Int(a), Number::Int(b))),
		(Number::Int(a), Number::Float(b)) => Some((Number::Float(a as f64), Number::Float(b))),
		(Number::Float(a), Number::Int(b)) => Some((Number::Float(a), Number::Float(b as f64))),
		(Number::Float(a), Number::Float(b)) => Some((Number::Float(a), Number::Float(b))),
	}
}

pub fn add(lhs: &Value, rhs: &Value, line: u32) -> Result<Value, PolicyError> {
	if let (Value::Str(a), Value::Str(b)) = (lhs, rhs) {
		return Ok(Value::Str(format!("{a}{b}")));
	}

	match promote(lhs, rhs) {
		Some((Number::Int(a), Number::Int(b))) => Ok(Value::Int(a.wrapping_add(b))),
		Some((Number::Float(a), Number::Float(b))) => Ok(Value::Float(a + b)),
		_ => Err(type_err("add", lhs, rhs, line)),
	}
}

pub fn sub(lhs: &Value, rhs: &Value, line: u32) -> Result<Value, PolicyError> {
	match promote(lhs, rhs) {
		Some((Number::Int(a), Number::Int(b))) => Ok(Value::Int(a.wrapping_sub(b))),
		Some((Number::Float(a), Number::Float(b))) => Ok(Value::Float(a - b)),
		_ => Err(type_err("subtract", lhs, rhs, line)),
	}
}

pub fn mul(lhs: &Value, rhs: &Value, line: u32) -> Result<Value, PolicyError> {
	match (lhs, rhs) {
		(Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) => {
			let count = usize::try_from(*n).unwrap_or(0);
			return Ok(Value::Str(s.repeat(count)));
		},

		_ => {},
	}

	match promote(lhs, rhs) {
		Some((Number::Int(a), Number::Int(b))) => Ok(Value::Int(a.wrapping_mul(b))),
		Some((Number::Float(a), Number::Float(b))) => Ok(Value::Float(a * b)),
		_ => Err(type_err("multiply", lhs, rhs, line)),
	}
}

/// Two integer operands produce the integer quotient truncated toward
/// zero; any float operand produces a float quotient.
pub fn div(lhs: &Value, rhs: &Value, line: u32) -> Result<Value, PolicyError> {
	match promote(lhs, rhs) {
		Some((Number::Int(a), Number::Int(b))) => {
			if b == 0 {
				return Err(PolicyError::Type("division by zero".into(), line));
			}

			Ok(Value::Int(a.wrapping_div(b)))
		},

		Some((Number::Float(a), Number::Float(b))) => {
			if b == 0.0 {
				return Err(PolicyError::Type("division by zero".into(), line));
			}

			Ok(Value::Float(a / b))
		},

		_ => Err(type_err("divide", lhs, rhs, line)),
	}
}

pub fn shl(lhs: &Value, rhs: &Value, line: u32) -> Result<Value, PolicyError> {
	let (a, b) = int_pair(lhs, rhs, "shift", line)?;
	Ok(Value::Int(a.checked_shl(shift_amount(b)).unwrap_or(0)))
}

pub fn shr(lhs: &Value, rhs: &Value, line: u32) -> Result<Value, PolicyError> {
	let (a, b) = int_pair(lhs, rhs, "shift", line)?;
	Ok(Value::Int(a.checked_shr(shift_amount(b)).unwrap_or(0)))
}

fn int_pair(
	lhs: &Value,
	rhs: &Value,
	op: &str,
	line: u32,
) -> Result<(i64, i64), PolicyError> {
	match (lhs.as_int(), rhs.as_int()) {
		(Some(a), Some(b)) => Ok((a, b)),
		_ => Err(type_err(op, lhs, rhs, line)),
	}
}

fn shift_amount(value: i64) -> u32 {
	u32::try_from(value).unwrap_or(u32::MAX)
}

/// Equality never fails: values of incomparable types are simply not
/// equal, and `nil` equals only `nil`.
pub fn equals(lhs: &Value, rhs: &Value) -> bool {
	match (lhs, rhs) {
		(Value::Nil, Value::Nil) => true,
		(Value::Str(a), Value::Str(b)) => a == b,
		(Value::List(a), Value::List(b)) => {
			a.len() == b.len()
				&& a.iter().zip(b.iter()).all(|(x, y)| equals(x, y))
		},
		(Value::Map(a), Value::Map(b)) => {
			a.len() == b.len()
				&& a.iter().zip(b.iter()).all(|((ka, va), (kb, vb))| {
					ka == kb && equals(va, vb)
				})
		},
		(Value::Entity(a), Value::Entity(b)) => EntityRef::ptr_eq(a, b),

		_ => match promote(lhs, rhs) {
			Some((Number::Int(a), Number::Int(b))) => a == b,
			Some((Number::Float(a), Number::Float(b))) => a == b,
			_ => false,
		},
	}
}

/// Ordering for the comparison builtins and `min`/`max`. Numbers
/// compare numerically across types, strings lexicographically;
/// anything else is incomparable.
pub fn compare(lhs: &Value, rhs: &Value, line: u32) -> Result<Ordering, PolicyError> {
	if let (Value::Str(a), Value::Str(b)) = (lhs, rhs) {
		return Ok(a.cmp(b));
	}

	match promote(lhs, rhs) {
		Some((Number::Int(a), Number::Int(b))) => Ok(a.cmp(&b)),

		Some((Number::Float(a), Number::Float(b))) => {
			a.partial_cmp(&b).ok_or_else(|| {
				PolicyError::Type("cannot order float NaN".into(), line)
			})
		},

		_ => Err(type_err("compare", lhs, rhs, line)),
	}
}

impl PartialEq for Value {
	fn eq(&self, other: &Self) -> bool {
		equals(self, other)
	}
}

impl Debug for Value {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		match self {
			Value::Nil => write!(f, "nil"),
			Value::Bool(value) => write!(f, "{value}"),
			Value::Int(value) => write!(f, "{value}"),
			Value::Float(value) => write!(f, "{value:?}"),
			Value::Str(value) => write!(f, "{value:?}"),
			Value::List(items) => f.debug_list().entries(items).finish(),
			Value::Map(map) => f.debug_map().entries(map).finish(),
			Value::Entity(entity) => write!(f, "{entity:?}"),
			Value::Method(method) => write!(f, "{method:?}"),
			Value::Extern(def) => write!(f, "<extern {}>", def.name),
		}
	}
}

impl From<i64> for Value {
	fn from(value: i64) -> Self {
		Value::Int(value)
	}
}

impl From<u64> for Value {
	fn from(value: u64) -> Self {
		Value::Int(value as i64)
	}
}

impl From<f64> for Value {
	fn from(value: f64) -> Self {
		Value::Float(value)
	}
}

impl From<bool> for Value {
	fn from(value: bool) -> Self {
		Value::Bool(value)
	}
}

impl From<&str> for Value {
	fn from(value: &str) -> Self {
		Value::Str(value.to_owned())
	}
}

impl From<String> for Value {
	fn from(value: String) -> Self {
		Value::Str(value)
	}
}

#[cfg(test)]
mod tests {
	use crate::policy::value::{Value, add, div, mul, equals, compare};

	#[test]
	fn it_applies_truthiness() {
		assert!(!Value::Nil.is_truthy());
		assert!(!Value::Int(0).is_truthy());
		assert!(!Value::Float(0.0).is_truthy());
		assert!(!Value::Str(String::new()).is_truthy());
		assert!(!Value::Bool(false).is_truthy());

		assert!(Value::Int(-1).is_truthy());
		assert!(Value::Str("x".into()).is_truthy());
		assert!(Value::List(Vec::new()).is_truthy());
	}

	#[test]
	fn it_divides_by_operand_types() {
		let int = div(&Value::Int(11), &Value::Int(2), 1).unwrap();
		assert_eq!(int, Value::Int(5));

		let float = div(&Value::Int(11), &Value::Float(2.0), 1).unwrap();
		assert_eq!(float, Value::Float(5.5));

		let negative = div(&Value::Int(-11), &Value::Int(2), 1).unwrap();
		assert_eq!(negative, Value::Int(-5));

		assert!(div(&Value::Int(1), &Value::Int(0), 1).is_err());
	}

	#[test]
	fn it_concatenates_and_repeats_strings() {
		let cat = add(&Value::from("Hello "), &Value::from("World!"), 1).unwrap();
		assert_eq!(cat, Value::from("Hello World!"));

		let repeated = mul(&Value::Int(3), &Value::from("Hey "), 1).unwrap();
		assert_eq!(repeated, Value::from("Hey Hey Hey "));
	}

	#[test]
	fn it_compares_across_numeric_types() {
		assert!(equals(&Value::Int(0), &Value::Float(0.0)));
		assert!(equals(&Value::Nil, &Value::Nil));
		assert!(!equals(&Value::Nil, &Value::Int(0)));

		let order = compare(&Value::Int(2), &Value::Float(2.5), 1).unwrap();
		assert_eq!(order, std::cmp::Ordering::Less);

		assert!(compare(&Value::Nil, &Value::Int(1), 1).is_err());
	}
}
