/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::collections::HashMap;

use log::debug;

use crate::{
	error::PolicyError,
	policy::{
		lexer::{NumberKind, Token, TokenKind},
		parser::{Node, parse},
		scope::VariableStack,
		value::{self, ExternDef, Value},
	},
};

// Policies are small; the bound exists to turn a pathologically deep
// tree into a policy error instead of a host stack overflow.
const MAX_EVAL_DEPTH: usize = 256;

/// Walks a policy value tree. Every evaluation run gets a fresh
/// evaluator so no scope or user-function state leaks between runs.
pub struct Evaluator {
	pub stack: VariableStack,
	funcs: HashMap<String, UserFunc>,
	depth: usize,
}

#[derive(Clone)]
struct UserFunc {
	params: Node,
	body: Node,
}

/// One term of a builtin's argument spec. A trailing `Variadic`
/// repeats the preceding term; a bare `Variadic` evaluates every
/// argument.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ArgSpec {
	Value,
	Symbol,
	Code,
	Variadic,
}

/// A dispatched argument: evaluated, a literal symbol name, or the
/// raw unevaluated node.
enum Arg<'a> {
	Val(Value),
	Sym(String),
	Code(&'a Node),
}

type BuiltinFn = for<'a> fn(
	&mut Evaluator,
	Vec<Arg<'a>>,
	u32,
) -> Result<Value, PolicyError>;

struct Builtin {
	name: &'static str,
	spec: &'static [ArgSpec],
	run: BuiltinFn,
}

impl Default for Evaluator {
	fn default() -> Self {
		Self::new()
	}
}

impl Evaluator {
	#[must_use]
	pub fn new() -> Self {
		let mut evaluator = Evaluator {
			stack: VariableStack::new(),
			funcs: HashMap::new(),
			depth: 0,
		};

		evaluator.stack.enter_scope();
		evaluator.import_externs();

		evaluator
	}

	fn import_externs(&mut self) {
		for def in EXTERNS {
			// The root scope always exists here.
			let _ = self.stack.set(def.name, Value::Extern(*def), true);
		}
	}

	/// Parses and evaluates policy source, returning one value per
	/// top-level node.
	pub fn eval_source(&mut self, source: &str) -> Result<Vec<Value>, PolicyError> {
		parse(source)?
			.iter()
			.map(|node| self.eval(node))
			.collect()
	}

	pub fn eval(&mut self, node: &Node) -> Result<Value, PolicyError> {
		if self.depth >= MAX_EVAL_DEPTH {
			return Err(PolicyError::DepthExceeded(node.line()));
		}

		self.depth += 1;
		let result = self.eval_inner(node);
		self.depth -= 1;

		result
	}

	fn eval_inner(&mut self, node: &Node) -> Result<Value, PolicyError> {
		let nodes = match node {
			Node::Leaf(token) => return self.eval_leaf(token),
			Node::List(nodes) => nodes,
		};

		let Some(head) = nodes.first() else {
			return Err(PolicyError::BadHead(node.line()));
		};

		let Node::Leaf(token) = head else {
			return Err(PolicyError::BadHead(head.line()));
		};

		let name = match token.kind {
			TokenKind::Symbol => token.text.clone(),

			TokenKind::Operator => {
				operator_name(&token.text).to_owned()
			},

			_ => return Err(PolicyError::UnexpectedToken(
				token_kind_name(token.kind).to_owned(),
				token.line,
			)),
		};

		let line = token.line;
		let args = &nodes[1..];

		// A binding in the scope chain wins over builtins so that
		// entity methods and imported functions dispatch first.
		let bound = self.stack.get(&name, true, line)?;

		if !bound.is_nil() {
			return self.apply(&name, bound, args, line);
		}

		if let Some(builtin) = lookup_builtin(&name) {
			return self.dispatch(builtin, args, line);
		}

		if name == "eval" {
			let mut result = Value::Nil;

			for node in args {
				result = self.eval(node)?;
			}

			return Ok(result);
		}

		self.call_user_func(&name, args, line)
	}

	fn eval_leaf(&mut self, token: &Token) -> Result<Value, PolicyError> {
		match token.kind {
			TokenKind::Number(kind) => parse_number(kind, &token.text, token.line),

			TokenKind::Str => Ok(Value::Str(token.text.clone())),

			TokenKind::Symbol => {
				if token.text == "nil" {
					return Ok(Value::Nil);
				}

				self.stack.get(&token.text, false, token.line)
			},

			kind => Err(PolicyError::UnexpectedToken(
				token_kind_name(kind).to_owned(),
				token.line,
			)),
		}
	}

	/// Applies a scope-resolved callable: arguments are evaluated
	/// left to right first.
	fn apply(
		&mut self,
		name: &str,
		callable: Value,
		args: &[Node],
		line: u32,
	) -> Result<Value, PolicyError> {
		let values = args
			.iter()
			.map(|node| self.eval(node))
			.collect::<Result<Vec<Value>, PolicyError>>()?;

		match callable {
			Value::Method(method) => method.invoke(&values, line),
			Value::Extern(def) => (def.run)(&values, line),

			_ => Err(PolicyError::NotCallable(name.to_owned(), line)),
		}
	}

	/// The doc protocol: arity checks first, then per-term argument
	/// conversion, then the builtin itself.
	fn dispatch(
		&mut self,
		builtin: &'static Builtin,
		raw: &[Node],
		line: u32,
	) -> Result<Value, PolicyError> {
		let spec = builtin.spec;
		let variadic = spec.last() == Some(&ArgSpec::Variadic);

		if !variadic && spec.len() != raw.len() {
			return Err(PolicyError::ArityMismatch(builtin.name, line));
		}

		if variadic && spec.len() > raw.len() + 1 {
			return Err(PolicyError::NotEnoughArguments(builtin.name, line));
		}

		let mut args = Vec::with_capacity(raw.len());
		let mut cursor = 0;
		let mut term = ArgSpec::Value;

		for node in raw {
			match spec.get(cursor) {
				Some(ArgSpec::Variadic) | None => {},

				Some(next) => {
					term = *next;
					cursor += 1;
				},
			}

			let arg = match term {
				ArgSpec::Code => Arg::Code(node),

				ArgSpec::Symbol => {
					let token = node
						.as_symbol()
						.ok_or(PolicyError::MalformedExpression(line))?;

					Arg::Sym(token.text.clone())
				},

				_ => Arg::Val(self.eval(node)?),
			};

			args.push(arg);
		}

		(builtin.run)(self, args, line)
	}

	fn call_user_func(
		&mut self,
		name: &str,
		args: &[Node],
		line: u32,
	) -> Result<Value, PolicyError> {
		let func = self.funcs
			.get(name)
			.cloned()
			.ok_or_else(|| PolicyError::UnknownFunction(name.to_owned(), line))?;

		let params = param_names(&func.params)?;

		if params.len() != args.len() {
			return Err(PolicyError::FunctionArity(name.to_owned(), line));
		}

		// Parameters bind left to right in the fresh scope; each
		// argument is evaluated inside that scope, so later
		// arguments observe earlier parameters.
		self.stack.enter_scope();

		let result = (|| {
			for (param, node) in params.iter().zip(args) {
				let value = self.eval(node)?;
				self.stack.set(param, value, true)?;
			}

			self.eval(&func.body)
		})();

		self.stack.leave_scope();
		result
	}
}

fn token_kind_name(kind: TokenKind) -> &'static str {
	match kind {
		TokenKind::Symbol => "symbol",
		TokenKind::Str => "string",
		TokenKind::Number(_) => "number",
		TokenKind::Operator => "operator",
		_ => "punctuation",
	}
}

fn operator_name(op: &str) -> &'static str {
	match op {
		"+" => "add",
		"-" => "sub",
		"*" => "mul",
		"/" => "div",
		"<" => "lt",
		">" => "gt",
		"<=" => "lte",
		">=" => "gte",
		"<<" => "shl",
		">>" => "shr",
		"==" => "eq",
		"!=" => "neq",
		_ => unreachable!("lexer only emits known operators"),
	}
}

fn parse_number(kind: NumberKind, text: &str, line: u32) -> Result<Value, PolicyError> {
	let invalid = || PolicyError::Type(format!("invalid number {text:?}"), line);

	let (negative, digits) = match text.strip_prefix('-') {
		Some(rest) => (true, rest),
		None => (false, text),
	};

	let value = match kind {
		NumberKind::Integer => {
			digits.parse::<i64>().map(Value::Int).map_err(|_| invalid())?
		},

		NumberKind::Hex => {
			i64::from_str_radix(&digits[2..], 16)
				.map(Value::Int)
				.map_err(|_| invalid())?
		},

		NumberKind::Octal => {
			i64::from_str_radix(&digits[1..], 8)
				.map(Value::Int)
				.map_err(|_| invalid())?
		},

		NumberKind::Float => {
			let normalized = match digits.starts_with('.') {
				true => format!("0{digits}"),
				false => digits.to_owned(),
			};

			normalized.parse::<f64>().map(Value::Float).map_err(|_| invalid())?
		},
	};

	if !negative {
		return Ok(value);
	}

	Ok(match value {
		Value::Int(v) => Value::Int(-v),
		Value::Float(v) => Value::Float(-v),
		other => other,
	})
}

fn param_names(params: &Node) -> Result<Vec<String>, PolicyError> {
	let Node::List(nodes) = params else {
		return Err(PolicyError::BadParamList(params.line()));
	};

	nodes
		.iter()
		.map(|node| {
			node.as_symbol()
				.map(|token| token.text.clone())
				.ok_or(PolicyError::BadParamList(node.line()))
		})
		.collect()
}

fn lookup_builtin(name: &str) -> Option<&'static Builtin> {
	let builtin = match name {
		"add" => &ADD,
		"sub" => &SUB,
		"mul" => &MUL,
		"div" => &DIV,
		"lt" => &LT,
		"gt" => &GT,
		"lte" => &LTE,
		"gte" => &GTE,
		"eq" => &EQ,
		"neq" => &NEQ,
		"shl" => &SHL,
		"shr" => &SHR,
		"and" => &AND,
		"or" => &OR,
		"not" => &NOT,
		"min" => &MIN,
		"max" => &MAX,
		"null" => &NULL,
		"valid" => &VALID,
		"if" => &IF,
		"let" => &LET,
		"with" => &WITH,
		"def" | "defun" => &DEF,
		"set" | "setq" => &SET,
		"defvar" => &DEFVAR,

		_ => return None,
	};

	Some(builtin)
}

const BINARY_SPEC: &[ArgSpec] = &[ArgSpec::Value, ArgSpec::Value];
const VARIADIC_VALUES: &[ArgSpec] = &[ArgSpec::Value, ArgSpec::Variadic];
const BARE_VARIADIC: &[ArgSpec] = &[ArgSpec::Variadic];

static ADD: Builtin = Builtin { name: "c_add", spec: BINARY_SPEC, run: c_add };
static SUB: Builtin = Builtin { name: "c_sub", spec: BINARY_SPEC, run: c_sub };
static MUL: Builtin = Builtin { name: "c_mul", spec: BINARY_SPEC, run: c_mul };
static DIV: Builtin = Builtin { name: "c_div", spec: BINARY_SPEC, run: c_div };
static LT: Builtin = Builtin { name: "c_lt", spec: BINARY_SPEC, run: c_lt };
static GT: Builtin = Builtin { name: "c_gt", spec: BINARY_SPEC, run: c_gt };
static LTE: Builtin = Builtin { name: "c_lte", spec: BINARY_SPEC, run: c_lte };
static GTE: Builtin = Builtin { name: "c_gte", spec: BINARY_SPEC, run: c_gte };
static EQ: Builtin = Builtin { name: "c_eq", spec: BINARY_SPEC, run: c_eq };
static NEQ: Builtin = Builtin { name: "c_neq", spec: BINARY_SPEC, run: c_neq };
static SHL: Builtin = Builtin { name: "c_shl", spec: BINARY_SPEC, run: c_shl };
static SHR: Builtin = Builtin { name: "c_shr", spec: BINARY_SPEC, run: c_shr };

static AND: Builtin = Builtin { name: "c_and", spec: VARIADIC_VALUES, run: c_and };
static OR: Builtin = Builtin { name: "c_or", spec: VARIADIC_VALUES, run: c_or };
static MIN: Builtin = Builtin { name: "c_min", spec: VARIADIC_VALUES, run: c_min };
static MAX: Builtin = Builtin { name: "c_max", spec: VARIADIC_VALUES, run: c_max };

static NOT: Builtin = Builtin { name: "c_not", spec: &[ArgSpec::Value], run: c_not };

static NULL: Builtin = Builtin { name: "c_null", spec: BARE_VARIADIC, run: c_null };
static VALID: Builtin = Builtin { name: "c_valid", spec: BARE_VARIADIC, run: c_valid };

static IF: Builtin = Builtin {
	name: "c_if",
	spec: &[ArgSpec::Value, ArgSpec::Code, ArgSpec::Code],
	run: c_if,
};

static LET: Builtin = Builtin {
	name: "c_let",
	spec: &[ArgSpec::Code, ArgSpec::Code, ArgSpec::Variadic],
	run: c_let,
};

static WITH: Builtin = Builtin {
	name: "c_with",
	spec: &[ArgSpec::Symbol, ArgSpec::Symbol, ArgSpec::Code],
	run: c_with,
};

static DEF: Builtin = Builtin {
	name: "c_def",
	spec: &[ArgSpec::Symbol, ArgSpec::Code, ArgSpec::Code],
	run: c_def,
};

static SET: Builtin = Builtin {
	name: "c_set",
	spec: &[ArgSpec::Symbol, ArgSpec::Value],
	run: c_set,
};

static DEFVAR: Builtin = Builtin {
	name: "c_defvar",
	spec: &[ArgSpec::Symbol, ArgSpec::Value],
	run: c_defvar,
};

fn take_value(arg: Arg) -> Value {
	match arg {
		Arg::Val(value) => value,
		_ => Value::Nil,
	}
}

fn binary_values(mut args: Vec<Arg>) -> (Value, Value) {
	let rhs = take_value(args.pop().unwrap_or(Arg::Val(Value::Nil)));
	let lhs = take_value(args.pop().unwrap_or(Arg::Val(Value::Nil)));

	(lhs, rhs)
}

fn c_add(_: &mut Evaluator, args: Vec<Arg>, line: u32) -> Result<Value, PolicyError> {
	let (lhs, rhs) = binary_values(args);
	value::add(&lhs, &rhs, line)
}

fn c_sub(_: &mut Evaluator, args: Vec<Arg>, line: u32) -> Result<Value, PolicyError> {
	let (lhs, rhs) = binary_values(args);
	value::sub(&lhs, &rhs, line)
}

fn c_mul(_: &mut Evaluator, args: Vec<Arg>, line: u32) -> Result<Value, PolicyError> {
	let (lhs, rhs) = binary_values(args);
	value::mul(&lhs, &rhs, line)
}

fn c_div(_: &mut Evaluator, args: Vec<Arg>, line: u32) -> Result<Value, PolicyError> {
	let (lhs, rhs) = binary_values(args);
	value::div(&lhs, &rhs, line)
}

fn c_lt(_: &mut Evaluator, args: Vec<Arg>, line: u32) -> Result<Value, PolicyError> {
	let (lhs, rhs) = binary_values(args);
	Ok(Value::Bool(value::compare(&lhs, &rhs, line)?.is_lt()))
}

fn c_gt(_: &mut Evaluator, args: Vec<Arg>, line: u32) -> Result<Value, PolicyError> {
	let (lhs, rhs) = binary_values(args);
	Ok(Value::Bool(value::compare(&lhs, &rhs, line)?.is_gt()))
}

fn c_lte(_: &mut Evaluator, args: Vec<Arg>, line: u32) -> Result<Value, PolicyError> {
	let (lhs, rhs) = binary_values(args);
	Ok(Value::Bool(value::compare(&lhs, &rhs, line)?.is_le()))
}

fn c_gte(_: &mut Evaluator, args: Vec<Arg>, line: u32) -> Result<Value, PolicyError> {
	let (lhs, rhs) = binary_values(args);
	Ok(Value::Bool(value::compare(&lhs, &rhs, line)?.is_ge()))
}

fn c_eq(_: &mut Evaluator, args: Vec<Arg>, _: u32) -> Result<Value, PolicyError> {
	let (lhs, rhs) = binary_values(args);
	Ok(Value::Bool(value::equals(&lhs, &rhs)))
}

fn c_neq(_: &mut Evaluator, args: Vec<Arg>, _: u32) -> Result<Value, PolicyError> {
	let (lhs, rhs) = binary_values(args);
	Ok(Value::Bool(!value::equals(&lhs, &rhs)))
}

fn c_shl(_: &mut Evaluator, args: Vec<Arg>, line: u32) -> Result<Value, PolicyError> {
	let (lhs, rhs) = binary_values(args);
	value::shl(&lhs, &rhs, line)
}

fn c_shr(_: &mut Evaluator, args: Vec<Arg>, line: u32) -> Result<Value, PolicyError> {
	let (lhs, rhs) = binary_values(args);
	value::shr(&lhs, &rhs, line)
}

// Both logic builtins are eager: every argument is already
// evaluated by the time they run.
fn c_and(_: &mut Evaluator, args: Vec<Arg>, _: u32) -> Result<Value, PolicyError> {
	let mut last = Value::Nil;

	for arg in args {
		let value = take_value(arg);

		if !value.is_truthy() {
			return Ok(value);
		}

		last = value;
	}

	Ok(last)
}

fn c_or(_: &mut Evaluator, args: Vec<Arg>, _: u32) -> Result<Value, PolicyError> {
	let mut last = Value::Nil;

	for arg in args {
		let value = take_value(arg);

		if value.is_truthy() {
			return Ok(value);
		}

		last = value;
	}

	Ok(last)
}

fn c_not(_: &mut Evaluator, args: Vec<Arg>, _: u32) -> Result<Value, PolicyError> {
	let value = args.into_iter().next().map(take_value).unwrap_or_default();
	Ok(Value::Bool(!value.is_truthy()))
}

fn c_min(_: &mut Evaluator, args: Vec<Arg>, line: u32) -> Result<Value, PolicyError> {
	fold_extreme(args, line, |ordering| ordering.is_lt())
}

fn c_max(_: &mut Evaluator, args: Vec<Arg>, line: u32) -> Result<Value, PolicyError> {
	fold_extreme(args, line, |ordering| ordering.is_gt())
}

fn fold_extreme(
	args: Vec<Arg>,
	line: u32,
	keep: fn(std::cmp::Ordering) -> bool,
) -> Result<Value, PolicyError> {
	let mut values = args.into_iter().map(take_value);

	let mut best = values.next().unwrap_or_default();

	for value in values {
		if keep(value::compare(&value, &best, line)?) {
			best = value;
		}
	}

	Ok(best)
}

/// True iff every argument is nil or an empty sized container.
fn c_null(_: &mut Evaluator, args: Vec<Arg>, _: u32) -> Result<Value, PolicyError> {
	let empty = args.iter().all(|arg| match arg {
		Arg::Val(value) => value.is_nil() || value.len() == Some(0),
		_ => false,
	});

	Ok(Value::Bool(empty))
}

/// True iff no argument is nil; non-containers count as valid.
fn c_valid(_: &mut Evaluator, args: Vec<Arg>, _: u32) -> Result<Value, PolicyError> {
	let valid = args.iter().all(|arg| match arg {
		Arg::Val(value) => !value.is_nil(),
		_ => true,
	});

	Ok(Value::Bool(valid))
}

fn c_if(ev: &mut Evaluator, mut args: Vec<Arg>, _: u32) -> Result<Value, PolicyError> {
	let no = args.pop();
	let yes = args.pop();
	let cond = args.pop().map(take_value).unwrap_or_default();

	let branch = match cond.is_truthy() {
		true => yes,
		false => no,
	};

	match branch {
		Some(Arg::Code(node)) => ev.eval(node),
		_ => Ok(Value::Nil),
	}
}

fn c_let(ev: &mut Evaluator, args: Vec<Arg>, line: u32) -> Result<Value, PolicyError> {
	let mut iter = args.into_iter();

	let Some(Arg::Code(bindings)) = iter.next() else {
		return Err(PolicyError::BadLetBinding(line));
	};

	let Node::List(pairs) = bindings else {
		return Err(PolicyError::BadLetBinding(line));
	};

	ev.stack.enter_scope();

	let result = (|| {
		for pair in pairs {
			let Node::List(pair) = pair else {
				return Err(PolicyError::BadLetBinding(line));
			};

			let [name, value] = pair.as_slice() else {
				return Err(PolicyError::BadLetBinding(line));
			};

			let name = name
				.as_symbol()
				.ok_or(PolicyError::BadLetBinding(line))?
				.text
				.clone();

			let value = ev.eval(value)?;
			ev.stack.set(&name, value, true)?;
		}

		let mut result = Value::Nil;

		for arg in iter {
			if let Arg::Code(node) = arg {
				result = ev.eval(node)?;
			}
		}

		Ok(result)
	})();

	ev.stack.leave_scope();
	result
}

fn c_with(ev: &mut Evaluator, args: Vec<Arg>, line: u32) -> Result<Value, PolicyError> {
	let mut iter = args.into_iter();

	let (Some(Arg::Sym(iterable)), Some(Arg::Sym(iterator)), Some(Arg::Code(body))) =
		(iter.next(), iter.next(), iter.next())
	else {
		return Err(PolicyError::MalformedExpression(line));
	};

	let Value::List(items) = ev.stack.get(&iterable, false, line)? else {
		return Err(PolicyError::NotIterable(iterable, line));
	};

	let mut results = Vec::with_capacity(items.len());

	for item in items {
		ev.stack.enter_scope();

		let result = ev.stack
			.set(&iterator, item, true)
			.and_then(|_| ev.eval(body));

		ev.stack.leave_scope();
		results.push(result?);
	}

	Ok(Value::List(results))
}

fn c_def(ev: &mut Evaluator, args: Vec<Arg>, line: u32) -> Result<Value, PolicyError> {
	let mut iter = args.into_iter();

	let (Some(Arg::Sym(name)), Some(Arg::Code(params)), Some(Arg::Code(body))) =
		(iter.next(), iter.next(), iter.next())
	else {
		return Err(PolicyError::MalformedExpression(line));
	};

	ev.funcs.insert(name.clone(), UserFunc {
		params: params.clone(),
		body: body.clone(),
	});

	Ok(Value::Str(name))
}

fn c_set(ev: &mut Evaluator, args: Vec<Arg>, line: u32) -> Result<Value, PolicyError> {
	let (name, value) = symbol_and_value(args, line)?;
	ev.stack.set(&name, value, false)
}

fn c_defvar(ev: &mut Evaluator, args: Vec<Arg>, line: u32) -> Result<Value, PolicyError> {
	let (name, value) = symbol_and_value(args, line)?;
	ev.stack.set(&name, value, true)
}

fn symbol_and_value(args: Vec<Arg>, line: u32) -> Result<(String, Value), PolicyError> {
	let mut iter = args.into_iter();

	let (Some(Arg::Sym(name)), Some(value)) = (iter.next(), iter.next()) else {
		return Err(PolicyError::MalformedExpression(line));
	};

	Ok((name, take_value(value)))
}

static EXTERNS: &[&ExternDef] = &[&ABS_EXTERN, &DEBUG_EXTERN];

static ABS_EXTERN: ExternDef = ExternDef {
	name: "abs",
	run: extern_abs,
};

static DEBUG_EXTERN: ExternDef = ExternDef {
	name: "debug",
	run: extern_debug,
};

fn extern_abs(args: &[Value], line: u32) -> Result<Value, PolicyError> {
	match args {
		[Value::Int(value)] => Ok(Value::Int(value.abs())),
		[Value::Float(value)] => Ok(Value::Float(value.abs())),

		_ => Err(PolicyError::Type(
			"abs expects one numeric argument".into(),
			line,
		)),
	}
}

fn extern_debug(args: &[Value], _: u32) -> Result<Value, PolicyError> {
	debug!("debug: {args:?}");
	Ok(args.last().cloned().unwrap_or_default())
}

#[cfg(test)]
mod tests {
	use crate::{
		entity::{Entity, EntityRef, Sample},
		policy::{
			eval::Evaluator,
			value::{Value, ValueMap},
		},
	};

	fn eval_all(source: &str) -> Vec<Value> {
		Evaluator::new()
			.eval_source(source)
			.expect("policy evaluation failed")
	}

	fn verify(source: &str, expected: &[Value]) {
		assert_eq!(eval_all(source), expected);
	}

	fn guest(num: u32, fields: &[(&str, i64)]) -> EntityRef {
		let mut properties = ValueMap::new();
		properties.insert("name".into(), Value::Str(format!("Guest-{num}")));
		properties.insert("uuid".into(), Value::Str(format!("uuid-{num}")));

		let fields = fields
			.iter()
			.map(|(key, value)| ((*key).to_owned(), Value::Int(*value)))
			.collect::<ValueMap>();

		Entity::new(properties, vec![Sample {
			timestamp: 0,
			fields,
		}])
	}

	#[test]
	fn it_skips_comments() {
		let source = "
		# This is a full-line pound comment
		12 # A partial-line comment with (+ 23 43) keywords
		(+ 3 # An expression with embedded comments
		2)
		";

		verify(source, &[Value::Int(12), Value::Int(5)]);
	}

	#[test]
	fn it_evaluates_strings() {
		let source = r#"
		"foo" "bar"
		(+ "Hello " "World!")
		(+ (* 3 "Hey ") "!")
		"#;

		verify(source, &[
			Value::from("foo"),
			Value::from("bar"),
			Value::from("Hello World!"),
			Value::from("Hey Hey Hey !"),
		]);
	}

	#[test]
	fn it_evaluates_basic_math() {
		let source = "
		10
		011                 # Octal
		.3                  # The leading 0 on a float is not required
		(* 0 1)
		(+ 1 2)
		(/ 11 2)            # Integer division truncates
		(/ 11 2.0)          # Floating point division
		(* 3 6)
		(- 1 9)             # Negative result
		(* (- 8 6) 9)
		(>> (<< 1 4) 2)
		(+ 0xFF 0x1)        # Hex numbers
		(+ 0xa 10)          # Numeric type mixing
		(+ 10.0e3 100e-2)   # Scientific notation for integers and floats
		";

		verify(source, &[
			Value::Int(10),
			Value::Int(9),
			Value::Float(0.3),
			Value::Int(0),
			Value::Int(3),
			Value::Int(5),
			Value::Float(5.5),
			Value::Int(18),
			Value::Int(-8),
			Value::Int(18),
			Value::Int(4),
			Value::Int(256),
			Value::Int(20),
			Value::Float(10001.0),
		]);
	}

	#[test]
	fn it_evaluates_comparisons() {
		let source = "
		(< 5 4)
		(> 1 0)
		(<= 10 10)
		(>= 2 (/ 10 2))
		(== (+ 1 2) (/ 9 3))
		(!= \"foo\" \"foo\")
		(== 0x0 0)
		";

		verify(source, &[
			Value::Bool(false),
			Value::Bool(true),
			Value::Bool(true),
			Value::Bool(false),
			Value::Bool(true),
			Value::Bool(false),
			Value::Bool(true),
		]);
	}

	#[test]
	fn it_evaluates_logic() {
		let source = "
		(and 1 \"\")
		(and 0 1)
		(and 1 2)
		(or \"\" 17)
		(or \"\" \"\")
		(not \"\")
		(not -0)
		(and 1 1 2)
		(or \"\" \"\" 17)
		(and 1 2 3 4 5 6 7 8 9 0)
		(or 0)
		";

		verify(source, &[
			Value::from(""),
			Value::Int(0),
			Value::Int(2),
			Value::Int(17),
			Value::from(""),
			Value::Bool(true),
			Value::Bool(true),
			Value::Int(2),
			Value::Int(17),
			Value::Int(0),
			Value::Int(0),
		]);
	}

	#[test]
	fn it_evaluates_variables() {
		let source = "
		(defvar foo \"bar\")
		(defvar a 5)
		(defvar b 6)
		(+ a b)
		(set a 8)
		(+ a b)
		(* foo 2)
		(defvar e3 7)
		(+ 1 e3)        # Make sure e3 is not mistaken for scientific notation
		";

		verify(source, &[
			Value::from("bar"),
			Value::Int(5),
			Value::Int(6),
			Value::Int(11),
			Value::Int(8),
			Value::Int(14),
			Value::from("barbar"),
			Value::Int(7),
			Value::Int(8),
		]);
	}

	#[test]
	fn it_evaluates_user_functions() {
		let source = "
		(def foo () 10)
		(def bar (a)
			(* 2 a))
		(/ (foo) (bar 5))
		(def baz (b)
			(- 2 (bar b)))
		(baz 12)
		(def foo (a) {
			(def bar (b) (+ b 1))   # Nested function
			(bar a)
		})
		(foo 9)
		";

		verify(source, &[
			Value::from("foo"),
			Value::from("bar"),
			Value::Int(1),
			Value::from("baz"),
			Value::Int(-22),
			Value::from("foo"),
			Value::Int(10),
		]);
	}

	#[test]
	fn it_evaluates_let() {
		let source = "
		(def foo (a) (+ 2 a))
		(defvar a 2)
		(let ((a 1) (b 2)) (foo a))
		a
		(let ((a 1) (b 2)) a b)
		";

		verify(source, &[
			Value::from("foo"),
			Value::Int(2),
			Value::Int(3),
			Value::Int(2),
			Value::Int(2),
		]);
	}

	#[test]
	fn it_evaluates_minmax() {
		let source = "
		(min 1 2 3 0)
		(defvar a 8)
		(defvar c (min 8 7 6 5))
		(max 0 c a 3)
		";

		verify(source, &[
			Value::Int(0),
			Value::Int(8),
			Value::Int(5),
			Value::Int(8),
		]);
	}

	#[test]
	fn it_evaluates_if() {
		let source = "
		(defvar a 1)
		(defvar b 0)
		(def f (cond)
			(if cond
				\"yes\"
				\"no\"))
		(if a 4 3)
		(if b 1 0)
		(f (> 2 1))
		";

		verify(source, &[
			Value::Int(1),
			Value::Int(0),
			Value::from("f"),
			Value::Int(4),
			Value::Int(0),
			Value::from("yes"),
		]);
	}

	#[test]
	fn it_scopes_set_and_defvar() {
		let source = "
		(defvar a 10)
		(def foo (b) (set a b))         # set affects the global 'a'
		(foo 2)
		a
		(def foo (b) (defvar a b))      # defvar creates a local 'a'
		(foo 4)
		a
		(set a 5)
		(let ((a 4)) a)                 # let creates a local 'a'
		a
		(if (== a 5) (defvar a 4) 0)    # defvar keeps the existing binding
		a
		";

		verify(source, &[
			Value::Int(10),
			Value::from("foo"),
			Value::Int(2),
			Value::Int(2),
			Value::from("foo"),
			Value::Int(4),
			Value::Int(2),
			Value::Int(5),
			Value::Int(4),
			Value::Int(5),
			Value::Int(5),
			Value::Int(5),
		]);
	}

	#[test]
	fn it_evaluates_multi_statement_blocks() {
		let source = "
		{ 10 4 }                # A multi-statement evaluates to the last value
		(def f (a b) {          # Use them for function bodies
			(defvar c (+ a b))
			(set c (+ 1 c))
			c
		})
		(f 4 5)
		(defvar q 11)
		(let ((q 2) (r 3)) {
			q r
			(- r q)
		})
		(if (== q 11) {
			\"q maintains proper scope\"
			(set q 12)
		} {
			\"oops, q has the wrong value\"
		})
		(- q 10)
		";

		verify(source, &[
			Value::Int(4),
			Value::from("f"),
			Value::Int(10),
			Value::Int(11),
			Value::Int(1),
			Value::Int(12),
			Value::Int(2),
		]);
	}

	#[test]
	fn it_evaluates_lisp_style_blocks() {
		let source = "
		(def f (a b) (let ()
			(defvar c (+ a b))
			(set c (+ 1 c))
			c
		))
		(f 4 5)

		(defvar q 11)
		(let ((q 2) (r 3))
			(+ q r)
			(- r q)
		)
		q
		";

		verify(source, &[
			Value::from("f"),
			Value::Int(10),
			Value::Int(11),
			Value::Int(1),
			Value::Int(11),
		]);
	}

	#[test]
	fn it_keeps_first_defvar_binding() {
		let source = "
		(defvar balloonEnabled 1)
		(defvar balloonEnabled 0)
		balloonEnabled
		(defvar balloonEnabled 2)
		balloonEnabled
		";

		verify(source, &[
			Value::Int(1),
			Value::Int(1),
			Value::Int(1),
			Value::Int(1),
			Value::Int(1),
		]);
	}

	#[test]
	fn it_aliases_setq_to_set() {
		let source = "
		(defvar balloonEnabled 1)
		balloonEnabled
		(setq balloonEnabled 2)
		balloonEnabled
		(set balloonEnabled 3)
		balloonEnabled
		";

		verify(source, &[
			Value::Int(1),
			Value::Int(1),
			Value::Int(2),
			Value::Int(2),
			Value::Int(3),
			Value::Int(3),
		]);
	}

	#[test]
	fn it_evaluates_null_and_valid() {
		let mut evaluator = Evaluator::new();
		evaluator.stack.set("empty", Value::List(Vec::new()), true).unwrap();

		let results = evaluator.eval_source("
		(null nil)
		(null 0 1 2 \"\")
		(null \"\" empty)
		(valid \"test\" 1 nil \"lala\")
		(valid \"test\" 1 \"lala\")
		(valid)
		(valid nil)
		(valid 0 \"\" empty)
		").unwrap();

		assert_eq!(results, [
			Value::Bool(true),
			Value::Bool(false),
			Value::Bool(true),
			Value::Bool(false),
			Value::Bool(true),
			Value::Bool(true),
			Value::Bool(false),
			Value::Bool(true),
		]);
	}

	#[test]
	fn it_evaluates_externals() {
		verify("(+ (abs -21) (abs 21))", &[Value::Int(42)]);
		verify("(debug \"test\" 1 nil \"lala\")", &[Value::from("lala")]);
	}

	#[test]
	fn it_rejects_number_headed_applications() {
		let result = Evaluator::new().eval_source("(2 + 2)");
		assert!(result.is_err());
	}

	#[test]
	fn it_reports_not_enough_arguments() {
		let err = Evaluator::new().eval_source("\n(and)").unwrap_err();
		assert_eq!(err.to_string(), "not enough arguments for 'c_and' on line 2");
	}

	#[test]
	fn it_reports_arity_mismatch() {
		let err = Evaluator::new().eval_source("\n(not)").unwrap_err();

		assert_eq!(
			err.to_string(),
			"arity mismatch in doc parsing of 'c_not' on line 2",
		);
	}

	#[test]
	fn it_reports_undefined_symbols() {
		let err = Evaluator::new().eval_source("\n156\n125f56").unwrap_err();
		assert_eq!(err.to_string(), "undefined symbol f56 on line 3");
	}

	#[test]
	fn it_reports_user_function_arity() {
		let err = Evaluator::new()
			.eval_source("\n(def test (x y) {\n})\n(test 1)")
			.unwrap_err();

		assert_eq!(
			err.to_string(),
			"Function \"test\" invoked with incorrect arity on line 4",
		);
	}

	#[test]
	fn it_iterates_guests_with_with() {
		let mut evaluator = Evaluator::new();

		let guests = Value::List(vec![
			Value::Entity(guest(1, &[])),
			Value::Entity(guest(2, &[])),
			Value::Entity(guest(4, &[])),
		]);

		evaluator.stack.set("Guests", guests, true).unwrap();

		let results = evaluator.eval_source("
		(def guestName (guest) (+ \"This guest's name is \" (guest.name)))
		(with Guests guest (guestName guest))
		").unwrap();

		assert_eq!(results[1], Value::List(vec![
			Value::from("This guest's name is Guest-1"),
			Value::from("This guest's name is Guest-2"),
			Value::from("This guest's name is Guest-4"),
		]));
	}

	#[test]
	fn it_reads_and_writes_entity_controls() {
		let mut evaluator = Evaluator::new();
		let guest = guest(1, &[("mem_unused", 512), ("balloon_cur", 1024)]);

		evaluator.stack
			.set("Guest", Value::Entity(guest.clone()), true)
			.unwrap();

		let results = evaluator.eval_source("
		(Guest.Prop \"name\")
		(Guest.Stat \"mem_unused\")
		Guest.balloon_cur
		(Guest.SetControl \"balloon_target\" (/ (Guest.Stat \"balloon_cur\") 2))
		(Guest.GetControl \"balloon_target\")
		").unwrap();

		assert_eq!(results[0], Value::from("Guest-1"));
		assert_eq!(results[1], Value::Int(512));
		assert_eq!(results[2], Value::Int(1024));
		assert_eq!(results[4], Value::Int(512));

		assert_eq!(guest.get_control("balloon_target"), Value::Int(512));
	}

	#[test]
	fn it_compares_nil_attributes() {
		let mut evaluator = Evaluator::new();

		let empty = Entity::new(
			ValueMap::from([("num".to_owned(), Value::Nil)]),
			Vec::new(),
		);

		evaluator.stack.set("guest", Value::Entity(empty), true).unwrap();

		let results = evaluator.eval_source("
		guest.num
		(== guest.num nil)
		(== guest.num 0)
		(valid guest.num)
		").unwrap();

		assert_eq!(results, [
			Value::Nil,
			Value::Bool(true),
			Value::Bool(false),
			Value::Bool(false),
		]);
	}

	#[test]
	fn it_restores_scopes_after_calls_and_errors() {
		let mut evaluator = Evaluator::new();
		let depth = evaluator.stack.depth();

		evaluator.eval_source("
		(def f (a) (+ a 1))
		(f 1)
		(let ((x 1)) x)
		").unwrap();

		assert_eq!(evaluator.stack.depth(), depth);

		evaluator.eval_source("(let ((x 1)) (+ x y))").unwrap_err();
		assert_eq!(evaluator.stack.depth(), depth);

		evaluator.eval_source("(def g (a) (+ a y)) (g 1)").unwrap_err();
		assert_eq!(evaluator.stack.depth(), depth);
	}

	#[test]
	fn it_bounds_evaluation_depth() {
		let mut evaluator = Evaluator::new();

		let result = evaluator.eval_source("
		(def loop (n) (loop (+ n 1)))
		(loop 0)
		");

		assert!(result.is_err());
	}
}
