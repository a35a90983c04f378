/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use thiserror::Error;

use crate::hypervisor::HypervisorError;

/// Raised anywhere in the policy pipeline: lexing, parsing, scope
/// resolution or evaluation. The message formats are part of the
/// policy-author facing contract and must not be reworded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
	#[error("unexpected character {0:?} on line {1}")]
	UnexpectedChar(char, u32),

	#[error("unterminated string on line {0}")]
	UnterminatedString(u32),

	#[error("syntax error on line {0}")]
	Syntax(u32),

	#[error("undefined symbol {0} on line {1}")]
	UndefinedSymbol(String, u32),

	#[error("undefined symbol {0}")]
	UndefinedAssign(String),

	#[error("arity mismatch in doc parsing of '{0}' on line {1}")]
	ArityMismatch(&'static str, u32),

	#[error("not enough arguments for '{0}' on line {1}")]
	NotEnoughArguments(&'static str, u32),

	#[error("malformed expression on line {0}")]
	MalformedExpression(u32),

	#[error("Function {0:?} invoked with incorrect arity on line {1}")]
	FunctionArity(String, u32),

	#[error("Unknown function {0:?} on line {1}")]
	UnknownFunction(String, u32),

	#[error("Unexpected token type {0:?} on line {1}")]
	UnexpectedToken(String, u32),

	#[error("Expected simple token as arg 1 on line {0}")]
	BadHead(u32),

	#[error("{0:?} is not callable on line {1}")]
	NotCallable(String, u32),

	#[error("{0:?} is not iterable on line {1}")]
	NotIterable(String, u32),

	#[error("Expecting list of (symbol value) pairs in let on line {0}")]
	BadLetBinding(u32),

	#[error("Expecting list of parameter symbols in def on line {0}")]
	BadParamList(u32),

	#[error("type error: {0} on line {1}")]
	Type(String, u32),

	#[error("maximum evaluation depth exceeded on line {0}")]
	DepthExceeded(u32),
}

#[derive(Debug, Error)]
pub enum DaemonError {
	#[error("internal error")]
	Internal,

	#[error(transparent)]
	Policy(#[from] PolicyError),

	#[error(transparent)]
	Hypervisor(#[from] HypervisorError),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error("invalid configuration: {0}")]
	Config(String),

	#[error("unknown collector {0:?}")]
	UnknownCollector(String),

	#[error("monitor is not runnable")]
	MonitorNotRunnable,
}
