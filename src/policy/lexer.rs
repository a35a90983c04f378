/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use crate::error::PolicyError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumberKind {
	Integer,
	Float,
	Hex,
	Octal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenKind {
	Symbol,
	Str,
	Number(NumberKind),
	Operator,
	LeftParen,
	RightParen,
	LeftBracket,
	RightBracket,
	LeftBrace,
	RightBrace,
}

/// One lexical token tagged with its 1-based source line. String
/// tokens carry the text between the quotes with escapes kept
/// verbatim; numeric tokens carry the matched text including any
/// leading sign.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
	pub kind: TokenKind,
	pub text: String,
	pub line: u32,
}

impl Token {
	#[must_use]
	pub fn symbol(text: &str, line: u32) -> Self {
		Token {
			kind: TokenKind::Symbol,
			text: text.to_owned(),
			line,
		}
	}
}

struct Lexer {
	chars: Vec<char>,
	pos: usize,
	line: u32,
}

/// Tokenizes policy source. The token classes and their precedence
/// follow the policy language definition; a character matching no
/// class is a `PolicyError` naming the line.
pub fn tokenize(source: &str) -> Result<Vec<Token>, PolicyError> {
	let mut lexer = Lexer {
		chars: source.chars().collect(),
		pos: 0,
		line: 1,
	};

	let mut tokens = Vec::new();

	while let Some(ch) = lexer.peek(0) {
		if ch.is_whitespace() {
			if ch == '\n' {
				lexer.line += 1;
			}

			lexer.pos += 1;
			continue;
		}

		if ch == '#' {
			while let Some(ch) = lexer.peek(0) {
				if ch == '\n' {
					break;
				}

				lexer.pos += 1;
			}

			continue;
		}

		if is_symbol_start(ch) {
			tokens.push(lexer.scan_symbol());
			continue;
		}

		if ch == '"' || ch == '\'' {
			tokens.push(lexer.scan_string(ch)?);
			continue;
		}

		if lexer.looks_like_number() {
			tokens.push(lexer.scan_number());
			continue;
		}

		if let Some(kind) = punctuation(ch) {
			tokens.push(Token {
				kind,
				text: ch.to_string(),
				line: lexer.line,
			});

			lexer.pos += 1;
			continue;
		}

		if let Some(token) = lexer.scan_operator() {
			tokens.push(token);
			continue;
		}

		return Err(PolicyError::UnexpectedChar(ch, lexer.line));
	}

	Ok(tokens)
}

fn is_symbol_start(ch: char) -> bool {
	ch.is_ascii_alphabetic() || ch == '_'
}

fn is_symbol_char(ch: char) -> bool {
	ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' || ch == '.'
}

fn punctuation(ch: char) -> Option<TokenKind> {
	match ch {
		'(' => Some(TokenKind::LeftParen),
		')' => Some(TokenKind::RightParen),
		'[' => Some(TokenKind::LeftBracket),
		']' => Some(TokenKind::RightBracket),
		'{' => Some(TokenKind::LeftBrace),
		'}' => Some(TokenKind::RightBrace),
		_ => None,
	}
}

// Longest literal first so that << is not consumed as two tokens.
const OPERATORS: [&str; 12] = [
	"<<", ">>", "<=", ">=", "==", "!=",
	"+", "-", "*", "/", "<", ">",
];

impl Lexer {
	fn peek(&self, offset: usize) -> Option<char> {
		self.chars.get(self.pos + offset).copied()
	}

	/// A `-` or `.` begins a number only when digits follow; a lone
	/// `-` remains the subtraction operator.
	fn looks_like_number(&self) -> bool {
		let digit_at = |offset: usize| {
			self.peek(offset).is_some_and(|ch| ch.is_ascii_digit())
		};

		match self.peek(0) {
			Some(ch) if ch.is_ascii_digit() => true,
			Some('.') => digit_at(1),
			Some('-') => {
				digit_at(1) || (self.peek(1) == Some('.') && digit_at(2))
			},
			_ => false,
		}
	}

	fn scan_symbol(&mut self) -> Token {
		let start = self.pos;

		while self.peek(0).is_some_and(is_symbol_char) {
			self.pos += 1;
		}

		Token {
			kind: TokenKind::Symbol,
			text: self.chars[start..self.pos].iter().collect(),
			line: self.line,
		}
	}

	fn scan_string(&mut self, quote: char) -> Result<Token, PolicyError> {
		let line = self.line;
		self.pos += 1;

		let start = self.pos;

		loop {
			match self.peek(0) {
				None => return Err(PolicyError::UnterminatedString(line)),

				Some(ch) if ch == quote => break,

				Some('\\') => self.pos += 2,

				Some(ch) => {
					if ch == '\n' {
						self.line += 1;
					}

					self.pos += 1;
				},
			}
		}

		let text = self.chars[start..self.pos.min(self.chars.len())]
			.iter()
			.collect();

		self.pos += 1;

		Ok(Token {
			kind: TokenKind::Str,
			text,
			line,
		})
	}

	fn scan_number(&mut self) -> Token {
		let start = self.pos;

		if self.peek(0) == Some('-') {
			self.pos += 1;
		}

		let kind = if self.peek(0) == Some('0')
			&& matches!(self.peek(1), Some('x' | 'X'))
		{
			self.pos += 2;

			while self.peek(0).is_some_and(|ch| ch.is_ascii_hexdigit()) {
				self.pos += 1;
			}

			NumberKind::Hex
		} else {
			let digits_start = self.pos;

			while self.peek(0).is_some_and(|ch| ch.is_ascii_digit()) {
				self.pos += 1;
			}

			let digit_count = self.pos - digits_start;

			if self.peek(0) == Some('.')
				&& self.peek(1).is_some_and(|ch| ch.is_ascii_digit())
			{
				self.pos += 1;

				while self.peek(0).is_some_and(|ch| ch.is_ascii_digit()) {
					self.pos += 1;
				}

				self.scan_exponent();
				NumberKind::Float
			} else if self.scan_exponent() {
				// Exponent notation is only recognized on floats.
				NumberKind::Float
			} else if digit_count > 1
				&& self.chars[digits_start] == '0'
			{
				// Accepted for backwards compatibility.
				NumberKind::Octal
			} else {
				NumberKind::Integer
			}
		};

		Token {
			kind: TokenKind::Number(kind),
			text: self.chars[start..self.pos].iter().collect(),
			line: self.line,
		}
	}

	fn scan_exponent(&mut self) -> bool {
		if !matches!(self.peek(0), Some('e' | 'E')) {
			return false;
		}

		let mut offset = 1;

		if matches!(self.peek(1), Some('+' | '-')) {
			offset = 2;
		}

		if !self.peek(offset).is_some_and(|ch| ch.is_ascii_digit()) {
			return false;
		}

		self.pos += offset;

		while self.peek(0).is_some_and(|ch| ch.is_ascii_digit()) {
			self.pos += 1;
		}

		true
	}

	fn scan_operator(&mut self) -> Option<Token> {
		for op in OPERATORS {
			let matched = op
				.chars()
				.enumerate()
				.all(|(index, ch)| self.peek(index) == Some(ch));

			if matched {
				let token = Token {
					kind: TokenKind::Operator,
					text: op.to_owned(),
					line: self.line,
				};

				self.pos += op.len();
				return Some(token);
			}
		}

		None
	}
}
