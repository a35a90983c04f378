/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::{
	collections::BTreeMap,
	io::{self, Cursor, Read},
};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use crate::{
	entity::Sample,
	policy::value::{Value, ValueMap},
	rpc::StatisticsPayload,
};

#[derive(Debug, Error)]
pub enum CodecError {
	#[error(transparent)]
	Io(#[from] io::Error),

	#[error("invalid value tag {0}")]
	InvalidTag(u8),

	#[error("invalid utf-8 in payload")]
	Utf8,
}

// Integers within the 31-bit range use the compact 4-byte encoding;
// anything larger gets 8 bytes. The decoder accepts both widths.
const TAG_NIL: u8 = 0;
const TAG_FALSE: u8 = 1;
const TAG_TRUE: u8 = 2;
const TAG_I4: u8 = 3;
const TAG_I8: u8 = 4;
const TAG_FLOAT: u8 = 5;
const TAG_STR: u8 = 6;
const TAG_LIST: u8 = 7;
const TAG_MAP: u8 = 8;

pub fn encode_statistics(payload: &StatisticsPayload) -> Vec<u8> {
	let mut buf = Vec::new();

	// Infallible: the sink is an in-memory buffer.
	let _ = write_sample(&mut buf, &payload.host);
	let _ = buf.write_u32::<BigEndian>(payload.guests.len() as u32);

	for (name, sample) in &payload.guests {
		let _ = write_str(&mut buf, name);
		let _ = write_sample(&mut buf, sample);
	}

	buf
}

pub fn decode_statistics(bytes: &[u8]) -> Result<StatisticsPayload, CodecError> {
	let mut cursor = Cursor::new(bytes);

	let host = read_sample(&mut cursor)?;
	let count = cursor.read_u32::<BigEndian>()?;

	let mut guests = BTreeMap::new();

	for _ in 0..count {
		let name = read_str(&mut cursor)?;
		let sample = read_sample(&mut cursor)?;

		guests.insert(name, sample);
	}

	Ok(StatisticsPayload {
		host,
		guests,
	})
}

fn write_sample(buf: &mut Vec<u8>, sample: &Sample) -> io::Result<()> {
	buf.write_u64::<BigEndian>(sample.timestamp)?;
	buf.write_u32::<BigEndian>(sample.fields.len() as u32)?;

	for (key, value) in &sample.fields {
		write_str(buf, key)?;
		write_value(buf, value)?;
	}

	Ok(())
}

fn read_sample(cursor: &mut Cursor<&[u8]>) -> Result<Sample, CodecError> {
	let timestamp = cursor.read_u64::<BigEndian>()?;
	let count = cursor.read_u32::<BigEndian>()?;

	let mut fields = ValueMap::new();

	for _ in 0..count {
		let key = read_str(cursor)?;
		let value = read_value(cursor)?;

		fields.insert(key, value);
	}

	Ok(Sample {
		timestamp,
		fields,
	})
}

fn write_value(buf: &mut Vec<u8>, value: &Value) -> io::Result<()> {
	match value {
		Value::Bool(false) => buf.write_u8(TAG_FALSE)?,
		Value::Bool(true) => buf.write_u8(TAG_TRUE)?,

		Value::Int(value) => match i32::try_from(*value) {
			Ok(value) => {
				buf.write_u8(TAG_I4)?;
				buf.write_i32::<BigEndian>(value)?;
			},

			Err(_) => {
				buf.write_u8(TAG_I8)?;
				buf.write_i64::<BigEndian>(*value)?;
			},
		},

		Value::Float(value) => {
			buf.write_u8(TAG_FLOAT)?;
			buf.write_f64::<BigEndian>(*value)?;
		},

		Value::Str(value) => {
			buf.write_u8(TAG_STR)?;
			write_str(buf, value)?;
		},

		Value::List(items) => {
			buf.write_u8(TAG_LIST)?;
			buf.write_u32::<BigEndian>(items.len() as u32)?;

			for item in items {
				write_value(buf, item)?;
			}
		},

		Value::Map(map) => {
			buf.write_u8(TAG_MAP)?;
			buf.write_u32::<BigEndian>(map.len() as u32)?;

			for (key, value) in map {
				write_str(buf, key)?;
				write_value(buf, value)?;
			}
		},

		// Host-side values never travel over the wire.
		_ => buf.write_u8(TAG_NIL)?,
	}

	Ok(())
}

fn read_value(cursor: &mut Cursor<&[u8]>) -> Result<Value, CodecError> {
	let tag = cursor.read_u8()?;

	let value = match tag {
		TAG_NIL => Value::Nil,
		TAG_FALSE => Value::Bool(false),
		TAG_TRUE => Value::Bool(true),
		TAG_I4 => Value::Int(i64::from(cursor.read_i32::<BigEndian>()?)),
		TAG_I8 => Value::Int(cursor.read_i64::<BigEndian>()?),
		TAG_FLOAT => Value::Float(cursor.read_f64::<BigEndian>()?),
		TAG_STR => Value::Str(read_str(cursor)?),

		TAG_LIST => {
			let count = cursor.read_u32::<BigEndian>()?;
			let mut items = Vec::with_capacity(count as usize);

			for _ in 0..count {
				items.push(read_value(cursor)?);
			}

			Value::List(items)
		},

		TAG_MAP => {
			let count = cursor.read_u32::<BigEndian>()?;
			let mut map = ValueMap::new();

			for _ in 0..count {
				let key = read_str(cursor)?;
				let value = read_value(cursor)?;

				map.insert(key, value);
			}

			Value::Map(map)
		},

		tag => return Err(CodecError::InvalidTag(tag)),
	};

	Ok(value)
}

fn write_str(buf: &mut Vec<u8>, value: &str) -> io::Result<()> {
	buf.write_u32::<BigEndian>(value.len() as u32)?;
	buf.extend_from_slice(value.as_bytes());

	Ok(())
}

fn read_str(cursor: &mut Cursor<&[u8]>) -> Result<String, CodecError> {
	let len = cursor.read_u32::<BigEndian>()?;

	let mut bytes = vec![0u8; len as usize];
	cursor.read_exact(&mut bytes)?;

	String::from_utf8(bytes).map_err(|_| CodecError::Utf8)
}
