//! Decoded Thrift values
//!
//! Arguments reach the service as raw captured bytes. Handlers that want a
//! typed view call [`decode_struct`] (or [`decode_struct_with`] for a
//! configured depth bound), which walks a complete buffer using the
//! same cursor and primitive reads as the envelope decoder.

use bytes::Bytes;

use super::binary::{check_len, element_type, read_f64, read_i16, read_i32, read_i64, read_i8};
use super::message::TType;
use crate::core::{ByteCursor, Feed, NeedMore};
use crate::error::ProtocolError;

/// Default nesting bound for [`decode_struct`]
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Thrift value tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// No value (void result)
    Void,
    Bool(bool),
    Byte(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    Double(f64),
    /// String or binary
    Binary(Bytes),
    Struct(Vec<(i16, Value)>),
    List(TType, Vec<Value>),
    Set(TType, Vec<Value>),
    Map(TType, TType, Vec<(Value, Value)>),
}

impl Value {
    /// Wire type of this value.
    pub fn ttype(&self) -> TType {
        match self {
            Value::Void => TType::Void,
            Value::Bool(_) => TType::Bool,
            Value::Byte(_) => TType::Byte,
            Value::I16(_) => TType::I16,
            Value::I32(_) => TType::I32,
            Value::I64(_) => TType::I64,
            Value::Double(_) => TType::Double,
            Value::Binary(_) => TType::String,
            Value::Struct(_) => TType::Struct,
            Value::List(..) => TType::List,
            Value::Set(..) => TType::Set,
            Value::Map(..) => TType::Map,
        }
    }

    /// String view, if this is UTF-8 binary.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Binary(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    /// Field lookup on a struct value.
    pub fn field(&self, id: i16) -> Option<&Value> {
        match self {
            Value::Struct(fields) => fields.iter().find(|(fid, _)| *fid == id).map(|(_, v)| v),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Binary(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Binary(Bytes::from(s))
    }
}

/// Decode a complete struct (fields up to STOP) from `raw`.
pub fn decode_struct(raw: &[u8]) -> Result<Vec<(i16, Value)>, ProtocolError> {
    decode_struct_with(raw, DEFAULT_MAX_DEPTH)
}

/// Like [`decode_struct`], allowing at most `max_depth` nested composites
/// (the outer struct counts as one).
pub fn decode_struct_with(
    raw: &[u8],
    max_depth: usize,
) -> Result<Vec<(i16, Value)>, ProtocolError> {
    let mut cursor = ByteCursor::new();
    let mut input = cursor.feed(raw);
    match decode_value(TType::Struct, &mut input, raw.len(), max_depth)? {
        Value::Struct(fields) => Ok(fields),
        _ => Err(ProtocolError::InvalidType(TType::Struct as u8)),
    }
}

/// Decode one value of `ttype` from fully buffered input.
///
/// Running out of bytes is [`ProtocolError::Truncated`]; this is meant for
/// complete buffers, not for resuming across reads.
pub fn decode_value(
    ttype: TType,
    input: &mut Feed<'_, '_>,
    max_len: usize,
    max_depth: usize,
) -> Result<Value, ProtocolError> {
    decode_nested(ttype, input, max_len, max_depth, max_depth)
}

fn decode_nested(
    ttype: TType,
    input: &mut Feed<'_, '_>,
    max_len: usize,
    depth: usize,
    limit: usize,
) -> Result<Value, ProtocolError> {
    let truncated = |_: NeedMore| ProtocolError::Truncated;

    let value = match ttype {
        TType::Bool => Value::Bool(read_i8(input).map_err(truncated)? != 0),
        TType::Byte => Value::Byte(read_i8(input).map_err(truncated)?),
        TType::I16 => Value::I16(read_i16(input).map_err(truncated)?),
        TType::I32 => Value::I32(read_i32(input).map_err(truncated)?),
        TType::I64 | TType::U64 => Value::I64(read_i64(input).map_err(truncated)?),
        TType::Double => Value::Double(read_f64(input).map_err(truncated)?),
        TType::String | TType::Utf8 | TType::Utf16 => {
            let len = check_len("string", read_i32(input).map_err(truncated)?, max_len)?;
            Value::Binary(input.take(len).map_err(truncated)?.into_bytes())
        }
        TType::Struct => {
            let depth = descend(depth, limit)?;
            let mut fields = Vec::new();
            loop {
                let tag = read_i8(input).map_err(truncated)? as u8;
                let field_type = TType::from_u8(tag).ok_or(ProtocolError::InvalidType(tag))?;
                if field_type == TType::Stop {
                    break;
                }
                let id = read_i16(input).map_err(truncated)?;
                fields.push((id, decode_nested(field_type, input, max_len, depth, limit)?));
            }
            Value::Struct(fields)
        }
        TType::List | TType::Set => {
            let depth = descend(depth, limit)?;
            let elem = element_type(read_i8(input).map_err(truncated)? as u8)?;
            let size = check_len("container", read_i32(input).map_err(truncated)?, max_len)?;
            let mut items = Vec::with_capacity(size.min(input.buffered()));
            for _ in 0..size {
                items.push(decode_nested(elem, input, max_len, depth, limit)?);
            }
            if ttype == TType::List {
                Value::List(elem, items)
            } else {
                Value::Set(elem, items)
            }
        }
        TType::Map => {
            let depth = descend(depth, limit)?;
            let key = element_type(read_i8(input).map_err(truncated)? as u8)?;
            let val = element_type(read_i8(input).map_err(truncated)? as u8)?;
            let size = check_len("container", read_i32(input).map_err(truncated)?, max_len)?;
            let mut entries = Vec::with_capacity(size.min(input.buffered()));
            for _ in 0..size {
                let k = decode_nested(key, input, max_len, depth, limit)?;
                let v = decode_nested(val, input, max_len, depth, limit)?;
                entries.push((k, v));
            }
            Value::Map(key, val, entries)
        }
        TType::Stop | TType::Void => return Err(ProtocolError::InvalidType(ttype as u8)),
    };
    Ok(value)
}

fn descend(depth: usize, limit: usize) -> Result<usize, ProtocolError> {
    depth
        .checked_sub(1)
        .ok_or(ProtocolError::DepthExceeded { max: limit })
}
