//! Binary protocol encoder
//!
//! Encode langsung ke buffer internal yang di-reuse antar pesan. After the
//! first few messages the buffer has grown to the working size and encoding
//! stops allocating.

use bytes::{BufMut, BytesMut};

use super::message::{MessageType, TType, VERSION_1};
use super::value::Value;
use crate::service::ApplicationError;

/// Reusable encoder buffer
pub struct Encoder {
    buffer: BytesMut,
}

impl Encoder {
    /// Membuat encoder dengan initial capacity tertentu
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Reset encoder untuk reuse
    #[inline(always)]
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Get current buffer content
    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Versioned message header.
    pub fn write_message_begin(
        &mut self,
        name: impl AsRef<[u8]>,
        message_type: MessageType,
        sequence_id: u32,
    ) {
        self.buffer.put_i32(VERSION_1 | message_type as i32);
        self.write_binary(name.as_ref());
        self.buffer.put_u32(sequence_id);
    }

    /// Legacy unversioned call header: name length, name, sequence id.
    pub fn write_legacy_begin(&mut self, name: impl AsRef<[u8]>, sequence_id: u32) {
        self.write_binary(name.as_ref());
        self.buffer.put_u32(sequence_id);
    }

    /// Struct fields followed by STOP. `Void` fields are omitted.
    pub fn write_struct(&mut self, fields: &[(i16, Value)]) {
        for (id, value) in fields {
            self.write_field(*id, value);
        }
        self.buffer.put_u8(TType::Stop as u8);
    }

    pub fn write_value(&mut self, value: &Value) {
        match value {
            Value::Void => {}
            Value::Bool(b) => self.buffer.put_u8(u8::from(*b)),
            Value::Byte(v) => self.buffer.put_i8(*v),
            Value::I16(v) => self.buffer.put_i16(*v),
            Value::I32(v) => self.buffer.put_i32(*v),
            Value::I64(v) => self.buffer.put_i64(*v),
            Value::Double(v) => self.buffer.put_u64(v.to_bits()),
            Value::Binary(bytes) => self.write_binary(bytes),
            Value::Struct(fields) => self.write_struct(fields),
            Value::List(elem, items) | Value::Set(elem, items) => {
                self.buffer.put_u8(*elem as u8);
                self.buffer.put_i32(items.len() as i32);
                for item in items {
                    self.write_value(item);
                }
            }
            Value::Map(key, val, entries) => {
                self.buffer.put_u8(*key as u8);
                self.buffer.put_u8(*val as u8);
                self.buffer.put_i32(entries.len() as i32);
                for (k, v) in entries {
                    self.write_value(k);
                    self.write_value(v);
                }
            }
        }
    }

    /// Encode a complete call message.
    pub fn encode_call(
        &mut self,
        name: impl AsRef<[u8]>,
        sequence_id: u32,
        args: &[(i16, Value)],
    ) -> &[u8] {
        let start = self.buffer.len();
        self.write_message_begin(name, MessageType::Call, sequence_id);
        self.write_struct(args);
        &self.buffer[start..]
    }

    /// Encode a reply; the result struct carries `result` as field 0.
    pub fn encode_reply(
        &mut self,
        name: impl AsRef<[u8]>,
        sequence_id: u32,
        result: &Value,
    ) -> &[u8] {
        let start = self.buffer.len();
        self.write_message_begin(name, MessageType::Reply, sequence_id);
        self.write_field(0, result);
        self.buffer.put_u8(TType::Stop as u8);
        &self.buffer[start..]
    }

    /// Encode an exception message carrying an application exception struct.
    pub fn encode_exception(
        &mut self,
        name: impl AsRef<[u8]>,
        sequence_id: u32,
        error: &ApplicationError,
    ) -> &[u8] {
        let start = self.buffer.len();
        self.write_message_begin(name, MessageType::Exception, sequence_id);
        // field 1: message, field 2: kind
        self.write_field(1, &Value::from(error.message.as_str()));
        self.write_field(2, &Value::I32(error.kind as i32));
        self.buffer.put_u8(TType::Stop as u8);
        &self.buffer[start..]
    }

    fn write_field(&mut self, id: i16, value: &Value) {
        if let Value::Void = value {
            return;
        }
        self.buffer.put_u8(value.ttype() as u8);
        self.buffer.put_i16(id);
        self.write_value(value);
    }

    fn write_binary(&mut self, bytes: &[u8]) {
        self.buffer.put_i32(bytes.len() as i32);
        self.buffer.put_slice(bytes);
    }
}
