//! Primitive reads dan scalar skipping
//!
//! Each read is one `take(width)` plus a big-endian conversion. A read either
//! completes or returns [`NeedMore`] having consumed nothing it cannot give
//! back, so callers only need to remember *which* read they were on.

use bytes::BytesMut;

use super::message::TType;
use crate::core::{Feed, NeedMore};
use crate::error::ProtocolError;

#[inline(always)]
fn read_array<const N: usize>(input: &mut Feed<'_, '_>) -> Result<[u8; N], NeedMore> {
    let taken = input.take(N)?;
    let mut buf = [0u8; N];
    buf.copy_from_slice(&taken);
    Ok(buf)
}

#[inline(always)]
pub fn read_i8(input: &mut Feed<'_, '_>) -> Result<i8, NeedMore> {
    Ok(i8::from_be_bytes(read_array(input)?))
}

#[inline(always)]
pub fn read_i16(input: &mut Feed<'_, '_>) -> Result<i16, NeedMore> {
    Ok(i16::from_be_bytes(read_array(input)?))
}

#[inline(always)]
pub fn read_i32(input: &mut Feed<'_, '_>) -> Result<i32, NeedMore> {
    Ok(i32::from_be_bytes(read_array(input)?))
}

#[inline(always)]
pub fn read_i64(input: &mut Feed<'_, '_>) -> Result<i64, NeedMore> {
    Ok(i64::from_be_bytes(read_array(input)?))
}

/// Bit reinterpretation of the `i64` read.
#[inline(always)]
pub fn read_f64(input: &mut Feed<'_, '_>) -> Result<f64, NeedMore> {
    Ok(f64::from_bits(read_i64(input)? as u64))
}

/// Validate a decoded `i32` length against `max`.
pub fn check_len(field: &'static str, len: i32, max: usize) -> Result<usize, ProtocolError> {
    if len < 0 {
        return Err(ProtocolError::NegativeLength { field, len });
    }
    let len = len as usize;
    if len > max {
        return Err(ProtocolError::OversizedField { field, len, max });
    }
    Ok(len)
}

/// Element type of a list, set or map header.
pub(crate) fn element_type(tag: u8) -> Result<TType, ProtocolError> {
    match TType::from_u8(tag) {
        Some(TType::Stop) | Some(TType::Void) | None => Err(ProtocolError::InvalidType(tag)),
        Some(ttype) => Ok(ttype),
    }
}

/// Resumable skipper for scalar and length-prefixed values.
///
/// Composite types need recursive descent and are left to the value walker
/// ([`ArgsReader`](super::ArgsReader)).
#[derive(Debug)]
pub struct FieldSkipper {
    max_len: usize,
    // Length prefix already taken, body still outstanding
    body_len: Option<usize>,
}

impl FieldSkipper {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            body_len: None,
        }
    }

    /// Skip one value of `ttype`.
    ///
    /// Returns `Ok(None)` on NeedMore; call again with the same type.
    pub fn skip(
        &mut self,
        ttype: TType,
        input: &mut Feed<'_, '_>,
    ) -> Result<Option<()>, ProtocolError> {
        self.advance(ttype, input, None)
    }

    /// Like [`skip`](Self::skip) but appends the consumed bytes to `sink`.
    pub fn skip_into(
        &mut self,
        ttype: TType,
        input: &mut Feed<'_, '_>,
        sink: &mut BytesMut,
    ) -> Result<Option<()>, ProtocolError> {
        self.advance(ttype, input, Some(sink))
    }

    pub fn reset(&mut self) {
        self.body_len = None;
    }

    fn advance(
        &mut self,
        ttype: TType,
        input: &mut Feed<'_, '_>,
        mut sink: Option<&mut BytesMut>,
    ) -> Result<Option<()>, ProtocolError> {
        if let Some(width) = ttype.fixed_width() {
            let Ok(taken) = input.take(width) else {
                return Ok(None);
            };
            if let Some(sink) = sink {
                sink.extend_from_slice(&taken);
            }
            return Ok(Some(()));
        }

        if ttype.is_length_prefixed() {
            let len = match self.body_len {
                Some(len) => len,
                None => {
                    let Ok(raw) = read_i32(input) else {
                        return Ok(None);
                    };
                    let len = check_len("string", raw, self.max_len)?;
                    if let Some(sink) = sink.as_mut() {
                        sink.extend_from_slice(&raw.to_be_bytes());
                    }
                    self.body_len = Some(len);
                    len
                }
            };

            let Ok(body) = input.take(len) else {
                return Ok(None);
            };
            if let Some(sink) = sink {
                sink.extend_from_slice(&body);
            }
            self.body_len = None;
            return Ok(Some(()));
        }

        if ttype.is_composite() {
            return Err(ProtocolError::CompositeSkip(ttype));
        }
        Err(ProtocolError::InvalidType(ttype as u8))
    }
}
