//! Argument struct capture
//!
//! After the envelope comes the argument struct: fields of
//! `[type: i8][id: i16][value]` closed by a STOP byte. The reader walks that
//! structure (composite values included) only to find where it ends, copying
//! the raw bytes aside for the service. Walking uses an explicit frame stack,
//! so a read that stops mid-value resumes at the exact element it was on.

use bytes::{Bytes, BytesMut};

use super::binary::{check_len, element_type, FieldSkipper};
use super::message::TType;
use crate::config::ServerConfig;
use crate::core::Feed;
use crate::error::ProtocolError;

/// Open composite value.
#[derive(Debug, Clone, Copy)]
enum Frame {
    /// Expecting a field header; `field` is set once the type byte is in.
    Struct { field: Option<TType> },
    /// List or set with `remaining` elements left.
    Seq { elem: TType, remaining: usize },
    /// Map with `remaining` keys and values left, keys first.
    Map {
        key: TType,
        value: TType,
        remaining: usize,
    },
}

/// Resumable walker that captures one argument struct.
#[derive(Debug)]
pub struct ArgsReader {
    stack: Vec<Frame>,
    pending: Option<TType>,
    skipper: FieldSkipper,
    captured: BytesMut,
    max_depth: usize,
    max_len: usize,
    started: bool,
}

impl ArgsReader {
    pub fn new(max_depth: usize, max_len: usize) -> Self {
        Self {
            stack: Vec::with_capacity(8),
            pending: None,
            skipper: FieldSkipper::new(max_len),
            captured: BytesMut::new(),
            max_depth,
            max_len,
            started: false,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.max_depth, config.max_field_len)
    }

    /// Continue walking with whatever `input` holds.
    ///
    /// Returns the raw struct bytes (STOP included) once complete,
    /// `Ok(None)` on NeedMore.
    pub fn resume(&mut self, input: &mut Feed<'_, '_>) -> Result<Option<Bytes>, ProtocolError> {
        if !self.started {
            self.started = true;
            self.push(Frame::Struct { field: None })?;
        }

        loop {
            if self.captured.len() > self.max_len {
                return Err(ProtocolError::OversizedField {
                    field: "arguments",
                    len: self.captured.len(),
                    max: self.max_len,
                });
            }

            if let Some(ttype) = self.pending {
                if !self.read_value(ttype, input)? {
                    return Ok(None);
                }
                continue;
            }

            let Some(top) = self.stack.last_mut() else {
                let raw = self.captured.split().freeze();
                self.started = false;
                return Ok(Some(raw));
            };

            match top {
                Frame::Struct { field: None } => {
                    let Ok(taken) = input.take(1) else {
                        return Ok(None);
                    };
                    let tag = taken[0];
                    self.captured.extend_from_slice(&taken);
                    let ttype = TType::from_u8(tag).ok_or(ProtocolError::InvalidType(tag))?;
                    if ttype == TType::Stop {
                        self.stack.pop();
                    } else {
                        *top = Frame::Struct { field: Some(ttype) };
                    }
                }
                Frame::Struct { field: Some(ttype) } => {
                    let ttype = *ttype;
                    // field id, value follows
                    let Ok(taken) = input.take(2) else {
                        return Ok(None);
                    };
                    self.captured.extend_from_slice(&taken);
                    *top = Frame::Struct { field: None };
                    self.pending = Some(ttype);
                }
                Frame::Seq { remaining: 0, .. } | Frame::Map { remaining: 0, .. } => {
                    self.stack.pop();
                }
                Frame::Seq { elem, remaining } => {
                    *remaining -= 1;
                    self.pending = Some(*elem);
                }
                Frame::Map {
                    key,
                    value,
                    remaining,
                } => {
                    let next = if *remaining % 2 == 0 { *key } else { *value };
                    *remaining -= 1;
                    self.pending = Some(next);
                }
            }
        }
    }

    /// Drop partial progress and captured bytes.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.pending = None;
        self.skipper.reset();
        self.captured.clear();
        self.started = false;
    }

    /// True while part of an argument struct has been consumed.
    pub fn in_progress(&self) -> bool {
        self.started
    }

    /// Read one value of `ttype`; false on NeedMore.
    fn read_value(&mut self, ttype: TType, input: &mut Feed<'_, '_>) -> Result<bool, ProtocolError> {
        match ttype {
            TType::Struct => {
                self.push(Frame::Struct { field: None })?;
            }
            TType::List | TType::Set => {
                let Ok(header) = input.take(5) else {
                    return Ok(false);
                };
                self.captured.extend_from_slice(&header);
                let elem = element_type(header[0])?;
                let size = i32::from_be_bytes([header[1], header[2], header[3], header[4]]);
                let remaining = check_len("container", size, self.max_len)?;
                self.push(Frame::Seq { elem, remaining })?;
            }
            TType::Map => {
                let Ok(header) = input.take(6) else {
                    return Ok(false);
                };
                self.captured.extend_from_slice(&header);
                let key = element_type(header[0])?;
                let value = element_type(header[1])?;
                let size = i32::from_be_bytes([header[2], header[3], header[4], header[5]]);
                let entries = check_len("container", size, self.max_len)?;
                self.push(Frame::Map {
                    key,
                    value,
                    remaining: entries * 2,
                })?;
            }
            scalar => {
                if self
                    .skipper
                    .skip_into(scalar, input, &mut self.captured)?
                    .is_none()
                {
                    return Ok(false);
                }
            }
        }
        self.pending = None;
        Ok(true)
    }

    fn push(&mut self, frame: Frame) -> Result<(), ProtocolError> {
        if self.stack.len() >= self.max_depth {
            return Err(ProtocolError::DepthExceeded {
                max: self.max_depth,
            });
        }
        self.stack.push(frame);
        Ok(())
    }
}
