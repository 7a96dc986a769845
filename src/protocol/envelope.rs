//! Resumable message-begin decoder
//!
//! The envelope is read field by field. When a read comes up short the
//! decoder remembers which field it was on, so the next read event resumes
//! exactly there instead of re-reading bytes it already consumed.

use std::borrow::Cow;

use bytes::Bytes;

use super::binary::{check_len, read_i32};
use super::message::{MessageType, TYPE_MASK, VERSION_1, VERSION_MASK};
use crate::config::ServerConfig;
use crate::core::Feed;
use crate::error::ProtocolError;

/// Which framing the peer used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVariant {
    /// Version tag + name length + name
    Versioned,
    /// First word is the name length itself
    LegacyUnversioned,
}

/// Decoded message header.
///
/// The method name is kept as raw bytes; the wire does not promise UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub method_name: Bytes,
    pub sequence_id: u32,
    pub message_type: MessageType,
    pub variant: ProtocolVariant,
}

impl Envelope {
    /// Method name as text, invalid UTF-8 replaced with U+FFFD.
    pub fn method_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.method_name)
    }
}

/// Field the decoder is waiting on.
#[derive(Debug)]
enum Step {
    Size,
    NameLen {
        message_type: MessageType,
    },
    Name {
        len: usize,
        message_type: MessageType,
        variant: ProtocolVariant,
    },
    SequenceId {
        name: Bytes,
        message_type: MessageType,
        variant: ProtocolVariant,
    },
}

/// Message-begin decoder with per-field progress.
#[derive(Debug)]
pub struct EnvelopeDecoder {
    strict: bool,
    max_name_len: usize,
    step: Step,
}

impl EnvelopeDecoder {
    pub fn new(strict: bool, max_name_len: usize) -> Self {
        Self {
            strict,
            max_name_len,
            step: Step::Size,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.strict, config.max_name_len)
    }

    /// Continue decoding with whatever `input` holds.
    ///
    /// `Ok(None)` means NeedMore: wait for the next read and call again.
    pub fn resume(&mut self, input: &mut Feed<'_, '_>) -> Result<Option<Envelope>, ProtocolError> {
        loop {
            let next = match self.step {
                Step::Size => {
                    let Ok(sz) = read_i32(input) else {
                        return Ok(None);
                    };
                    self.begin(sz)?
                }
                Step::NameLen { message_type } => {
                    let Ok(raw) = read_i32(input) else {
                        return Ok(None);
                    };
                    Step::Name {
                        len: check_len("method name", raw, self.max_name_len)?,
                        message_type,
                        variant: ProtocolVariant::Versioned,
                    }
                }
                Step::Name {
                    len,
                    message_type,
                    variant,
                } => {
                    let Ok(bytes) = input.take(len) else {
                        return Ok(None);
                    };
                    Step::SequenceId {
                        name: bytes.into_bytes(),
                        message_type,
                        variant,
                    }
                }
                Step::SequenceId { .. } => {
                    let Ok(seq) = read_i32(input) else {
                        return Ok(None);
                    };
                    return Ok(self.finish(seq as u32));
                }
            };
            self.step = next;
        }
    }

    /// Method name, once it has been decoded.
    pub fn method_name(&self) -> Option<&[u8]> {
        match &self.step {
            Step::SequenceId { name, .. } => Some(&name[..]),
            _ => None,
        }
    }

    /// True while part of an envelope has been consumed.
    pub fn in_progress(&self) -> bool {
        !matches!(self.step, Step::Size)
    }

    /// Forget any partial envelope.
    pub fn reset(&mut self) {
        self.step = Step::Size;
    }

    fn begin(&self, sz: i32) -> Result<Step, ProtocolError> {
        if sz < 0 {
            let version = sz & VERSION_MASK;
            if version != VERSION_1 {
                return Err(ProtocolError::BadVersion { version });
            }
            let type_byte = (sz & TYPE_MASK) as u8;
            let message_type = MessageType::from_u8(type_byte)
                .ok_or(ProtocolError::InvalidMessageType(type_byte))?;
            return Ok(Step::NameLen { message_type });
        }

        if self.strict {
            return Err(ProtocolError::BadVersion { version: sz });
        }
        Ok(Step::Name {
            len: check_len("method name", sz, self.max_name_len)?,
            message_type: MessageType::Call,
            variant: ProtocolVariant::LegacyUnversioned,
        })
    }

    fn finish(&mut self, sequence_id: u32) -> Option<Envelope> {
        match std::mem::replace(&mut self.step, Step::Size) {
            Step::SequenceId {
                name,
                message_type,
                variant,
            } => Some(Envelope {
                method_name: name,
                sequence_id,
                message_type,
                variant,
            }),
            _ => None,
        }
    }
}
