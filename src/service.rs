//! Application boundary
//!
//! The reactor hands every decoded call to a [`Service`]. Method name and
//! sequence id come from the envelope; `args` are the raw bytes of the
//! argument struct (see [`decode_struct`](crate::protocol::decode_struct)).

use std::fmt;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::protocol::Value;

/// Application exception kinds, numbered as on the wire.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationErrorKind {
    Unknown = 0,
    UnknownMethod = 1,
    InvalidMessageType = 2,
    WrongMethodName = 3,
    BadSequenceId = 4,
    MissingResult = 5,
    InternalError = 6,
    ProtocolError = 7,
}

impl fmt::Display for ApplicationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Error returned by a service, sent back as an exception message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ApplicationError {
    pub kind: ApplicationErrorKind,
    pub message: String,
}

impl ApplicationError {
    pub fn new(kind: ApplicationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unknown_method(method: &str) -> Self {
        Self::new(
            ApplicationErrorKind::UnknownMethod,
            format!("unknown method: {method}"),
        )
    }
}

/// Result of one call.
pub type Outcome = Result<Value, ApplicationError>;

/// Application handler invoked once per decoded call.
pub trait Service {
    fn submit(&mut self, method: &str, sequence_id: u32, args: &[u8]) -> Outcome;
}

impl<F> Service for F
where
    F: FnMut(&str, u32, &[u8]) -> Outcome,
{
    fn submit(&mut self, method: &str, sequence_id: u32, args: &[u8]) -> Outcome {
        self(method, sequence_id, args)
    }
}

/// Handler shared with other threads.
///
/// The lock is held for the call only, never across I/O waits.
pub struct SharedService<S>(Arc<Mutex<S>>);

impl<S> SharedService<S> {
    pub fn new(inner: Arc<Mutex<S>>) -> Self {
        Self(inner)
    }
}

impl<S> Clone for SharedService<S> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<S: Service> Service for SharedService<S> {
    fn submit(&mut self, method: &str, sequence_id: u32, args: &[u8]) -> Outcome {
        let mut inner = self.0.lock().map_err(|_| {
            ApplicationError::new(ApplicationErrorKind::InternalError, "service lock poisoned")
        })?;
        inner.submit(method, sequence_id, args)
    }
}
