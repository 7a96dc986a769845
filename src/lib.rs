//! Hydra - Event-driven Thrift binary RPC server
//!
//! Arsitektur:
//! - Zero-Copy: fields that fit in one read are borrowed from the read buffer
//! - Resumable: decoders park mid-field and continue on the next read
//! - Single-Threaded: one mio reactor owns every connection
//! - Binary Protocol: Thrift binary envelopes, versioned and legacy
//!
//! ```no_run
//! use hydra::{serve, ApplicationError, ServerConfig, Value};
//!
//! let listener = std::net::TcpListener::bind("127.0.0.1:9090")?;
//! serve(
//!     listener,
//!     |method: &str, _seq: u32, _args: &[u8]| match method {
//!         "ping" => Ok(Value::from("pong")),
//!         other => Err(ApplicationError::unknown_method(other)),
//!     },
//!     ServerConfig::default(),
//! )?;
//! # Ok::<(), hydra::HydraError>(())
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod protocol;
pub mod service;

pub use config::ServerConfig;
pub use error::{HydraError, ProtocolError, Result};
#[cfg(unix)]
pub use network::server_run;
pub use network::{serve, Address, Server, ServerStats, StopHandle};
pub use protocol::{decode_struct, decode_struct_with, Value};
pub use service::{ApplicationError, ApplicationErrorKind, Outcome, Service, SharedService};
