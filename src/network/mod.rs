//! Network Layer: mio reactor and per-connection state machine
//!
//! Fitur:
//! - Non-blocking I/O dengan epoll/kqueue
//! - Resumable decoding across arbitrarily fragmented reads
//! - Pipelined requests answered in order on one connection
//! - TCP and Unix domain listeners behind one socket type

mod connection;
mod server;
mod socket;
mod stats;

pub use connection::{tune_socket, Connection, EventContext, Phase};
#[cfg(unix)]
pub use server::server_run;
pub use server::{serve, Server, StopHandle};
pub use socket::{Address, Listener, Stream};
pub use stats::ServerStats;
