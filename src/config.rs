//! Server configuration

use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Reject legacy unversioned envelopes
    pub strict: bool,
    /// Upper bound on method name length
    pub max_name_len: usize,
    /// Upper bound on string, container and argument lengths
    pub max_field_len: usize,
    /// Nesting limit for composite argument values
    pub max_depth: usize,
    /// Accepts beyond this are dropped
    pub max_connections: usize,
    /// Shared read scratch buffer size
    pub read_buffer_size: usize,
    /// Keep connections open after a reply
    pub keep_alive: bool,
    /// Close connections with no I/O for this long
    pub idle_timeout: Option<Duration>,
    /// SO_SNDBUF / SO_RCVBUF for accepted sockets
    pub socket_buffer_size: Option<usize>,
    pub events_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            strict: false,
            max_name_len: 64 * 1024,
            max_field_len: 16 * 1024 * 1024,
            max_depth: 64,
            max_connections: 1024,
            read_buffer_size: 4 * 1024,
            keep_alive: true,
            idle_timeout: None,
            socket_buffer_size: None,
            events_capacity: 1024,
        }
    }
}

impl ServerConfig {
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_max_name_len(mut self, max: usize) -> Self {
        self.max_name_len = max;
        self
    }

    pub fn with_max_field_len(mut self, max: usize) -> Self {
        self.max_field_len = max;
        self
    }

    pub fn with_max_depth(mut self, max: usize) -> Self {
        self.max_depth = max;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_socket_buffer_size(mut self, size: Option<usize>) -> Self {
        self.socket_buffer_size = size;
        self
    }
}
