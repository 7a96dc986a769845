//! Server statistics

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::info;

/// Counters updated by the reactor thread, readable from anywhere.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub messages_dispatched: AtomicU64,
    pub application_errors: AtomicU64,
    pub protocol_errors: AtomicU64,
    pub truncated: AtomicU64,
    pub bytes_received: AtomicU64,
    pub bytes_sent: AtomicU64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn sub(counter: &AtomicU64, n: u64) {
        counter.fetch_sub(n, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub fn log_summary(&self, uptime: Duration) {
        let msgs = Self::get(&self.messages_dispatched);
        let rate = msgs as f64 / uptime.as_secs_f64().max(f64::EPSILON);

        info!(
            uptime_secs = uptime.as_secs(),
            messages = msgs,
            rate_per_sec = rate,
            app_errors = Self::get(&self.application_errors),
            protocol_errors = Self::get(&self.protocol_errors),
            truncated = Self::get(&self.truncated),
            bytes_in = Self::get(&self.bytes_received),
            bytes_out = Self::get(&self.bytes_sent),
            active = Self::get(&self.connections_active),
            total = Self::get(&self.connections_total),
            rejected = Self::get(&self.connections_rejected),
            "server stats"
        );
    }
}
