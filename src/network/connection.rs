//! Per-connection state machine
//!
//! ```text
//! Accepting ─▶ Reading ──envelope+args──▶ Dispatching ──▶ Writing ──keep-alive──▶ Reading
//!                 │  ╲                          │ (oneway)        │
//!                 │   ╲──protocol error──▶ Writing ─────▶ Closing ◀┘ (no keep-alive)
//!                 └──EOF / I/O error───────────────────▶ Closing ─▶ Closed
//! ```
//!
//! Transitions never block. Every socket call that would block leaves the
//! connection in its current phase until the reactor reports readiness again.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use bytes::Bytes;
use mio::{Interest, Registry, Token};
use tracing::{debug, trace, warn};

use super::socket::{Address, Stream};
use super::stats::ServerStats;
use crate::config::ServerConfig;
use crate::core::ByteCursor;
use crate::error::ProtocolError;
use crate::protocol::{ArgsReader, Encoder, Envelope, EnvelopeDecoder, MessageType};
use crate::service::{ApplicationError, ApplicationErrorKind, Service};

/// Initial reply buffer size
const WRITE_BUFFER_SIZE: usize = 4 * 1024;

/// Lifecycle phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Accepting,
    Reading,
    Dispatching,
    Writing,
    Closing,
    Closed,
}

/// What the reactor lends a connection while it handles one event.
pub struct EventContext<'a, S> {
    pub registry: &'a Registry,
    pub service: &'a mut S,
    pub scratch: &'a mut [u8],
    pub stats: &'a ServerStats,
}

enum Decoded {
    NeedMore,
    Complete(Bytes),
    Failed(ProtocolError),
}

/// One accepted client.
pub struct Connection {
    token: Token,
    peer: Address,
    stream: Option<Stream>,
    interest: Option<Interest>,
    phase: Phase,
    keep_alive: bool,
    default_keep_alive: bool,
    cursor: ByteCursor,
    envelope_decoder: EnvelopeDecoder,
    args: ArgsReader,
    envelope: Option<Envelope>,
    raw_args: Option<Bytes>,
    encoder: Encoder,
    write_pos: usize,
    // Parked bytes may already hold the next message
    resume_buffered: bool,
    last_active: Instant,
    requests: u64,
}

impl Connection {
    pub fn new(stream: Stream, peer: Address, token: Token, config: &ServerConfig) -> Self {
        Self {
            token,
            peer,
            stream: Some(stream),
            interest: None,
            phase: Phase::Accepting,
            keep_alive: config.keep_alive,
            default_keep_alive: config.keep_alive,
            cursor: ByteCursor::new(),
            envelope_decoder: EnvelopeDecoder::from_config(config),
            args: ArgsReader::from_config(config),
            envelope: None,
            raw_args: None,
            encoder: Encoder::new(WRITE_BUFFER_SIZE),
            write_pos: 0,
            resume_buffered: false,
            last_active: Instant::now(),
            requests: 0,
        }
    }

    /// Register for read readiness and enter `Reading`.
    pub fn register(&mut self, registry: &Registry) -> io::Result<()> {
        if let Some(stream) = self.stream.as_mut() {
            registry.register(stream, self.token, Interest::READABLE)?;
            self.interest = Some(Interest::READABLE);
        }
        self.phase = Phase::Reading;
        Ok(())
    }

    #[inline(always)]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[inline(always)]
    pub fn token(&self) -> Token {
        self.token
    }

    #[inline(always)]
    pub fn peer(&self) -> &Address {
        &self.peer
    }

    #[inline(always)]
    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    /// Completed request/response cycles.
    pub fn requests(&self) -> u64 {
        self.requests
    }

    /// Time since the last successful read or write.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_active)
    }

    /// True while part of a message has been received but not dispatched.
    pub fn mid_message(&self) -> bool {
        !self.cursor.is_empty()
            || self.envelope_decoder.in_progress()
            || self.envelope.is_some()
            || self.args.in_progress()
    }

    /// Handle read readiness.
    pub fn on_readable<S: Service>(&mut self, ctx: &mut EventContext<'_, S>) {
        if matches!(self.phase, Phase::Accepting | Phase::Reading) {
            self.drive(ctx);
        }
    }

    /// Handle write readiness.
    pub fn on_writable<S: Service>(&mut self, ctx: &mut EventContext<'_, S>) {
        if self.phase == Phase::Writing {
            self.drive(ctx);
        }
    }

    /// Release the socket and all buffered state. Safe to call repeatedly.
    pub fn close(&mut self, registry: &Registry) {
        if self.phase == Phase::Closed {
            return;
        }
        self.phase = Phase::Closing;

        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = registry.deregister(&mut stream) {
                trace!(token = self.token.0, error = %e, "deregister failed");
            }
            // stream dropped here, descriptor closed
        }
        self.interest = None;
        self.cursor.clear();
        self.envelope_decoder.reset();
        self.args.reset();
        self.envelope = None;
        self.raw_args = None;
        self.encoder.reset();
        self.write_pos = 0;
        self.phase = Phase::Closed;

        debug!(
            token = self.token.0,
            peer = %self.peer,
            requests = self.requests,
            "connection closed"
        );
    }

    /// Run transitions until one would block or the connection closes.
    fn drive<S: Service>(&mut self, ctx: &mut EventContext<'_, S>) {
        loop {
            let progressed = match self.phase {
                Phase::Accepting => {
                    self.phase = Phase::Reading;
                    true
                }
                Phase::Reading => self.read_ready(ctx),
                Phase::Dispatching => {
                    self.dispatch(ctx);
                    true
                }
                Phase::Writing => self.write_ready(ctx),
                Phase::Closing => {
                    self.close(ctx.registry);
                    false
                }
                Phase::Closed => false,
            };
            if !progressed {
                break;
            }
        }
    }

    /// Read and decode until the socket would block or the phase changes.
    fn read_ready<S: Service>(&mut self, ctx: &mut EventContext<'_, S>) -> bool {
        if self.resume_buffered {
            self.resume_buffered = false;
            if !self.cursor.is_empty() {
                let decoded = self.decode(&[]);
                if self.apply(decoded, ctx.stats) {
                    return true;
                }
            }
        }

        loop {
            let Some(stream) = self.stream.as_mut() else {
                self.phase = Phase::Closing;
                return true;
            };

            match stream.read(ctx.scratch) {
                Ok(0) => {
                    if self.mid_message() {
                        ServerStats::add(&ctx.stats.truncated, 1);
                        debug!(
                            token = self.token.0,
                            peer = %self.peer,
                            error = %ProtocolError::Truncated,
                            "peer closed mid-message"
                        );
                    } else {
                        debug!(token = self.token.0, peer = %self.peer, "peer closed");
                    }
                    self.phase = Phase::Closing;
                    return true;
                }
                Ok(n) => {
                    self.last_active = Instant::now();
                    ServerStats::add(&ctx.stats.bytes_received, n as u64);
                    trace!(token = self.token.0, bytes = n, "read");

                    let decoded = self.decode(&ctx.scratch[..n]);
                    if self.apply(decoded, ctx.stats) {
                        return true;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return false,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(token = self.token.0, peer = %self.peer, error = %e, "read error");
                    self.phase = Phase::Closing;
                    return true;
                }
            }
        }
    }

    /// Feed one read through the envelope decoder, then the argument reader.
    ///
    /// Unconsumed bytes are parked in the cursor when `input` goes out of scope.
    fn decode(&mut self, data: &[u8]) -> Decoded {
        let mut input = self.cursor.feed(data);

        if self.envelope.is_none() {
            match self.envelope_decoder.resume(&mut input) {
                Ok(Some(envelope)) => {
                    trace!(
                        token = self.token.0,
                        method = %envelope.method_str(),
                        seq_id = envelope.sequence_id,
                        variant = ?envelope.variant,
                        "envelope decoded"
                    );
                    self.envelope = Some(envelope);
                }
                Ok(None) => return Decoded::NeedMore,
                Err(e) => return Decoded::Failed(e),
            }
        }

        match self.args.resume(&mut input) {
            Ok(Some(raw)) => Decoded::Complete(raw),
            Ok(None) => Decoded::NeedMore,
            Err(e) => Decoded::Failed(e),
        }
    }

    /// Apply a decode result; true if the phase changed.
    fn apply(&mut self, decoded: Decoded, stats: &ServerStats) -> bool {
        match decoded {
            Decoded::NeedMore => false,
            Decoded::Complete(raw) => {
                self.raw_args = Some(raw);
                self.phase = Phase::Dispatching;
                true
            }
            Decoded::Failed(err) => {
                ServerStats::add(&stats.protocol_errors, 1);
                warn!(token = self.token.0, peer = %self.peer, error = %err, "protocol error");
                self.queue_protocol_error(&err);
                true
            }
        }
    }

    /// Queue an exception reply; the connection closes after it is sent.
    fn queue_protocol_error(&mut self, err: &ProtocolError) {
        let kind = match err {
            ProtocolError::InvalidMessageType(_) => ApplicationErrorKind::InvalidMessageType,
            _ => ApplicationErrorKind::ProtocolError,
        };
        let error = ApplicationError::new(kind, err.to_string());

        self.encoder.reset();
        match &self.envelope {
            Some(envelope) => {
                self.encoder
                    .encode_exception(&envelope.method_name, envelope.sequence_id, &error);
            }
            None => {
                let name = self.envelope_decoder.method_name().unwrap_or_default();
                self.encoder.encode_exception(name, 0, &error);
            }
        }

        // Framing is lost; nothing buffered will be decoded again
        self.envelope = None;
        self.envelope_decoder.reset();
        self.args.reset();
        self.cursor.clear();
        self.write_pos = 0;
        self.keep_alive = false;
        self.phase = Phase::Writing;
    }

    /// Hand the decoded call to the service and queue its reply.
    fn dispatch<S: Service>(&mut self, ctx: &mut EventContext<'_, S>) {
        let (Some(envelope), Some(raw)) = (self.envelope.take(), self.raw_args.take()) else {
            self.phase = Phase::Closing;
            return;
        };
        let method = envelope.method_str();

        debug!(
            token = self.token.0,
            method = %method,
            seq_id = envelope.sequence_id,
            "dispatching"
        );

        let outcome = match envelope.message_type {
            MessageType::Call | MessageType::Oneway => {
                ServerStats::add(&ctx.stats.messages_dispatched, 1);
                ctx.service.submit(&method, envelope.sequence_id, &raw)
            }
            other => Err(ApplicationError::new(
                ApplicationErrorKind::InvalidMessageType,
                format!("expected a call, got {other:?}"),
            )),
        };

        if let Err(ref e) = outcome {
            ServerStats::add(&ctx.stats.application_errors, 1);
            debug!(
                token = self.token.0,
                method = %method,
                seq_id = envelope.sequence_id,
                error = %e,
                "call failed"
            );
        }

        if envelope.message_type == MessageType::Oneway {
            self.requests += 1;
            self.prepare_next();
            self.phase = Phase::Reading;
            return;
        }

        self.encoder.reset();
        match outcome {
            Ok(value) => {
                self.encoder
                    .encode_reply(&envelope.method_name, envelope.sequence_id, &value);
            }
            Err(e) => {
                self.encoder
                    .encode_exception(&envelope.method_name, envelope.sequence_id, &e);
            }
        }
        self.write_pos = 0;
        self.phase = Phase::Writing;
    }

    /// Write the queued reply until done or the socket would block.
    fn write_ready<S: Service>(&mut self, ctx: &mut EventContext<'_, S>) -> bool {
        loop {
            let pending = &self.encoder.as_bytes()[self.write_pos..];
            if pending.is_empty() {
                return self.finish_write(ctx.registry);
            }
            let Some(stream) = self.stream.as_mut() else {
                self.phase = Phase::Closing;
                return true;
            };

            match stream.write(pending) {
                Ok(0) => {
                    debug!(token = self.token.0, peer = %self.peer, "write returned zero");
                    self.phase = Phase::Closing;
                    return true;
                }
                Ok(n) => {
                    self.write_pos += n;
                    self.last_active = Instant::now();
                    ServerStats::add(&ctx.stats.bytes_sent, n as u64);
                    trace!(token = self.token.0, bytes = n, "wrote");
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.set_interest(ctx.registry, Interest::WRITABLE);
                    return self.phase != Phase::Writing;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(token = self.token.0, peer = %self.peer, error = %e, "write error");
                    self.phase = Phase::Closing;
                    return true;
                }
            }
        }
    }

    fn finish_write(&mut self, registry: &Registry) -> bool {
        self.requests += 1;
        if !self.keep_alive {
            self.phase = Phase::Closing;
            return true;
        }
        self.prepare_next();
        self.set_interest(registry, Interest::READABLE);
        if self.phase == Phase::Writing {
            self.phase = Phase::Reading;
        }
        true
    }

    /// Fresh envelope slot; parked pipelined bytes are kept.
    fn prepare_next(&mut self) {
        self.envelope = None;
        self.raw_args = None;
        self.envelope_decoder.reset();
        self.args.reset();
        self.encoder.reset();
        self.write_pos = 0;
        self.keep_alive = self.default_keep_alive;
        self.resume_buffered = true;
    }

    fn set_interest(&mut self, registry: &Registry, interest: Interest) {
        if self.interest == Some(interest) {
            return;
        }
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        match registry.reregister(stream, self.token, interest) {
            Ok(()) => self.interest = Some(interest),
            Err(e) => {
                warn!(token = self.token.0, error = %e, "reregister failed");
                self.phase = Phase::Closing;
            }
        }
    }
}

/// Per-socket options for accepted streams.
pub fn tune_socket(stream: &Stream, config: &ServerConfig) -> io::Result<()> {
    stream.set_nodelay(true)?;
    if let Some(size) = config.socket_buffer_size {
        set_buffer_sizes(stream, size)?;
    }
    Ok(())
}

/// SO_SNDBUF dan SO_RCVBUF
#[cfg(unix)]
fn set_buffer_sizes(stream: &Stream, size: usize) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let fd = stream.as_raw_fd();
    let optval = libc::c_int::try_from(size).unwrap_or(libc::c_int::MAX);
    for opt in [libc::SO_SNDBUF, libc::SO_RCVBUF] {
        // SAFETY: fd is a live socket owned by `stream`, optval outlives the call
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                opt,
                &optval as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_buffer_sizes(_stream: &Stream, _size: usize) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode_struct, ArgsReader, EnvelopeDecoder, Value};
    use crate::service::Outcome;
    use mio::Poll;
    use std::cell::Cell;
    use std::net::{TcpListener, TcpStream as StdTcpStream};
    use std::thread;

    struct Harness {
        poll: Poll,
        scratch: Vec<u8>,
        stats: ServerStats,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                poll: Poll::new().unwrap(),
                scratch: vec![0u8; 64],
                stats: ServerStats::new(),
            }
        }

        /// Drive `conn` until `done` holds (or give up after ~2s).
        fn pump<S: Service>(
            &mut self,
            conn: &mut Connection,
            service: &mut S,
            done: impl Fn(&Connection) -> bool,
        ) {
            for _ in 0..400 {
                let mut ctx = EventContext {
                    registry: self.poll.registry(),
                    service: &mut *service,
                    scratch: &mut self.scratch,
                    stats: &self.stats,
                };
                conn.on_readable(&mut ctx);
                conn.on_writable(&mut ctx);
                if done(conn) {
                    return;
                }
                thread::sleep(Duration::from_millis(5));
            }
            panic!("connection stuck in {:?}", conn.phase());
        }
    }

    fn connected(config: &ServerConfig) -> (StdTcpStream, Connection, Harness) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = StdTcpStream::connect(listener.local_addr().unwrap()).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();

        let harness = Harness::new();
        let stream = Stream::Tcp(mio::net::TcpStream::from_std(server));
        let mut conn = Connection::new(stream, Address::Tcp(peer), Token(7), config);
        conn.register(harness.poll.registry()).unwrap();
        (client, conn, harness)
    }

    /// Client-side reply reader; keeps bytes of replies that arrive together.
    struct Replies {
        cursor: ByteCursor,
    }

    impl Replies {
        fn new() -> Self {
            Self {
                cursor: ByteCursor::new(),
            }
        }

        fn next(&mut self, client: &mut StdTcpStream) -> (Envelope, Vec<(i16, Value)>) {
            let mut decoder = EnvelopeDecoder::new(true, 1024);
            let mut args = ArgsReader::new(16, 1 << 20);
            let mut envelope = None;
            let mut buf = [0u8; 256];
            let mut n = 0;
            loop {
                {
                    let mut feed = self.cursor.feed(&buf[..n]);
                    if envelope.is_none() {
                        envelope = decoder.resume(&mut feed).unwrap();
                    }
                    if let Some(env) = envelope.take() {
                        match args.resume(&mut feed).unwrap() {
                            Some(raw) => return (env, decode_struct(&raw).unwrap()),
                            None => envelope = Some(env),
                        }
                    }
                }
                n = client.read(&mut buf).unwrap();
                assert!(n > 0, "server closed before a full reply");
            }
        }
    }

    fn ping_service(method: &str, _seq: u32, _args: &[u8]) -> Outcome {
        match method {
            "ping" => Ok(Value::from("pong")),
            other => Err(ApplicationError::unknown_method(other)),
        }
    }

    #[test]
    fn test_fragmented_request_gets_reply() {
        let config = ServerConfig::default();
        let (mut client, mut conn, mut harness) = connected(&config);
        let mut service = ping_service;

        let mut encoder = Encoder::new(64);
        let request = encoder.encode_call("ping", 42, &[]).to_vec();
        for chunk in [&request[..3], &request[3..11], &request[11..]] {
            client.write_all(chunk).unwrap();
            client.flush().unwrap();
            harness.pump(&mut conn, &mut service, |_| true);
        }
        harness.pump(&mut conn, &mut service, |c| c.requests() == 1);

        let (envelope, body) = Replies::new().next(&mut client);
        assert_eq!(envelope.message_type, MessageType::Reply);
        assert_eq!(envelope.method_name, "ping");
        assert_eq!(envelope.sequence_id, 42);
        assert_eq!(body, vec![(0, Value::from("pong"))]);
        assert_eq!(conn.phase(), Phase::Reading);
        assert!(!conn.mid_message());
    }

    #[test]
    fn test_pipelined_requests_answered_in_order() {
        let config = ServerConfig::default();
        let (mut client, mut conn, mut harness) = connected(&config);
        let mut service = |method: &str, seq: u32, _args: &[u8]| -> Outcome {
            Ok(Value::from(format!("{method}-{seq}")))
        };

        let mut encoder = Encoder::new(128);
        encoder.encode_call("a", 1, &[]);
        encoder.encode_call("b", 2, &[(1, Value::I32(9))]);
        client.write_all(encoder.as_bytes()).unwrap();

        harness.pump(&mut conn, &mut service, |c| c.requests() == 2);

        let mut replies = Replies::new();
        let (first, body) = replies.next(&mut client);
        assert_eq!((&first.method_name[..], first.sequence_id), (&b"a"[..], 1));
        assert_eq!(body, vec![(0, Value::from("a-1"))]);
        let (second, body) = replies.next(&mut client);
        assert_eq!((&second.method_name[..], second.sequence_id), (&b"b"[..], 2));
        assert_eq!(body, vec![(0, Value::from("b-2"))]);
    }

    #[test]
    fn test_bad_version_replies_then_closes() {
        let config = ServerConfig::default();
        let (mut client, mut conn, mut harness) = connected(&config);
        let mut service = ping_service;

        client
            .write_all(&[0x80, 0x02, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00])
            .unwrap();
        harness.pump(&mut conn, &mut service, Connection::is_closed);

        let (envelope, body) = Replies::new().next(&mut client);
        assert_eq!(envelope.message_type, MessageType::Exception);
        assert_eq!(body[1], (2, Value::I32(ApplicationErrorKind::ProtocolError as i32)));
        assert_eq!(client.read(&mut [0u8; 8]).unwrap(), 0);
        assert_eq!(ServerStats::get(&harness.stats.protocol_errors), 1);
    }

    #[test]
    fn test_unknown_method_keeps_connection() {
        let config = ServerConfig::default();
        let (mut client, mut conn, mut harness) = connected(&config);
        let mut service = ping_service;

        let mut encoder = Encoder::new(64);
        client
            .write_all(encoder.encode_call("pong", 5, &[]))
            .unwrap();
        harness.pump(&mut conn, &mut service, |c| c.requests() == 1);

        let (envelope, body) = Replies::new().next(&mut client);
        assert_eq!(envelope.message_type, MessageType::Exception);
        assert_eq!(envelope.sequence_id, 5);
        assert_eq!(body[1], (2, Value::I32(ApplicationErrorKind::UnknownMethod as i32)));
        assert_eq!(conn.phase(), Phase::Reading);
    }

    #[test]
    fn test_oneway_has_no_reply() {
        let config = ServerConfig::default();
        let (mut client, mut conn, mut harness) = connected(&config);
        let calls = Cell::new(0);
        let mut service = |_: &str, _: u32, _: &[u8]| -> Outcome {
            calls.set(calls.get() + 1);
            Ok(Value::Void)
        };

        let mut encoder = Encoder::new(64);
        encoder.write_message_begin("fire", MessageType::Oneway, 1);
        encoder.write_struct(&[]);
        encoder.encode_call("ping", 2, &[]);
        client.write_all(encoder.as_bytes()).unwrap();

        harness.pump(&mut conn, &mut service, |c| c.requests() == 2);
        assert_eq!(calls.get(), 2);

        // only the second call answers
        let (envelope, body) = Replies::new().next(&mut client);
        assert_eq!(envelope.sequence_id, 2);
        assert!(body.is_empty());
    }

    #[test]
    fn test_eof_mid_message_is_truncated() {
        let config = ServerConfig::default();
        let (mut client, mut conn, mut harness) = connected(&config);
        let mut service = ping_service;

        client.write_all(&[0x80, 0x01, 0x00]).unwrap();
        client.shutdown(std::net::Shutdown::Write).unwrap();
        harness.pump(&mut conn, &mut service, Connection::is_closed);

        assert_eq!(ServerStats::get(&harness.stats.truncated), 1);
        assert_eq!(client.read(&mut [0u8; 8]).unwrap(), 0);
    }

    #[test]
    fn test_close_is_idempotent() {
        let config = ServerConfig::default();
        let (_client, mut conn, harness) = connected(&config);

        conn.close(harness.poll.registry());
        assert!(conn.is_closed());
        conn.close(harness.poll.registry());
        assert!(conn.is_closed());
        assert!(!conn.mid_message());
    }

    #[test]
    fn test_no_keep_alive_closes_after_reply() {
        let config = ServerConfig::default().with_keep_alive(false);
        let (mut client, mut conn, mut harness) = connected(&config);
        let mut service = ping_service;

        let mut encoder = Encoder::new(64);
        client
            .write_all(encoder.encode_call("ping", 1, &[]))
            .unwrap();
        harness.pump(&mut conn, &mut service, Connection::is_closed);

        let (envelope, _) = Replies::new().next(&mut client);
        assert_eq!(envelope.message_type, MessageType::Reply);
        assert_eq!(client.read(&mut [0u8; 8]).unwrap(), 0);
    }

    #[test]
    fn test_non_utf8_method_reaches_service() {
        let config = ServerConfig::default();
        let (mut client, mut conn, mut harness) = connected(&config);
        let seen = std::cell::RefCell::new(String::new());
        let mut service = |method: &str, _: u32, _: &[u8]| -> Outcome {
            seen.borrow_mut().push_str(method);
            Ok(Value::Void)
        };

        let mut encoder = Encoder::new(64);
        client
            .write_all(encoder.encode_call([0xC3u8, 0x28], 3, &[]))
            .unwrap();
        harness.pump(&mut conn, &mut service, |c| c.requests() == 1);

        assert_eq!(*seen.borrow(), "\u{FFFD}(");
        let (envelope, _) = Replies::new().next(&mut client);
        assert_eq!(envelope.message_type, MessageType::Reply);
        assert_eq!(&envelope.method_name[..], &[0xC3, 0x28]);
        assert_eq!(envelope.sequence_id, 3);
    }

    #[test]
    fn test_blocked_reply_is_not_mid_message() {
        let config = ServerConfig::default();
        let (mut client, mut conn, mut harness) = connected(&config);
        let mut service = |_: &str, _: u32, _: &[u8]| -> Outcome {
            Ok(Value::Binary(Bytes::from(vec![0u8; 32 << 20])))
        };

        let mut encoder = Encoder::new(64);
        client
            .write_all(encoder.encode_call("bulk", 1, &[]))
            .unwrap();
        // client never reads, so the reply stalls in the send buffer
        harness.pump(&mut conn, &mut service, |c| c.phase() == Phase::Writing);

        assert!(!conn.mid_message());
        assert_eq!(conn.requests(), 0);
        conn.close(harness.poll.registry());
    }

    #[test]
    fn test_peer_address_is_tcp() {
        let config = ServerConfig::default();
        let (client, conn, _harness) = connected(&config);
        assert_eq!(conn.peer(), &Address::Tcp(client.local_addr().unwrap()));
    }
}
