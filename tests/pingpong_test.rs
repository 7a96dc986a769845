//! Live Ping-Pong Test
//!
//! Menjalankan server di background thread dan berbicara dengannya lewat TCP
//! sungguhan: fragmented writes, pipelining, legacy envelopes, error replies.
//!
//! Usage:
//!   cargo test --test pingpong_test

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use hydra::core::ByteCursor;
use hydra::protocol::{ArgsReader, Encoder, Envelope, EnvelopeDecoder, MessageType};
use hydra::{
    decode_struct_with, ApplicationError, ApplicationErrorKind, Outcome, Server, ServerConfig,
    ServerStats, StopHandle, Value,
};

/// Nesting bound for decoding replies on the client side
const CLIENT_MAX_DEPTH: usize = 128;

fn handle(method: &str, args: &[u8], max_depth: usize) -> Outcome {
    match method {
        "ping" => Ok(Value::from("pong")),
        "echo" => {
            let fields = decode_struct_with(args, max_depth).map_err(|e| {
                ApplicationError::new(ApplicationErrorKind::ProtocolError, e.to_string())
            })?;
            Ok(fields
                .into_iter()
                .find(|(id, _)| *id == 1)
                .map(|(_, v)| v)
                .unwrap_or(Value::Void))
        }
        other => Err(ApplicationError::unknown_method(other)),
    }
}

struct Running {
    addr: SocketAddr,
    stop: StopHandle,
    stats: Arc<ServerStats>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Running {
    fn start(config: ServerConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let max_depth = config.max_depth;
        let service = move |method: &str, _seq: u32, args: &[u8]| handle(method, args, max_depth);
        let (tx, rx) = mpsc::channel();
        let thread = thread::spawn(move || {
            let mut server = Server::new(listener, service, config).unwrap();
            tx.send((server.stop_handle(), server.stats())).unwrap();
            server.run().unwrap();
        });
        let (stop, stats) = rx.recv().unwrap();
        Self {
            addr,
            stop,
            stats,
            thread: Some(thread),
        }
    }

    fn connect(&self) -> Client {
        let stream = TcpStream::connect(self.addr).unwrap();
        stream.set_nodelay(true).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        Client {
            stream,
            cursor: ByteCursor::new(),
        }
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        let _ = self.stop.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

struct Client {
    stream: TcpStream,
    cursor: ByteCursor,
}

impl Client {
    fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
    }

    /// Send in pieces with a pause between them so the server sees separate reads.
    fn send_split(&mut self, bytes: &[u8], cuts: &[usize]) {
        let mut start = 0;
        for &cut in cuts.iter().chain(std::iter::once(&bytes.len())) {
            self.send(&bytes[start..cut]);
            self.stream.flush().unwrap();
            thread::sleep(Duration::from_millis(10));
            start = cut;
        }
    }

    fn recv(&mut self) -> (Envelope, Vec<(i16, Value)>) {
        let mut decoder = EnvelopeDecoder::new(true, 1024);
        let mut args = ArgsReader::new(CLIENT_MAX_DEPTH, 1 << 20);
        let mut envelope = None;
        let mut buf = [0u8; 512];
        let mut n = 0;
        loop {
            {
                let mut feed = self.cursor.feed(&buf[..n]);
                if envelope.is_none() {
                    envelope = decoder.resume(&mut feed).unwrap();
                }
                if let Some(env) = envelope.take() {
                    match args.resume(&mut feed).unwrap() {
                        Some(raw) => {
                            return (env, decode_struct_with(&raw, CLIENT_MAX_DEPTH).unwrap())
                        }
                        None => envelope = Some(env),
                    }
                }
            }
            n = self.stream.read(&mut buf).unwrap();
            assert!(n > 0, "server closed before a full reply");
        }
    }

    fn at_eof(&mut self) -> bool {
        matches!(self.stream.read(&mut [0u8; 16]), Ok(0))
    }
}

fn exception_kind(body: &[(i16, Value)]) -> Option<i32> {
    body.iter().find_map(|(id, v)| match (id, v) {
        (2, Value::I32(kind)) => Some(*kind),
        _ => None,
    })
}

#[test]
fn test_ping_pong() {
    let server = Running::start(ServerConfig::default());
    let mut client = server.connect();

    let mut encoder = Encoder::new(64);
    client.send(encoder.encode_call("ping", 42, &[]));

    let (envelope, body) = client.recv();
    assert_eq!(envelope.message_type, MessageType::Reply);
    assert_eq!(envelope.method_name, "ping");
    assert_eq!(envelope.sequence_id, 42);
    assert_eq!(body, vec![(0, Value::from("pong"))]);
}

#[test]
fn test_fragmented_request_every_boundary() {
    let server = Running::start(ServerConfig::default());
    let mut client = server.connect();

    let mut encoder = Encoder::new(128);
    let request = encoder
        .encode_call("echo", 7, &[(1, Value::from("hello, hydra"))])
        .to_vec();

    // every two-way split on one keep-alive connection
    for cut in 1..request.len() {
        client.send_split(&request, &[cut]);
        let (envelope, body) = client.recv();
        assert_eq!(envelope.sequence_id, 7, "split at {cut}");
        assert_eq!(body, vec![(0, Value::from("hello, hydra"))], "split at {cut}");
    }
}

#[test]
fn test_three_way_split() {
    let server = Running::start(ServerConfig::default());
    let mut client = server.connect();

    let mut encoder = Encoder::new(64);
    let request = encoder.encode_call("ping", 1, &[]).to_vec();
    // inside the version word, inside the name, inside the sequence id
    client.send_split(&request, &[2, 9, 14]);

    let (envelope, body) = client.recv();
    assert_eq!(envelope.method_name, "ping");
    assert_eq!(body, vec![(0, Value::from("pong"))]);
}

#[test]
fn test_pipelined_calls_in_one_write() {
    let server = Running::start(ServerConfig::default());
    let mut client = server.connect();

    let mut encoder = Encoder::new(256);
    for seq in 0..5u32 {
        encoder.encode_call("echo", seq, &[(1, Value::I64(seq as i64 * 10))]);
    }
    client.send(encoder.as_bytes());

    for seq in 0..5u32 {
        let (envelope, body) = client.recv();
        assert_eq!(envelope.sequence_id, seq);
        assert_eq!(body, vec![(0, Value::I64(seq as i64 * 10))]);
    }
}

#[test]
fn test_legacy_envelope_accepted() {
    let server = Running::start(ServerConfig::default());
    let mut client = server.connect();

    let mut encoder = Encoder::new(64);
    encoder.write_legacy_begin("ping", 9);
    encoder.write_struct(&[]);
    client.send(encoder.as_bytes());

    // answered in the versioned form
    let (envelope, body) = client.recv();
    assert_eq!(envelope.message_type, MessageType::Reply);
    assert_eq!(envelope.sequence_id, 9);
    assert_eq!(body, vec![(0, Value::from("pong"))]);
}

#[test]
fn test_strict_rejects_legacy() {
    let server = Running::start(ServerConfig::default().with_strict(true));
    let mut client = server.connect();

    let mut encoder = Encoder::new(64);
    encoder.write_legacy_begin("ping", 9);
    encoder.write_struct(&[]);
    client.send(encoder.as_bytes());

    let (envelope, body) = client.recv();
    assert_eq!(envelope.message_type, MessageType::Exception);
    assert_eq!(envelope.sequence_id, 0);
    assert_eq!(
        exception_kind(&body),
        Some(ApplicationErrorKind::ProtocolError as i32)
    );
    assert!(client.at_eof());
}

#[test]
fn test_bad_version_closes_after_exception() {
    let server = Running::start(ServerConfig::default());
    let mut client = server.connect();

    client.send(&[0x80, 0x02, 0x00, 0x01, 0x00, 0x00, 0x00, 0x04]);

    let (envelope, body) = client.recv();
    assert_eq!(envelope.message_type, MessageType::Exception);
    assert_eq!(
        exception_kind(&body),
        Some(ApplicationErrorKind::ProtocolError as i32)
    );
    assert!(client.at_eof());

    // the server keeps serving others
    let mut other = server.connect();
    let mut encoder = Encoder::new(64);
    other.send(encoder.encode_call("ping", 2, &[]));
    assert_eq!(other.recv().0.message_type, MessageType::Reply);
    assert_eq!(ServerStats::get(&server.stats.protocol_errors), 1);
}

#[test]
fn test_unknown_method_keeps_connection() {
    let server = Running::start(ServerConfig::default());
    let mut client = server.connect();

    let mut encoder = Encoder::new(64);
    client.send(encoder.encode_call("missing", 3, &[]));
    let (envelope, body) = client.recv();
    assert_eq!(envelope.message_type, MessageType::Exception);
    assert_eq!(envelope.method_name, "missing");
    assert_eq!(envelope.sequence_id, 3);
    assert_eq!(
        exception_kind(&body),
        Some(ApplicationErrorKind::UnknownMethod as i32)
    );

    encoder.reset();
    client.send(encoder.encode_call("ping", 4, &[]));
    let (envelope, _) = client.recv();
    assert_eq!(envelope.message_type, MessageType::Reply);
    assert_eq!(envelope.sequence_id, 4);
}

#[test]
fn test_many_clients_interleaved() {
    let server = Running::start(ServerConfig::default());
    let mut clients: Vec<Client> = (0..8).map(|_| server.connect()).collect();

    let mut encoder = Encoder::new(64);
    let request = encoder.encode_call("ping", 11, &[]).to_vec();

    // first half from everyone, then the rest
    for client in clients.iter_mut() {
        client.send(&request[..6]);
    }
    thread::sleep(Duration::from_millis(20));
    for client in clients.iter_mut() {
        client.send(&request[6..]);
    }
    for client in clients.iter_mut() {
        let (envelope, body) = client.recv();
        assert_eq!(envelope.sequence_id, 11);
        assert_eq!(body, vec![(0, Value::from("pong"))]);
    }
}

/// `depth` structs, each holding the next as field 1.
fn nested(depth: usize) -> Value {
    let mut value = Value::Struct(Vec::new());
    for _ in 1..depth {
        value = Value::Struct(vec![(1, value)]);
    }
    value
}

#[test]
fn test_echo_uses_configured_depth() {
    let deep = nested(70);
    let mut encoder = Encoder::new(512);
    let request = encoder.encode_call("echo", 6, &[(1, deep.clone())]).to_vec();

    let server = Running::start(ServerConfig::default().with_max_depth(80));
    let mut client = server.connect();
    client.send(&request);
    let (envelope, body) = client.recv();
    assert_eq!(envelope.message_type, MessageType::Reply);
    assert_eq!(body, vec![(0, deep)]);

    // default bound rejects the same call while reading it
    let server = Running::start(ServerConfig::default());
    let mut client = server.connect();
    client.send(&request);
    let (envelope, body) = client.recv();
    assert_eq!(envelope.message_type, MessageType::Exception);
    assert_eq!(
        exception_kind(&body),
        Some(ApplicationErrorKind::ProtocolError as i32)
    );
    assert!(client.at_eof());
}
