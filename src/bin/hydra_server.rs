//! Hydra Server Binary
//!
//! Demo RPC server dengan tiga method:
//! - `ping` → "pong"
//! - `echo` → argument field 1, unchanged
//! - `notify` → no result (useful as a oneway call)
//!
//! Usage:
//!   cargo run --release --bin hydra_server -- [OPTIONS]
//!   cargo run --release --bin hydra_server -- --bind unix:/tmp/hydra.sock

use std::net::TcpListener;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use hydra::{
    decode_struct_with, ApplicationError, ApplicationErrorKind, Outcome, Server, ServerConfig,
    Service, Value,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "hydra_server")]
#[command(about = "Event-driven Thrift binary RPC server")]
#[command(version)]
struct Cli {
    /// Address to listen on, or `unix:<path>` for a Unix domain socket
    #[arg(short, long, default_value = "0.0.0.0:9090")]
    bind: String,

    /// Reject legacy unversioned envelopes
    #[arg(long)]
    strict: bool,

    /// Close connections after each reply
    #[arg(long)]
    no_keep_alive: bool,

    /// Close connections idle for this many seconds
    #[arg(long)]
    idle_timeout_secs: Option<u64>,

    #[arg(long, default_value_t = 1024)]
    max_connections: usize,

    /// Nesting bound for argument structs
    #[arg(long, default_value_t = 64)]
    max_depth: usize,

    /// SO_SNDBUF / SO_RCVBUF for accepted sockets, in bytes
    #[arg(long)]
    socket_buffer: Option<usize>,

    /// Log server stats every N seconds (0 = off)
    #[arg(long, default_value_t = 10)]
    stats_interval_secs: u64,
}

impl Cli {
    fn config(&self) -> ServerConfig {
        ServerConfig::default()
            .with_strict(self.strict)
            .with_keep_alive(!self.no_keep_alive)
            .with_idle_timeout(self.idle_timeout_secs.map(Duration::from_secs))
            .with_max_connections(self.max_connections)
            .with_max_depth(self.max_depth)
            .with_socket_buffer_size(self.socket_buffer)
    }
}

fn handle(method: &str, args: &[u8], max_depth: usize) -> Outcome {
    match method {
        "ping" => Ok(Value::from("pong")),
        "echo" => {
            let fields = decode_struct_with(args, max_depth).map_err(|e| {
                ApplicationError::new(ApplicationErrorKind::ProtocolError, e.to_string())
            })?;
            fields
                .into_iter()
                .find(|(id, _)| *id == 1)
                .map(|(_, value)| value)
                .ok_or_else(|| {
                    ApplicationError::new(ApplicationErrorKind::MissingResult, "echo needs field 1")
                })
        }
        "notify" => Ok(Value::Void),
        other => Err(ApplicationError::unknown_method(other)),
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

#[cfg(unix)]
fn build_server<S: Service>(bind: &str, service: S, config: ServerConfig) -> hydra::Result<Server<S>> {
    let Some(path) = bind.strip_prefix("unix:") else {
        return Server::new(TcpListener::bind(bind)?, service, config);
    };
    // stale socket file from an earlier run
    if std::path::Path::new(path).exists() {
        std::fs::remove_file(path)?;
    }
    let listener = std::os::unix::net::UnixListener::bind(path)?;
    Server::new_unix(listener, service, config)
}

#[cfg(not(unix))]
fn build_server<S: Service>(bind: &str, service: S, config: ServerConfig) -> hydra::Result<Server<S>> {
    Server::new(TcpListener::bind(bind)?, service, config)
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let config = cli.config();
    let max_depth = config.max_depth;
    let service = move |method: &str, _seq: u32, args: &[u8]| handle(method, args, max_depth);

    let mut server = match build_server(&cli.bind, service, config) {
        Ok(server) => server,
        Err(e) => {
            error!(bind = %cli.bind, error = %e, "server setup failed");
            std::process::exit(1);
        }
    };

    if cli.stats_interval_secs > 0 {
        let stats = server.stats();
        let interval = Duration::from_secs(cli.stats_interval_secs);
        let started = Instant::now();
        thread::spawn(move || loop {
            thread::sleep(interval);
            stats.log_summary(started.elapsed());
        });
    }

    info!(version = env!("CARGO_PKG_VERSION"), "starting hydra");
    if let Err(e) = server.run() {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}
