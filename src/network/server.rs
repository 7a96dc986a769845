//! Hydra reactor dengan event-driven I/O
//!
//! Satu thread, satu `Poll`: the listener, a waker and every connection are
//! registered on the same poller. Each readiness event runs the owning
//! connection's transition to completion and returns to the loop.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::event::Event;
use mio::{Events, Interest, Poll, Token, Waker};
use tracing::{debug, error, info, warn};

use super::connection::{tune_socket, Connection, EventContext};
use super::socket::{Address, Listener, Stream};
use super::stats::ServerStats;
use crate::config::ServerConfig;
use crate::error::{HydraError, Result};
use crate::service::Service;

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
const FIRST_CONNECTION: usize = 2;

/// Stops a running [`Server`] from another thread.
#[derive(Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl StopHandle {
    /// Ask the loop to exit; remaining connections are closed on the way out.
    pub fn stop(&self) -> io::Result<()> {
        self.flag.store(true, Ordering::Release);
        self.waker.wake()
    }
}

/// Single-threaded RPC reactor
///
/// Event-driven server dengan:
/// - Non-blocking I/O (epoll/kqueue)
/// - One shared read scratch buffer for all connections
/// - Per-connection state owned by the loop, never shared
pub struct Server<S: Service> {
    poll: Poll,
    listener: Option<Listener>,
    // Listener descriptor belongs to the caller
    borrowed: bool,
    connections: HashMap<Token, Connection>,
    next_token: usize,
    service: S,
    config: ServerConfig,
    scratch: Box<[u8]>,
    stop: Arc<AtomicBool>,
    waker: Arc<Waker>,
    stats: Arc<ServerStats>,
}

impl<S: Service> Server<S> {
    /// Membuat server dari listener yang sudah bound.
    pub fn new(listener: std::net::TcpListener, service: S, config: ServerConfig) -> Result<Self> {
        listener.set_nonblocking(true)?;
        let mut server = Self::unattached(service, config)?;
        server.attach(Listener::from_tcp(listener))?;
        Ok(server)
    }

    /// Membuat server dari Unix domain listener yang sudah bound.
    #[cfg(unix)]
    pub fn new_unix(
        listener: std::os::unix::net::UnixListener,
        service: S,
        config: ServerConfig,
    ) -> Result<Self> {
        listener.set_nonblocking(true)?;
        let mut server = Self::unattached(service, config)?;
        server.attach(Listener::from_unix(listener))?;
        Ok(server)
    }

    /// Membuat server dari descriptor listening milik caller.
    ///
    /// TCP (IPv4/IPv6) and Unix domain sockets are accepted; the family is
    /// read with `getsockname`. The descriptor is switched to non-blocking
    /// mode but never closed.
    ///
    /// # Safety
    ///
    /// `fd` must be a bound, listening socket that stays open for the
    /// lifetime of the returned server.
    #[cfg(unix)]
    pub unsafe fn from_raw_fd(
        fd: std::os::unix::io::RawFd,
        service: S,
        config: ServerConfig,
    ) -> Result<Self> {
        use std::mem::ManuallyDrop;
        use std::os::unix::io::FromRawFd;
        use std::os::unix::net::UnixListener;

        if fd < 0 {
            return Err(HydraError::InvalidListener(format!(
                "negative descriptor {fd}"
            )));
        }

        let family = super::socket::socket_family(fd)
            .map_err(|e| HydraError::InvalidListener(format!("descriptor {fd}: {e}")))?;
        let listener = match family {
            libc::AF_INET | libc::AF_INET6 => {
                let listener = ManuallyDrop::new(std::net::TcpListener::from_raw_fd(fd));
                listener.set_nonblocking(true)?;
                Listener::from_tcp(ManuallyDrop::into_inner(listener))
            }
            libc::AF_UNIX => {
                let listener = ManuallyDrop::new(UnixListener::from_raw_fd(fd));
                listener.set_nonblocking(true)?;
                Listener::from_unix(ManuallyDrop::into_inner(listener))
            }
            other => {
                return Err(HydraError::InvalidListener(format!(
                    "descriptor {fd}: unsupported socket family {other}"
                )))
            }
        };

        let mut server = Self::unattached(service, config)?;
        server.borrowed = true;
        server.attach(listener)?;
        Ok(server)
    }

    fn unattached(service: S, config: ServerConfig) -> Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        let scratch = vec![0u8; config.read_buffer_size.max(1)].into_boxed_slice();

        Ok(Self {
            poll,
            listener: None,
            borrowed: false,
            connections: HashMap::with_capacity(config.max_connections.min(1024)),
            next_token: FIRST_CONNECTION,
            service,
            config,
            scratch,
            stop: Arc::new(AtomicBool::new(false)),
            waker,
            stats: Arc::new(ServerStats::new()),
        })
    }

    fn attach(&mut self, listener: Listener) -> Result<()> {
        // Stored before registering so Drop sees it on failure
        let listener = self.listener.insert(listener);
        self.poll
            .registry()
            .register(listener, LISTENER, Interest::READABLE)?;
        Ok(())
    }

    pub fn local_addr(&self) -> Result<Address> {
        match &self.listener {
            Some(listener) => Ok(listener.local_addr()?),
            None => Err(HydraError::InvalidListener("server already shut down".into())),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.stop),
            waker: Arc::clone(&self.waker),
        }
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.stats)
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Run the event loop until stopped or a fatal reactor error.
    ///
    /// Every connection still open is closed before this returns.
    pub fn run(&mut self) -> Result<()> {
        let addr = self.local_addr()?;
        let started = Instant::now();
        let mut events = Events::with_capacity(self.config.events_capacity.max(1));

        info!(%addr, strict = self.config.strict, "hydra server listening");

        let result = self.event_loop(&mut events);
        if let Err(ref e) = result {
            error!(error = %e, "reactor stopped on fatal error");
        }

        self.shutdown();
        self.stats.log_summary(started.elapsed());
        result
    }

    fn event_loop(&mut self, events: &mut Events) -> Result<()> {
        let timeout = self.poll_timeout();

        loop {
            if self.stop.load(Ordering::Acquire) {
                debug!("stop requested");
                return Ok(());
            }

            if let Err(e) = self.poll.poll(events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept_connections()?,
                    // stop flag checked at the top of the loop
                    WAKER => {}
                    token => self.handle_event(token, event),
                }
            }

            self.sweep_idle();
        }
    }

    /// Idle sweeps need a wakeup even when nothing is ready.
    fn poll_timeout(&self) -> Option<Duration> {
        self.config
            .idle_timeout
            .map(|idle| (idle / 4).clamp(Duration::from_millis(10), Duration::from_secs(1)))
    }

    /// Accept until the listener would block.
    fn accept_connections(&mut self) -> io::Result<()> {
        loop {
            let Some(listener) = self.listener.as_ref() else {
                return Ok(());
            };

            match listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                    ) =>
                {
                    continue
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn admit(&mut self, stream: Stream, peer: Address) {
        if self.connections.len() >= self.config.max_connections {
            ServerStats::add(&self.stats.connections_rejected, 1);
            warn!(
                %peer,
                max = self.config.max_connections,
                "max connections reached, rejecting"
            );
            return;
        }

        if let Err(e) = tune_socket(&stream, &self.config) {
            warn!(%peer, error = %e, "socket tuning failed");
        }

        let token = Token(self.next_token);
        self.next_token += 1;

        let mut conn = Connection::new(stream, peer.clone(), token, &self.config);
        if let Err(e) = conn.register(self.poll.registry()) {
            warn!(%peer, error = %e, "register failed, dropping connection");
            return;
        }

        ServerStats::add(&self.stats.connections_total, 1);
        ServerStats::add(&self.stats.connections_active, 1);
        debug!(token = token.0, %peer, "connection accepted");
        self.connections.insert(token, conn);
    }

    fn handle_event(&mut self, token: Token, event: &Event) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };

        let mut ctx = EventContext {
            registry: self.poll.registry(),
            service: &mut self.service,
            scratch: &mut self.scratch,
            stats: &self.stats,
        };

        // Errors and hangups surface through the next read or write
        if event.is_readable() || event.is_read_closed() || event.is_error() {
            conn.on_readable(&mut ctx);
        }
        if event.is_writable() || event.is_write_closed() || event.is_error() {
            conn.on_writable(&mut ctx);
        }

        if conn.is_closed() {
            self.connections.remove(&token);
            ServerStats::sub(&self.stats.connections_active, 1);
        }
    }

    /// Close connections with no I/O for longer than the idle timeout.
    fn sweep_idle(&mut self) {
        let Some(timeout) = self.config.idle_timeout else {
            return;
        };
        let now = Instant::now();
        let registry = self.poll.registry();
        let stats = &self.stats;

        self.connections.retain(|_, conn| {
            if conn.idle_for(now) < timeout {
                return true;
            }
            if conn.mid_message() {
                ServerStats::add(&stats.truncated, 1);
            }
            debug!(token = conn.token().0, peer = %conn.peer(), "idle timeout");
            conn.close(registry);
            ServerStats::sub(&stats.connections_active, 1);
            false
        });
    }

    /// Drain every connection and release the listener.
    fn shutdown(&mut self) {
        let registry = self.poll.registry();
        for (_, mut conn) in self.connections.drain() {
            conn.close(registry);
            ServerStats::sub(&self.stats.connections_active, 1);
        }
        self.release_listener();
    }

    fn release_listener(&mut self) {
        let Some(mut listener) = self.listener.take() else {
            return;
        };
        if let Err(e) = self.poll.registry().deregister(&mut listener) {
            debug!(error = %e, "listener deregister failed");
        }
        if self.borrowed {
            forget_listener(listener);
        }
    }
}

/// Give up the listener without closing its descriptor.
#[cfg(unix)]
fn forget_listener(listener: Listener) {
    use std::os::unix::io::IntoRawFd;

    let _fd = listener.into_raw_fd();
}

#[cfg(not(unix))]
fn forget_listener(listener: Listener) {
    std::mem::forget(listener);
}

impl<S: Service> Drop for Server<S> {
    fn drop(&mut self) {
        self.release_listener();
    }
}

/// Serve on an owned listener until stopped.
pub fn serve<S: Service>(
    listener: std::net::TcpListener,
    service: S,
    config: ServerConfig,
) -> Result<()> {
    Server::new(listener, service, config)?.run()
}

/// Serve on a caller-owned listening descriptor.
///
/// Returns when the loop stops; the descriptor is left open. Use
/// [`Server::from_raw_fd`] plus [`Server::stop_handle`] to stop it from
/// another thread.
///
/// # Safety
///
/// Same contract as [`Server::from_raw_fd`].
#[cfg(unix)]
pub unsafe fn server_run<S: Service>(
    fd: std::os::unix::io::RawFd,
    service: S,
    config: ServerConfig,
) -> Result<()> {
    Server::from_raw_fd(fd, service, config)?.run()
}
