//! Socket tuning for benchmark connections.
//!
//! Every connection gets TCP_NODELAY and fixed SO_RCVBUF / SO_SNDBUF sizes
//! before any application data flows. Server connections additionally get
//! keep-alive probing. Each option is applied independently; a failure is
//! recorded in the [`TuneReport`] and logged as a warning, never returned.

use socket2::{SockRef, TcpKeepalive};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::warn;

/// Listen backlog for the accept socket.
const LISTEN_BACKLOG: i32 = 1024;

/// Options applied to a freshly connected or accepted stream.
#[derive(Debug, Clone, Copy)]
pub struct SocketOptions {
    /// SO_RCVBUF and SO_SNDBUF size in bytes.
    pub buffer_size: usize,
    /// Keep-alive probe period. `None` leaves keep-alive untouched.
    pub keepalive: Option<Duration>,
}

impl SocketOptions {
    /// Client-side tuning: no-delay and buffer sizes.
    pub fn client(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            keepalive: None,
        }
    }

    /// Server-side tuning: no-delay, buffer sizes and keep-alive.
    pub fn server(buffer_size: usize, keepalive: Duration) -> Self {
        Self {
            buffer_size,
            keepalive: Some(keepalive),
        }
    }
}

/// A single socket option that could not be applied.
#[derive(Debug)]
pub struct TuneError {
    pub option: &'static str,
    pub source: io::Error,
}

impl fmt::Display for TuneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to set {}: {}", self.option, self.source)
    }
}

impl std::error::Error for TuneError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Outcome of [`tune`]: which options stuck and which did not.
#[derive(Debug, Default)]
pub struct TuneReport {
    pub applied: Vec<&'static str>,
    pub failed: Vec<TuneError>,
}

impl TuneReport {
    fn record(&mut self, option: &'static str, result: io::Result<()>) {
        match result {
            Ok(()) => self.applied.push(option),
            Err(source) => {
                warn!(option, error = %source, "Failed to apply socket option");
                self.failed.push(TuneError { option, source });
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Apply `options` to `stream`, best effort.
pub fn tune(stream: &TcpStream, options: &SocketOptions) -> TuneReport {
    let socket = SockRef::from(stream);
    let mut report = TuneReport::default();

    report.record("TCP_NODELAY", socket.set_nodelay(true));
    report.record("SO_RCVBUF", socket.set_recv_buffer_size(options.buffer_size));
    report.record("SO_SNDBUF", socket.set_send_buffer_size(options.buffer_size));

    if let Some(period) = options.keepalive {
        report.record("SO_KEEPALIVE", socket.set_tcp_keepalive(&keepalive(period)));
    }

    report
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn keepalive(period: Duration) -> TcpKeepalive {
    TcpKeepalive::new().with_time(period).with_interval(period)
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn keepalive(period: Duration) -> TcpKeepalive {
    TcpKeepalive::new().with_time(period)
}

/// Bind the accept socket with SO_REUSEADDR so a restarted server can reuse
/// the fixed port right away.
pub fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    TcpListener::from_std(socket.into())
}
