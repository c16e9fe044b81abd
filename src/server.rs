//! TCP echo server.
//!
//! Accepts connections, tunes each socket, and hands it to an independent
//! session task that echoes newline-terminated lines until the peer goes
//! away. Sessions share nothing with each other or with the accept loop.

use crate::config::Config;
use crate::socket::{self, SocketOptions};
use crate::stats::{SessionStats, SessionSummary};
use bytes::BytesMut;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, trace};

/// Server instance
pub struct Server {
    config: Config,
    listener: TcpListener,
}

impl Server {
    /// Validate `config`, resolve the configured address and bind the
    /// listening socket.
    pub async fn bind(config: Config) -> io::Result<Self> {
        config
            .validate()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let addr = tokio::net::lookup_host(config.addr())
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("no address found for {}", config.addr()),
                )
            })?;

        let listener = socket::bind_listener(addr)?;
        info!(address = %listener.local_addr()?, "Server listening");

        Ok(Server { config, listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until SIGINT or SIGTERM.
    pub async fn run(self) -> io::Result<()> {
        self.run_until(async {
            let signal = crate::signal::shutdown().await;
            info!(signal, "Shutdown signal received");
        })
        .await
    }

    /// Accept connections until `shutdown` resolves, then close the listener.
    ///
    /// In-flight sessions are neither drained nor notified.
    pub async fn run_until<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let options = SocketOptions::server(self.config.buffer_size, self.config.keepalive);
        let buffer_size = self.config.buffer_size;
        let report_interval = self.config.report_interval;

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let tuned = socket::tune(&stream, &options);
                        info!(
                            peer = %peer,
                            options = ?tuned.applied,
                            fully_tuned = tuned.is_complete(),
                            "New connection"
                        );

                        tokio::spawn(async move {
                            let summary = handle_session(stream, buffer_size, report_interval).await;
                            info!(
                                peer = %peer,
                                messages = summary.messages,
                                duration_ms = summary.duration.as_millis() as u64,
                                "Connection closed"
                            );
                            println!("{summary}");
                        });
                    }
                    Err(e) => {
                        debug!(error = %e, "Failed to accept connection");
                    }
                },
            }
        }

        drop(self.listener);
        Ok(())
    }
}

/// Echo lines on `stream` until EOF or the first I/O error.
///
/// Every complete line is written back verbatim, newline included, and
/// flushed before the next one is read. Trailing bytes without a newline at
/// EOF are not echoed. Returns counters covering only the lines actually
/// echoed.
pub async fn handle_session<S>(
    mut stream: S,
    buffer_size: usize,
    report_interval: NonZeroUsize,
) -> SessionSummary
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = BytesMut::with_capacity(buffer_size);
    let mut stats = SessionStats::start();
    // Bytes at the front of `buffer` already known to hold no newline.
    let mut scanned = 0;

    loop {
        while let Some(pos) = buffer[scanned..].iter().position(|&b| b == b'\n') {
            let line = buffer.split_to(scanned + pos + 1);
            scanned = 0;

            if let Err(e) = echo(&mut stream, &line).await {
                debug!(error = %e, "Write failed, ending session");
                return stats.finish();
            }

            stats.record(line.len());
            if let Some(progress) = stats.progress(report_interval) {
                println!("{progress}");
            }
        }
        scanned = buffer.len();

        match stream.read_buf(&mut buffer).await {
            Ok(0) => {
                trace!(pending = buffer.len(), "Connection closed by peer");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "Read failed, ending session");
                break;
            }
        }
    }

    stats.finish()
}

async fn echo<S>(stream: &mut S, line: &[u8]) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(line).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    fn test_config() -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Config::server_defaults()
        }
    }

    fn every(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    async fn start_server() -> (SocketAddr, oneshot::Sender<()>) {
        let server = Server::bind(test_config()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            server
                .run_until(async {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });

        (addr, tx)
    }

    #[tokio::test]
    async fn test_session_echoes_lines_verbatim() {
        let stream = tokio_test::io::Builder::new()
            .read(b"MESSAGE:1:10\n")
            .write(b"MESSAGE:1:10\n")
            .read(b"MESSAGE:2:20\nMESSAGE:3:30\n")
            .write(b"MESSAGE:2:20\n")
            .write(b"MESSAGE:3:30\n")
            .build();

        let summary = handle_session(stream, 1024, every(100)).await;
        assert_eq!(summary.messages, 3);
        assert_eq!(summary.bytes, 39);
    }

    #[tokio::test]
    async fn test_session_reassembles_split_line() {
        let stream = tokio_test::io::Builder::new()
            .read(b"MESSAGE:7:")
            .read(b"1690000000000000000\n")
            .write(b"MESSAGE:7:1690000000000000000\n")
            .build();

        let summary = handle_session(stream, 1024, every(100)).await;
        assert_eq!(summary.messages, 1);
    }

    #[tokio::test]
    async fn test_session_reassembles_line_from_many_chunks() {
        let stream = tokio_test::io::Builder::new()
            .read(b"MESS")
            .read(b"AGE:")
            .read(b"9:12")
            .read(b"3\nMESSAGE:10")
            .read(b":456\n")
            .write(b"MESSAGE:9:123\n")
            .write(b"MESSAGE:10:456\n")
            .build();

        let summary = handle_session(stream, 1024, every(100)).await;
        assert_eq!(summary.messages, 2);
        assert_eq!(summary.bytes, 29);
    }

    #[tokio::test]
    async fn test_session_reports_progress_and_keeps_echoing() {
        let stream = tokio_test::io::Builder::new()
            .read(b"MESSAGE:1:1\n")
            .write(b"MESSAGE:1:1\n")
            .read(b"MESSAGE:2:2\n")
            .write(b"MESSAGE:2:2\n")
            .read(b"MESSAGE:3:3\nMESSAGE:4:4\n")
            .write(b"MESSAGE:3:3\n")
            .write(b"MESSAGE:4:4\n")
            .build();

        let summary = handle_session(stream, 1024, every(1)).await;
        assert_eq!(summary.messages, 4);

        let stream = tokio_test::io::Builder::new()
            .read(b"MESSAGE:1:1\nMESSAGE:2:2\nMESSAGE:3:3\n")
            .write(b"MESSAGE:1:1\n")
            .write(b"MESSAGE:2:2\n")
            .write(b"MESSAGE:3:3\n")
            .build();

        let summary = handle_session(stream, 1024, every(2)).await;
        assert_eq!(summary.messages, 3);
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let config = Config {
            buffer_size: 0,
            ..test_config()
        };
        let err = Server::bind(config).await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_session_drops_unterminated_tail() {
        let stream = tokio_test::io::Builder::new()
            .read(b"MESSAGE:1:10\nMESSAGE:2")
            .write(b"MESSAGE:1:10\n")
            .build();

        let summary = handle_session(stream, 1024, every(100)).await;
        assert_eq!(summary.messages, 1);
    }

    #[tokio::test]
    async fn test_session_ends_on_write_error() {
        let stream = tokio_test::io::Builder::new()
            .read(b"MESSAGE:1:10\nMESSAGE:2:20\n")
            .write(b"MESSAGE:1:10\n")
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "reset"))
            .build();

        let summary = handle_session(stream, 1024, every(100)).await;
        assert_eq!(summary.messages, 1);
    }

    #[tokio::test]
    async fn test_session_ends_on_read_error() {
        let stream = tokio_test::io::Builder::new()
            .read(b"MESSAGE:1:10\n")
            .write(b"MESSAGE:1:10\n")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();

        let summary = handle_session(stream, 1024, every(100)).await;
        assert_eq!(summary.messages, 1);
    }

    #[tokio::test]
    async fn test_echo_over_tcp() {
        let (addr, _shutdown) = start_server().await;

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        writer
            .write_all(b"MESSAGE:7:1690000000000000000\n")
            .await
            .unwrap();

        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "MESSAGE:7:1690000000000000000\n");
    }

    #[tokio::test]
    async fn test_concurrent_sessions_are_isolated() {
        let (addr, _shutdown) = start_server().await;

        async fn exchange(addr: SocketAddr, base: u64) -> Vec<u64> {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut reader = BufReader::new(reader);
            let mut seen = Vec::new();

            for seq in base..base + 50 {
                let sent = Message::now(seq).encode();
                writer.write_all(sent.as_bytes()).await.unwrap();

                let mut line = String::new();
                reader.read_line(&mut line).await.unwrap();
                assert_eq!(line, sent);
                seen.push(Message::parse(line.as_bytes()).unwrap().seq);
            }
            seen
        }

        let (a, b) = tokio::join!(exchange(addr, 0), exchange(addr, 10_000));
        assert_eq!(a, (0..50).collect::<Vec<_>>());
        assert_eq!(b, (10_000..10_050).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_shutdown_closes_listener() {
        let server = Server::bind(test_config()).await.unwrap();
        let addr = server.local_addr().unwrap();

        server.run_until(async {}).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
