//! Benchmark client.
//!
//! One connection, one message in flight. Each round trip is timed from just
//! before the write until the echoed line has been read back. The whole run
//! races a single absolute deadline fixed at connect time; it is never
//! extended per message.

use crate::config::{Config, ConfigError};
use crate::message::Message;
use crate::socket::{self, SocketOptions};
use crate::stats::{run_progress, BenchmarkReport, LatencyRecorder};
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// Errors that end a benchmark run. There is no retry path.
#[derive(Debug)]
pub enum ClientError {
    Config(ConfigError),
    Connect { addr: String, source: io::Error },
    Write { seq: usize, source: io::Error },
    Read { seq: usize, source: io::Error },
    /// Peer closed the connection before echoing message `seq`.
    Closed { seq: usize },
    /// The run deadline passed after `completed` round trips.
    Timeout { completed: usize, timeout: Duration },
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Config(e) => write!(f, "{e}"),
            ClientError::Connect { addr, source } => {
                write!(f, "failed to connect to {addr}: {source}")
            }
            ClientError::Write { seq, source } => {
                write!(f, "send error on message {seq}: {source}")
            }
            ClientError::Read { seq, source } => {
                write!(f, "receive error on message {seq}: {source}")
            }
            ClientError::Closed { seq } => {
                write!(f, "connection closed by server before echo of message {seq}")
            }
            ClientError::Timeout { completed, timeout } => write!(
                f,
                "deadline of {} ms exceeded after {completed} round trips",
                timeout.as_millis()
            ),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Config(e) => Some(e),
            ClientError::Connect { source, .. }
            | ClientError::Write { source, .. }
            | ClientError::Read { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// A connected benchmark client.
pub struct Client {
    config: Config,
    stream: TcpStream,
    deadline: Instant,
}

impl Client {
    /// Validate `config`, connect, tune the socket and start the run deadline.
    pub async fn connect(config: Config) -> Result<Self, ClientError> {
        config.validate().map_err(ClientError::Config)?;

        let addr = config.addr();
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| ClientError::Connect { addr, source })?;

        let tuned = socket::tune(&stream, &SocketOptions::client(config.buffer_size));
        if !tuned.is_complete() {
            warn!(options = ?tuned.applied, "Continuing with partial socket tuning");
        }
        let deadline = Instant::now() + config.timeout;

        Ok(Client {
            config,
            stream,
            deadline,
        })
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// Send `message_count` messages strictly one after another.
    pub async fn run(self) -> Result<BenchmarkReport, ClientError> {
        let Client {
            config,
            stream,
            deadline,
        } = self;

        let count = config.message_count;
        let interval = config.report_interval;
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::with_capacity(config.buffer_size, reader);

        let mut latencies = LatencyRecorder::new(count);
        let mut request = String::with_capacity(config.message_size);
        let mut response = Vec::with_capacity(config.message_size);
        let mut total_bytes = 0u64;

        let expired = |completed| ClientError::Timeout {
            completed,
            timeout: config.timeout,
        };

        info!(messages = count, "Starting benchmark");
        let started = std::time::Instant::now();

        for seq in 0..count {
            Message::now(seq as u64).encode_into(&mut request);
            let sent_at = std::time::Instant::now();

            before(deadline, async {
                writer.write_all(request.as_bytes()).await?;
                writer.flush().await
            })
            .await
            .ok_or_else(|| expired(seq))?
            .map_err(|source| ClientError::Write { seq, source })?;

            response.clear();
            let n = before(deadline, reader.read_until(b'\n', &mut response))
                .await
                .ok_or_else(|| expired(seq))?
                .map_err(|source| ClientError::Read { seq, source })?;

            if n == 0 || !response.ends_with(b"\n") {
                return Err(ClientError::Closed { seq });
            }

            latencies.record(seq, sent_at.elapsed());
            total_bytes += response.len() as u64;

            if let Some(progress) = run_progress(seq + 1, count, started.elapsed(), interval) {
                println!("{progress}");
            }
        }

        let duration = started.elapsed();
        debug!(duration_ms = duration.as_millis() as u64, "Benchmark finished");

        Ok(BenchmarkReport {
            messages: count,
            total_bytes,
            duration,
            latency: latencies.summary(),
        })
    }
}

/// `None` when `deadline` passes before `fut` completes.
async fn before<F: Future>(deadline: Instant, fut: F) -> Option<F::Output> {
    timeout_at(deadline, fut).await.ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Server;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn client_config(addr: SocketAddr, messages: usize) -> Config {
        Config {
            host: addr.ip().to_string(),
            port: addr.port(),
            message_count: messages,
            ..Config::client_defaults()
        }
    }

    async fn start_echo_server() -> SocketAddr {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Config::server_defaults()
        };
        let server = Server::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run_until(std::future::pending()));
        addr
    }

    #[tokio::test]
    async fn test_full_run() {
        let addr = start_echo_server().await;

        let client = Client::connect(client_config(addr, 250)).await.unwrap();
        assert_eq!(client.peer_addr().unwrap(), addr);

        let report = client.run().await.unwrap();
        assert_eq!(report.messages, 250);

        let latency = report.latency.unwrap();
        assert_eq!(latency.count, 250);
        assert!(latency.min_ms >= 0.0);
        assert!(latency.min_ms <= latency.avg_ms);
        assert!(latency.avg_ms <= latency.max_ms);
        assert!(report.total_bytes > 0);
    }

    #[tokio::test]
    async fn test_zero_messages() {
        let addr = start_echo_server().await;

        let report = Client::connect(client_config(addr, 0))
            .await
            .unwrap()
            .run()
            .await
            .unwrap();

        assert_eq!(report.messages, 0);
        assert_eq!(report.total_bytes, 0);
        assert!(report.latency.is_none());
        assert!(report.to_string().contains("n/a"));
    }

    #[tokio::test]
    async fn test_deadline_expires() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Accept and hold the connection without ever answering.
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let config = Config {
            timeout: Duration::from_millis(200),
            ..client_config(addr, 10)
        };
        let err = Client::connect(config).await.unwrap().run().await.unwrap_err();

        match err {
            ClientError::Timeout { completed, timeout } => {
                assert_eq!(completed, 0);
                assert_eq!(timeout, Duration::from_millis(200));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_closes_mid_run() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Echo nothing: read the first line and hang up.
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let _ = stream.read(&mut buf).await;
        });

        let err = Client::connect(client_config(addr, 5))
            .await
            .unwrap()
            .run()
            .await
            .unwrap_err();

        assert!(
            matches!(
                err,
                ClientError::Closed { seq: 0 } | ClientError::Read { seq: 0, .. }
            ),
            "unexpected: {err:?}"
        );
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = Client::connect(client_config(addr, 1)).await.err().unwrap();
        assert!(matches!(err, ClientError::Connect { .. }));
        assert!(err.to_string().starts_with("failed to connect to"));
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_config() {
        let config = Config {
            buffer_size: 0,
            ..Config::client_defaults()
        };
        let err = Client::connect(config).await.err().unwrap();
        assert!(matches!(err, ClientError::Config(ConfigError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_progress_every_message() {
        let addr = start_echo_server().await;

        let config = Config {
            report_interval: std::num::NonZeroUsize::MIN,
            ..client_config(addr, 5)
        };
        let report = Client::connect(config).await.unwrap().run().await.unwrap();
        assert_eq!(report.latency.unwrap().count, 5);
    }

    #[test]
    fn test_timeout_display() {
        let err = ClientError::Timeout {
            completed: 42,
            timeout: Duration::from_secs(5),
        };
        assert_eq!(
            err.to_string(),
            "deadline of 5000 ms exceeded after 42 round trips"
        );
    }
}
