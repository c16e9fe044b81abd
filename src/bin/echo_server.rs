//! echo-server: accepts connections and echoes every line back.
//!
//! Runs until SIGINT or SIGTERM, then closes the listener and exits at once
//! without draining open sessions.

use clap::Parser;
use echo_bench::config::{Config, ServerArgs};
use echo_bench::logging;
use echo_bench::server::Server;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load_server(ServerArgs::parse())?;
    logging::init(&config.log_level);

    info!(
        host = %config.host,
        port = config.port,
        buffer_size = config.buffer_size,
        keepalive_secs = config.keepalive.as_secs(),
        "Starting echo server"
    );

    let server = match Server::bind(config.clone()).await {
        Ok(server) => server,
        Err(e) => {
            error!(address = %config.addr(), error = %e, "Failed to create listener");
            std::process::exit(1);
        }
    };

    println!("========================================");
    println!("TCP Echo Server Started");
    println!("========================================");
    println!("Listening on {}", server.local_addr()?);
    println!("Socket options per connection:");
    println!("  - NoDelay (TCP_NODELAY): Enabled");
    println!("  - ReadBuffer: {} bytes", config.buffer_size);
    println!("  - WriteBuffer: {} bytes", config.buffer_size);
    println!("  - KeepAlive: Enabled ({}s period)", config.keepalive.as_secs());
    println!("Press Ctrl+C to stop");

    server.run().await?;

    println!("[SHUTDOWN] Server stopping...");
    std::process::exit(0);
}
