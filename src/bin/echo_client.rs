//! echo-client: measures round-trip latency against an echo server.

use clap::Parser;
use echo_bench::client::Client;
use echo_bench::config::{ClientArgs, Config};
use echo_bench::{logging, signal};
use tracing::{error, info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load_client(ClientArgs::parse())?;
    logging::init(&config.log_level);

    tokio::spawn(async {
        let signal = signal::shutdown().await;
        warn!(signal, "Benchmark interrupted");
        std::process::exit(130);
    });

    println!("Connecting to {}...", config.addr());
    let client = match Client::connect(config.clone()).await {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Connection failed");
            std::process::exit(1);
        }
    };
    info!(peer = %client.peer_addr()?, "Connected");

    println!("[CONNECTED] Successfully connected to server");
    println!("Client socket options:");
    println!("  - NoDelay (TCP_NODELAY): Enabled");
    println!("  - ReadBuffer: {} bytes", config.buffer_size);
    println!("  - WriteBuffer: {} bytes", config.buffer_size);
    println!("  - Timeout: {} ms", config.timeout.as_millis());
    println!("========================================");
    println!("TCP Client Benchmark");
    println!("========================================");
    println!("Sending {} messages...", config.message_count);

    match client.run().await {
        Ok(report) => {
            println!("{report}");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Benchmark aborted");
            std::process::exit(1);
        }
    }
}
