//! tcp-echo-bench: a TCP echo server and round-trip latency benchmark.
//!
//! Two executables share this library:
//! - `echo-server` accepts connections and echoes newline-terminated lines
//!   back to the sender, one task per connection
//! - `echo-client` opens one connection, sends timestamped messages one at a
//!   time and reports latency and throughput
//!
//! Wire format: `MESSAGE:<sequence-id>:<unix-nanosecond-timestamp>\n`.
//! Configuration via CLI arguments or TOML file, see [`config`].

pub mod client;
pub mod config;
pub mod logging;
pub mod message;
pub mod server;
pub mod signal;
pub mod socket;
pub mod stats;
