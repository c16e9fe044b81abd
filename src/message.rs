//! Benchmark message format.
//!
//! ```text
//! MESSAGE:<sequence-id>:<unix-nanosecond-timestamp>\n
//! ```
//!
//! The server never parses these lines; it echoes whatever bytes it reads.
//! Parsing exists so the client and tests can attribute an echo to the
//! request that produced it.

use chrono::Utc;

const PREFIX: &str = "MESSAGE:";

/// One request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub seq: u64,
    /// Unix timestamp in nanoseconds at construction time.
    pub timestamp_ns: i64,
}

impl Message {
    /// Build message `seq` stamped with the current wall-clock time.
    pub fn now(seq: u64) -> Self {
        Self {
            seq,
            timestamp_ns: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        }
    }

    /// Write the wire form, newline included, into `out`.
    pub fn encode_into(&self, out: &mut String) {
        use std::fmt::Write;
        out.clear();
        // Writing into a String cannot fail.
        let _ = writeln!(out, "{PREFIX}{}:{}", self.seq, self.timestamp_ns);
    }

    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(40);
        self.encode_into(&mut out);
        out
    }

    /// Parse a line, with or without its trailing newline.
    pub fn parse(line: &[u8]) -> Option<Self> {
        let line = std::str::from_utf8(line).ok()?;
        let line = line.strip_suffix('\n').unwrap_or(line);
        let rest = line.strip_prefix(PREFIX)?;
        let (seq, timestamp) = rest.split_once(':')?;

        Some(Self {
            seq: seq.parse().ok()?,
            timestamp_ns: timestamp.parse().ok()?,
        })
    }
}
