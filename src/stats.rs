//! Latency and throughput accounting.
//!
//! Everything here is owned by a single session or a single client run;
//! nothing is shared between connections.

use std::fmt;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

const SEPARATOR: &str = "----------------------------------------";
const BANNER: &str = "========================================";

/// `count / elapsed`, or 0.0 when no time has elapsed.
pub fn per_second(count: f64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count / secs
    } else {
        0.0
    }
}

/// Fixed-length latency table, one slot per message sequence number.
#[derive(Debug, Clone)]
pub struct LatencyRecorder {
    samples: Vec<f64>,
}

impl LatencyRecorder {
    /// Preallocate `count` slots.
    pub fn new(count: usize) -> Self {
        Self {
            samples: vec![0.0; count],
        }
    }

    /// Store the round-trip time of message `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is outside the preallocated range.
    pub fn record(&mut self, index: usize, latency: Duration) {
        self.samples[index] = latency.as_secs_f64() * 1000.0;
    }

    /// Aggregate the table. `None` when there are no samples.
    pub fn summary(&self) -> Option<LatencySummary> {
        let first = *self.samples.first()?;
        let (sum, min, max) = self
            .samples
            .iter()
            .fold((0.0, first, first), |(sum, min, max), &lat| {
                (sum + lat, f64::min(min, lat), f64::max(max, lat))
            });

        Some(LatencySummary {
            count: self.samples.len(),
            sum_ms: sum,
            min_ms: min,
            max_ms: max,
            avg_ms: sum / self.samples.len() as f64,
        })
    }
}

/// Client progress lines after `done` of `total` round trips, when `done`
/// is a multiple of `interval`.
pub fn run_progress(
    done: usize,
    total: usize,
    elapsed: Duration,
    interval: NonZeroUsize,
) -> Option<String> {
    if done == 0 || done % interval.get() != 0 {
        return None;
    }
    let rate = per_second(done as f64, elapsed);
    Some(format!(
        "[PROGRESS] Sent/Received {done}/{total} messages\n[STATS] Messages: {done}, Rate: {rate:.2} msg/sec"
    ))
}

/// Aggregated round-trip latency in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySummary {
    pub count: usize,
    pub sum_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
}

/// Running counters for one server session.
#[derive(Debug, Clone)]
pub struct SessionStats {
    messages: u64,
    bytes: u64,
    started: Instant,
}

impl SessionStats {
    pub fn start() -> Self {
        Self {
            messages: 0,
            bytes: 0,
            started: Instant::now(),
        }
    }

    /// Count one echoed line of `len` bytes. Returns the new message count.
    pub fn record(&mut self, len: usize) -> u64 {
        self.messages += 1;
        self.bytes += len as u64;
        self.messages
    }

    /// Messages per second since the session started.
    pub fn rate(&self) -> f64 {
        per_second(self.messages as f64, self.started.elapsed())
    }

    /// The `[STATS]` line, when the message count has reached a multiple of
    /// `interval`.
    pub fn progress(&self, interval: NonZeroUsize) -> Option<String> {
        if self.messages == 0 || self.messages % interval.get() as u64 != 0 {
            return None;
        }
        Some(format!(
            "[STATS] Messages: {}, Rate: {:.2} msg/sec",
            self.messages,
            self.rate()
        ))
    }

    /// Freeze the counters at session teardown.
    pub fn finish(self) -> SessionSummary {
        SessionSummary {
            messages: self.messages,
            bytes: self.bytes,
            duration: self.started.elapsed(),
        }
    }
}

/// Final numbers for a closed session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSummary {
    pub messages: u64,
    pub bytes: u64,
    pub duration: Duration,
}

impl SessionSummary {
    pub fn average_rate(&self) -> f64 {
        per_second(self.messages as f64, self.duration)
    }
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[SESSION STATS]")?;
        writeln!(f, "  Total Messages: {}", self.messages)?;
        writeln!(f, "  Total Bytes:    {}", self.bytes)?;
        writeln!(f, "  Total Duration: {} ms", self.duration.as_millis())?;
        write!(f, "  Average Rate:   {:.2} msg/sec", self.average_rate())
    }
}

/// Result of one complete client run.
#[derive(Debug, Clone)]
pub struct BenchmarkReport {
    pub messages: usize,
    pub total_bytes: u64,
    pub duration: Duration,
    pub latency: Option<LatencySummary>,
}

impl BenchmarkReport {
    pub fn throughput_mb_s(&self) -> f64 {
        per_second(self.total_bytes as f64 / 1024.0 / 1024.0, self.duration)
    }

    pub fn messages_per_sec(&self) -> f64 {
        per_second(self.messages as f64, self.duration)
    }
}

impl fmt::Display for BenchmarkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{BANNER}")?;
        writeln!(f, "BENCHMARK RESULTS")?;
        writeln!(f, "{BANNER}")?;
        writeln!(f, "Messages Sent:     {}", self.messages)?;
        writeln!(f, "Total Duration:    {} ms", self.duration.as_millis())?;
        writeln!(f, "Total Data:        {:.2} KB", self.total_bytes as f64 / 1024.0)?;
        writeln!(f, "{SEPARATOR}")?;
        writeln!(f, "Latency (RTT):")?;
        match &self.latency {
            Some(lat) => {
                writeln!(f, "  Average:         {:.3} ms", lat.avg_ms)?;
                writeln!(f, "  Min:             {:.3} ms", lat.min_ms)?;
                writeln!(f, "  Max:             {:.3} ms", lat.max_ms)?;
            }
            None => {
                writeln!(f, "  Average:         n/a")?;
                writeln!(f, "  Min:             n/a")?;
                writeln!(f, "  Max:             n/a")?;
            }
        }
        writeln!(f, "{SEPARATOR}")?;
        writeln!(f, "Throughput:        {:.2} MB/s", self.throughput_mb_s())?;
        writeln!(f, "Messages/sec:      {:.2}", self.messages_per_sec())?;
        write!(f, "{BANNER}")
    }
}
