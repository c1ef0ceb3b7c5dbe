//! Aggregate request statistics for the end-of-run summary

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use apim_loadtest_core::RequestEvent;
use parking_lot::Mutex;

/// Key used for requests that never got a response.
pub const TRANSPORT_ERROR_KEY: &str = "error";

/// Snapshot of everything recorded so far.
#[derive(Debug, Clone)]
pub struct RunStats {
    pub started_at: Instant,
    pub total_requests: usize,
    pub failed_requests: usize,
    /// Request counts by status code, or [`TRANSPORT_ERROR_KEY`]
    pub status_counts: BTreeMap<String, usize>,
    /// Latencies in milliseconds
    pub latencies_ms: Vec<u64>,
}

impl RunStats {
    fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_requests: 0,
            failed_requests: 0,
            status_counts: BTreeMap::new(),
            latencies_ms: Vec::new(),
        }
    }

    /// Fraction of failed requests (0.0-1.0)
    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.failed_requests as f64 / self.total_requests as f64
    }

    /// Requests per second over `elapsed`
    pub fn requests_per_second(&self, elapsed: Duration) -> f64 {
        if elapsed.as_secs_f64() == 0.0 {
            return 0.0;
        }
        self.total_requests as f64 / elapsed.as_secs_f64()
    }

    pub fn median_latency(&self) -> Duration {
        if self.latencies_ms.is_empty() {
            return Duration::ZERO;
        }

        let mut sorted = self.latencies_ms.clone();
        sorted.sort_unstable();
        Duration::from_millis(sorted[sorted.len() / 2])
    }
}

/// Thread-safe collector shared by all simulated users.
#[derive(Debug)]
pub struct StatsCollector {
    inner: Mutex<RunStats>,
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self {
            inner: Mutex::new(RunStats::new()),
        }
    }
}

impl StatsCollector {
    pub fn record(&self, event: &RequestEvent) {
        let key = match event.status_code {
            Some(code) => code.to_string(),
            None => TRANSPORT_ERROR_KEY.to_string(),
        };

        let mut stats = self.inner.lock();
        stats.total_requests += 1;
        if !event.is_success() {
            stats.failed_requests += 1;
        }
        *stats.status_counts.entry(key).or_insert(0) += 1;
        stats.latencies_ms.push(event.latency.as_millis() as u64);
    }

    pub fn snapshot(&self) -> RunStats {
        self.inner.lock().clone()
    }
}
