//! Log store abstraction used by the post-run reporter.
//!
//! The reporter only needs two things from the store: run a KQL query over a
//! time span and get a table back, and poll a count query until ingestion has
//! caught up with the end of the run.

mod auth;
mod client;

pub use auth::{credential_from_settings, ClientSecretCredential, StaticTokenCredential, TokenCredential};
pub use client::LogAnalyticsClient;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::error::LoadTestResult;

/// KQL datetime literal format used in queries and time spans.
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Closed time window a query is evaluated over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSpan {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeSpan {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// ISO 8601 interval (`start/end`) accepted by the query API.
    pub fn to_iso8601(&self) -> String {
        format!(
            "{}/{}",
            self.start.format(DATETIME_FORMAT),
            self.end.format(DATETIME_FORMAT)
        )
    }
}

/// Column metadata returned with a result table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type", default)]
    pub column_type: String,
}

/// Tabular query result.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct QueryTable {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Values of a column as numbers; nulls and non-numeric cells become NaN.
    pub fn numeric_column(&self, name: &str) -> Option<Vec<f64>> {
        let index = self.column_index(name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(index).map(as_f64).unwrap_or(f64::NAN))
                .collect(),
        )
    }

    /// First cell of the first row, read as a count.
    pub fn first_count(&self) -> Option<i64> {
        let cell = self.rows.first()?.first()?;
        match cell {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// Reads a cell as a number, NaN when absent or not numeric.
pub fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => s.parse().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

/// Backoff policy for [`LogStore::wait_until_nonzero`].
#[derive(Debug, Clone)]
pub struct WaitPolicy {
    /// Delay after the first empty poll.
    pub initial_delay: Duration,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
    /// Delay multiplier applied after each empty poll.
    pub multiplier: f64,
    /// Random extra delay as a fraction of the current delay (0.0-1.0).
    pub jitter_percent: f64,
    /// Hard ceiling on the whole wait.
    pub timeout: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_percent: 0.1,
            timeout: Duration::from_secs(300),
        }
    }
}

impl WaitPolicy {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }
}

/// How a wait for ingested data ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The count query returned a non-zero value.
    Ready { attempts: u32 },
    /// The policy's timeout elapsed first; results may be incomplete.
    TimedOut { attempts: u32 },
}

/// Queryable log store.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Runs `query`, optionally restricted to `timespan`, and returns the
    /// primary result table.
    async fn run(&self, query: &str, timespan: Option<&TimeSpan>) -> LoadTestResult<QueryTable>;

    /// Polls a count query until it reports a non-zero value or the policy
    /// times out. Query errors are returned immediately.
    async fn wait_until_nonzero(&self, query: &str, policy: &WaitPolicy) -> LoadTestResult<WaitOutcome> {
        let deadline = Instant::now() + policy.timeout;
        let mut delay = policy.initial_delay;
        let mut attempts = 0;

        loop {
            attempts += 1;
            let count = self.run(query, None).await?.first_count().unwrap_or(0);
            if count > 0 {
                info!("Log store reports {} records after {} attempt(s)", count, attempts);
                return Ok(WaitOutcome::Ready { attempts });
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "Log store still empty after {} attempt(s) ({:?}); metrics may be incomplete",
                    attempts, policy.timeout
                );
                return Ok(WaitOutcome::TimedOut { attempts });
            }

            let jitter_range = (delay.as_millis() as f64 * policy.jitter_percent) as u64;
            let jitter = rand::random::<u64>() % (jitter_range + 1);
            let wait = (delay + Duration::from_millis(jitter)).min(deadline - now);

            info!("Waiting {:?} for log ingestion (attempt {})", wait, attempts);
            sleep(wait).await;

            delay = delay.mul_f64(policy.multiplier).min(policy.max_delay);
        }
    }
}
