//! The `Sink` interface a destination writes through:
//! `write(series-name, columns, rows) -> (ok, err)`, plus a read path the
//! health subsystem uses to detect stale tokens. Concrete implementations
//! are plugged in at startup.

use crate::error::LumbermillError;
use crate::record::Value;
use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// One coalesced series ready for a single `write` call.
#[derive(Debug, Clone)]
pub struct NamedSeries {
    pub name: String,
    pub columns: Vec<&'static str>,
    pub rows: Vec<Vec<Value>>,
}

/// How many points a batch carries in total, used for the delivery-size
/// histogram.
pub fn point_count(batch: &[NamedSeries]) -> u64 {
    batch.iter().map(|s| s.rows.len() as u64).sum()
}

/// Retry behavior for [`HttpSink`]. The primary-sink path never retries —
/// a dropped batch is cheaper than a queue backed up behind a slow
/// downstream; the secondary-sink poster pattern retries up to 4 times
/// with exponential backoff, treating 5xx as retryable and 4xx as
/// terminal.
#[derive(Debug, Clone, Copy)]
pub enum RetryPolicy {
    None,
    Backoff {
        max_attempts: u32,
        base_delay: Duration,
    },
}

impl RetryPolicy {
    pub fn backoff_poster() -> Self {
        RetryPolicy::Backoff {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// `Sink.Write(series-name, columns, rows) -> (ok, err)`, plus a staleness
/// probe used by `/health/sink`.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Write a batch of coalesced series with microsecond precision.
    async fn write(&self, batch: &[NamedSeries]) -> Result<(), LumbermillError>;

    /// Most recent timestamp (microseconds since epoch) seen for `token`,
    /// if any. Used by the health subsystem's staleness check.
    async fn query_recent(&self, token: &str) -> Result<Option<i64>, LumbermillError>;
}

/// Discards everything; always reports data as fresh. Selected when
/// `SINK_HOSTS` is empty.
#[derive(Debug, Default)]
pub struct NullSink {
    last_write_micros: AtomicI64,
}

#[async_trait]
impl Sink for NullSink {
    async fn write(&self, batch: &[NamedSeries]) -> Result<(), LumbermillError> {
        if let Some(series) = batch.first() {
            if let Some(row) = series.rows.first() {
                if let Some(Value::I64(ts)) = row.first() {
                    self.last_write_micros.store(*ts, Ordering::Relaxed);
                }
            }
        }
        Ok(())
    }

    async fn query_recent(&self, _token: &str) -> Result<Option<i64>, LumbermillError> {
        let ts = self.last_write_micros.load(Ordering::Relaxed);
        if ts == 0 {
            return Ok(None);
        }
        Ok(Some(ts))
    }
}

/// Posts batches as JSON to a configured host over HTTP.
pub struct HttpSink {
    base_url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpSink {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client, retry: RetryPolicy) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            retry,
        }
    }

    async fn post_once(&self, batch: &[NamedSeries]) -> Result<reqwest::StatusCode, LumbermillError> {
        let url = format!("{}/write", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&SerializableBatch::from(batch))
            .send()
            .await
            .map_err(|e| LumbermillError::Sink(e.to_string()))?;
        Ok(response.status())
    }
}

#[async_trait]
impl Sink for HttpSink {
    async fn write(&self, batch: &[NamedSeries]) -> Result<(), LumbermillError> {
        if batch.is_empty() {
            return Ok(());
        }

        match self.retry {
            RetryPolicy::None => {
                let status = self.post_once(batch).await?;
                if status.is_success() {
                    Ok(())
                } else {
                    Err(LumbermillError::Sink(format!("sink returned {status}")))
                }
            }
            RetryPolicy::Backoff {
                max_attempts,
                base_delay,
            } => {
                let mut delay = base_delay;
                let mut last_err = String::new();
                for attempt in 0..max_attempts {
                    match self.post_once(batch).await {
                        Ok(status) if status.is_success() => return Ok(()),
                        Ok(status) if status.is_client_error() => {
                            return Err(LumbermillError::Sink(format!(
                                "terminal {status} on attempt {}",
                                attempt + 1
                            )));
                        }
                        Ok(status) => {
                            last_err = format!("retryable {status}");
                        }
                        Err(e) => {
                            last_err = e.to_string();
                        }
                    }
                    if attempt + 1 < max_attempts {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
                Err(LumbermillError::Sink(format!(
                    "exhausted {max_attempts} attempts: {last_err}"
                )))
            }
        }
    }

    async fn query_recent(&self, token: &str) -> Result<Option<i64>, LumbermillError> {
        let url = format!("{}/recent/{}", self.base_url.trim_end_matches('/'), token);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LumbermillError::Sink(e.to_string()))?;
        if !response.status().is_success() {
            return Err(LumbermillError::Sink(format!(
                "recent query returned {}",
                response.status()
            )));
        }
        let body: RecentResponse = response
            .json()
            .await
            .map_err(|e| LumbermillError::Sink(e.to_string()))?;
        Ok(body.timestamp_micros)
    }
}

/// Fans a batch out to a primary sink and a secondary poster. The primary
/// result is authoritative — a secondary failure is logged but never turns
/// a successful primary write into a failed delivery, mirroring the
/// original's independent per-destination posters that each tracked their
/// own success/failure counters off the same point stream.
pub struct FanoutSink {
    primary: std::sync::Arc<dyn Sink>,
    secondary: std::sync::Arc<dyn Sink>,
}

impl FanoutSink {
    pub fn new(primary: std::sync::Arc<dyn Sink>, secondary: std::sync::Arc<dyn Sink>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl Sink for FanoutSink {
    async fn write(&self, batch: &[NamedSeries]) -> Result<(), LumbermillError> {
        let primary_result = self.primary.write(batch).await;
        if let Err(err) = self.secondary.write(batch).await {
            tracing::warn!(error = %err, "secondary sink delivery failed");
        }
        primary_result
    }

    async fn query_recent(&self, token: &str) -> Result<Option<i64>, LumbermillError> {
        self.primary.query_recent(token).await
    }
}

#[derive(Debug, serde::Deserialize)]
struct RecentResponse {
    timestamp_micros: Option<i64>,
}

#[derive(Debug, serde::Serialize)]
struct SerializableBatch<'a> {
    series: Vec<SerializableSeries<'a>>,
}

#[derive(Debug, serde::Serialize)]
struct SerializableSeries<'a> {
    name: &'a str,
    columns: &'a [&'static str],
    rows: Vec<Vec<String>>,
}

impl<'a> From<&'a [NamedSeries]> for SerializableBatch<'a> {
    fn from(batch: &'a [NamedSeries]) -> Self {
        SerializableBatch {
            series: batch
                .iter()
                .map(|s| SerializableSeries {
                    name: &s.name,
                    columns: &s.columns,
                    rows: s
                        .rows
                        .iter()
                        .map(|row| row.iter().map(|v| v.to_string()).collect())
                        .collect(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_sink_always_succeeds_and_tracks_last_write() {
        let sink = NullSink::default();
        assert_eq!(sink.query_recent("t.x").await.unwrap(), None);

        let batch = vec![NamedSeries {
            name: "router_request.t.x".to_string(),
            columns: vec!["timestamp", "status", "service"],
            rows: vec![vec![Value::I64(1_000_000), Value::I64(200), Value::I64(10)]],
        }];
        sink.write(&batch).await.unwrap();
        assert_eq!(sink.query_recent("t.x").await.unwrap(), Some(1_000_000));
    }

    #[test]
    fn point_count_sums_all_series_rows() {
        let batch = vec![
            NamedSeries {
                name: "a".to_string(),
                columns: vec!["timestamp"],
                rows: vec![vec![Value::I64(1)], vec![Value::I64(2)]],
            },
            NamedSeries {
                name: "b".to_string(),
                columns: vec!["timestamp"],
                rows: vec![vec![Value::I64(3)]],
            },
        ];
        assert_eq!(point_count(&batch), 3);
    }

    #[derive(Default)]
    struct FailingSink;

    #[async_trait]
    impl Sink for FailingSink {
        async fn write(&self, _batch: &[NamedSeries]) -> Result<(), LumbermillError> {
            Err(LumbermillError::Sink("boom".into()))
        }

        async fn query_recent(&self, _token: &str) -> Result<Option<i64>, LumbermillError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn fanout_sink_reports_primary_result_regardless_of_secondary() {
        let batch = vec![NamedSeries {
            name: "router_request.t.x".to_string(),
            columns: vec!["timestamp"],
            rows: vec![vec![Value::I64(1)]],
        }];

        let ok = std::sync::Arc::new(NullSink::default());
        let failing = std::sync::Arc::new(FailingSink::default());
        let fanout = FanoutSink::new(ok, failing);
        assert!(fanout.write(&batch).await.is_ok());

        let failing_primary = std::sync::Arc::new(FailingSink::default());
        let null_secondary = std::sync::Arc::new(NullSink::default());
        let fanout = FanoutSink::new(failing_primary, null_secondary);
        assert!(fanout.write(&batch).await.is_err());
    }
}
