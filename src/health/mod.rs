//! `/health` and `/health/sink`: shutdown-aware liveness plus a
//! staleness probe against each destination's most recently observed
//! token.

use crate::lifecycle::{Lifecycle, State};
use crate::sink::Sink;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const DEFAULT_STALENESS: Duration = Duration::from_secs(24 * 60);
const PROBE_CONCURRENCY: usize = 8;

/// `{destination name -> last observed token}`, updated opportunistically
/// by the ingress handler for DYNO_MEM / DYNO_LOAD points. A single atomic
/// latch ensures at most one writer runs per sampling tick; ingress never
/// blocks on contention.
#[derive(Debug, Default)]
pub struct RecentTokenMap {
    latch: AtomicBool,
    entries: RwLock<HashMap<String, String>>,
}

impl RecentTokenMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to record `token` as the latest sample for `destination`.
    /// Returns immediately without blocking if another writer currently
    /// holds the latch.
    pub fn try_update(&self, destination: &str, token: &str) {
        if self
            .latch
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.entries
            .write()
            .expect("recent-token lock poisoned")
            .insert(destination.to_string(), token.to_string());
        self.latch.store(false, Ordering::Release);
    }

    pub fn snapshot(&self) -> Vec<(String, String)> {
        self.entries
            .read()
            .expect("recent-token lock poisoned")
            .iter()
            .map(|(d, t)| (d.clone(), t.clone()))
            .collect()
    }
}

/// Probes each destination's sink for a recent data point. The sink
/// implementations double as their own health client — there is no
/// separate probe protocol — so this reuses the same `Arc<dyn Sink>` map
/// ingress already holds rather than maintaining a second client pool.
pub struct SinkHealth {
    recent: Arc<RecentTokenMap>,
    sinks: HashMap<String, Arc<dyn Sink>>,
    staleness: Duration,
}

impl SinkHealth {
    pub fn new(recent: Arc<RecentTokenMap>, sinks: HashMap<String, Arc<dyn Sink>>) -> Self {
        Self {
            recent,
            sinks,
            staleness: DEFAULT_STALENESS,
        }
    }

    pub fn with_staleness(mut self, staleness: Duration) -> Self {
        self.staleness = staleness;
        self
    }

    /// Runs one probe per recent-token entry, bounded to
    /// [`PROBE_CONCURRENCY`] concurrent in-flight requests. Returns the
    /// list of per-destination error lines; empty means healthy.
    pub async fn check(&self) -> Vec<String> {
        let now_micros = now_micros();
        let probes = self.recent.snapshot();

        stream::iter(probes)
            .map(|(destination, token)| {
                let sink = self.sinks.get(&destination).cloned();
                let staleness = self.staleness;
                async move {
                    let Some(sink) = sink else {
                        return Some(format!("{destination}: no sink configured"));
                    };
                    match sink.query_recent(&token).await {
                        Ok(Some(ts)) if now_micros.saturating_sub(ts) <= staleness.as_micros() as i64 => None,
                        Ok(Some(ts)) => Some(format!(
                            "{destination}: stale, last data {} us ago",
                            now_micros.saturating_sub(ts)
                        )),
                        Ok(None) => Some(format!("{destination}: no data observed")),
                        Err(err) => Some(format!("{destination}: probe failed: {err}")),
                    }
                }
            })
            .buffer_unordered(PROBE_CONCURRENCY)
            .filter_map(|result| async move { result })
            .collect()
            .await
    }
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

/// 200 while running, 503 once shutdown has started.
pub fn is_alive(lifecycle: &Lifecycle) -> bool {
    lifecycle.state() == State::Running
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LumbermillError;
    use crate::sink::NamedSeries;
    use async_trait::async_trait;

    struct FixedSink {
        recent: Option<i64>,
    }

    #[async_trait]
    impl Sink for FixedSink {
        async fn write(&self, _batch: &[NamedSeries]) -> Result<(), LumbermillError> {
            Ok(())
        }

        async fn query_recent(&self, _token: &str) -> Result<Option<i64>, LumbermillError> {
            Ok(self.recent)
        }
    }

    #[test]
    fn try_update_writes_when_latch_is_free() {
        let map = RecentTokenMap::new();
        map.try_update("primary", "t.abc");
        assert_eq!(map.snapshot(), vec![("primary".to_string(), "t.abc".to_string())]);
    }

    #[tokio::test]
    async fn check_reports_no_errors_when_all_fresh() {
        let recent = Arc::new(RecentTokenMap::new());
        recent.try_update("primary", "t.abc");
        let now = now_micros();
        let mut sinks: HashMap<String, Arc<dyn Sink>> = HashMap::new();
        sinks.insert("primary".to_string(), Arc::new(FixedSink { recent: Some(now) }));

        let health = SinkHealth::new(recent, sinks);
        assert!(health.check().await.is_empty());
    }

    #[tokio::test]
    async fn check_reports_stale_destinations() {
        let recent = Arc::new(RecentTokenMap::new());
        recent.try_update("primary", "t.abc");
        let mut sinks: HashMap<String, Arc<dyn Sink>> = HashMap::new();
        sinks.insert("primary".to_string(), Arc::new(FixedSink { recent: None }));

        let health = SinkHealth::new(recent, sinks).with_staleness(Duration::from_secs(60));
        let errors = health.check().await;
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("no data observed"));
    }
}
