//! The sink-worker loop: repeatedly coalesce a destination's queue
//! into per-series batches and hand each batch to the sink.

use super::Destination;
use crate::metrics::Metrics;
use crate::record::Point;
use crate::sink::{NamedSeries, Sink};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const IDLE_WINDOW: Duration = Duration::from_secs(1);

/// One of a destination's `P` concurrent consumers. Workers share a single
/// `Receiver` (see [`Destination`]), so points are still consumed in order
/// and by exactly one worker each.
pub struct Worker {
    destination: Arc<Destination>,
    sink: Arc<dyn Sink>,
    metrics: Arc<Metrics>,
}

impl Worker {
    pub fn new(destination: Arc<Destination>, sink: Arc<dyn Sink>, metrics: Arc<Metrics>) -> Self {
        Self {
            destination,
            sink,
            metrics,
        }
    }

    /// Run until the destination's queue is closed and drained.
    pub async fn run(self) {
        loop {
            let (batch, last) = self.next_delivery().await;
            self.deliver(batch).await;
            if last {
                return;
            }
        }
    }

    /// Collect points into a coalescing buffer, keyed by series name, for
    /// up to one second, or until the queue is closed and empty.
    async fn next_delivery(&self) -> (Vec<NamedSeries>, bool) {
        let mut buffer: HashMap<String, NamedSeries> = HashMap::new();
        let deadline = Instant::now() + IDLE_WINDOW;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let mut receiver = self.destination.receiver.lock().await;
            tokio::select! {
                maybe_point = receiver.recv() => {
                    drop(receiver);
                    match maybe_point {
                        Some(point) => push(&mut buffer, point),
                        None => return (drain(buffer), true),
                    }
                }
                _ = tokio::time::sleep(remaining) => {
                    drop(receiver);
                    return (drain(buffer), false);
                }
            }
        }
    }

    async fn deliver(&self, batch: Vec<NamedSeries>) {
        if batch.is_empty() {
            return;
        }
        let count = crate::sink::point_count(&batch);
        let started = Instant::now();
        match self.sink.write(&batch).await {
            Ok(()) => self.metrics.inc_points_success(count),
            Err(err) => {
                let elapsed = started.elapsed().as_micros() as u64;
                self.metrics.inc_points_failure(count, elapsed);
                tracing::warn!(
                    destination = self.destination.name(),
                    error = %err,
                    "sink delivery failed, batch dropped"
                );
            }
        }
    }
}

fn push(buffer: &mut HashMap<String, NamedSeries>, point: Point) {
    let series_name = point.series_name();
    let entry = buffer.entry(series_name.clone()).or_insert_with(|| NamedSeries {
        name: series_name,
        columns: point.kind.columns().to_vec(),
        rows: Vec::new(),
    });
    entry.rows.push(point.values);
}

fn drain(buffer: HashMap<String, NamedSeries>) -> Vec<NamedSeries> {
    buffer.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{SeriesKind, Value};
    use crate::sink::NullSink;

    fn make_point(token: &str, kind: SeriesKind) -> Point {
        let values = kind.columns().iter().map(|_| Value::I64(1)).collect();
        Point::new(token, kind, values)
    }

    #[tokio::test]
    async fn coalesces_by_series_name_and_flushes_on_idle() {
        let metrics = Arc::new(Metrics::new());
        let destination = Destination::new("d1", 10, Arc::clone(&metrics));
        destination.post_point(make_point("t.a", SeriesKind::RouterRequest));
        destination.post_point(make_point("t.a", SeriesKind::RouterRequest));
        destination.post_point(make_point("t.b", SeriesKind::DynoMem));

        let worker = Worker::new(Arc::clone(&destination), Arc::new(NullSink::default()), metrics);
        let (batch, last) = worker.next_delivery().await;

        assert!(!last);
        assert_eq!(batch.len(), 2);
        let router = batch.iter().find(|s| s.name == "router_request.t.a").unwrap();
        assert_eq!(router.rows.len(), 2);
    }

    #[tokio::test]
    async fn closed_and_drained_queue_reports_last() {
        let metrics = Arc::new(Metrics::new());
        let destination = Destination::new("d1", 10, Arc::clone(&metrics));
        destination.post_point(make_point("t.a", SeriesKind::RouterRequest));
        destination.close().await;

        let worker = Worker::new(Arc::clone(&destination), Arc::new(NullSink::default()), metrics);
        let (batch, last) = worker.next_delivery().await;
        // the buffered point drains, and the very next recv() sees closed+empty
        // within the same call, so end-of-stream is reported immediately.
        assert_eq!(batch.len(), 1);
        assert!(last);
    }
}
