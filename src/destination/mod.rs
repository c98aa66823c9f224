//! Per-destination bounded queue and worker pool.
//!
//! The queue is a single `tokio::sync::mpsc::channel`: the `Sender` half is
//! cheap to share across every ingress handler, and its `try_send` gives a
//! non-blocking publish that never makes a request wait on a slow
//! destination. The `Receiver` half is wrapped in a mutex and shared by the
//! destination's `P` workers so that each point is still consumed by
//! exactly one of them.

pub mod worker;

use crate::metrics::Metrics;
use crate::record::Point;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

pub use worker::Worker;

/// One configured downstream sink: a name, a bounded queue, and (spawned
/// separately, see [`Worker`]) `P` concurrent workers.
pub struct Destination {
    name: String,
    sender: mpsc::Sender<Point>,
    receiver: Mutex<mpsc::Receiver<Point>>,
    metrics: Arc<Metrics>,
}

impl Destination {
    pub fn new(name: impl Into<String>, capacity: usize, metrics: Arc<Metrics>) -> Arc<Self> {
        let name = name.into();
        metrics.register_destination(&name);
        let (sender, receiver) = mpsc::channel(capacity);
        Arc::new(Self {
            name,
            sender,
            receiver: Mutex::new(receiver),
            metrics,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Non-blocking publish. Over capacity, the point is discarded and the
    /// drop counter is incremented — the caller is never made to wait.
    pub fn post_point(&self, point: Point) {
        if self.sender.try_send(point).is_err() {
            self.metrics.inc_dropped();
        }
    }

    /// Current queue depth, sampled for the `points.pending.<destination>`
    /// gauge.
    pub fn pending_depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn sample_pending_gauge(&self) {
        self.metrics.set_pending(&self.name, self.pending_depth() as u64);
    }

    /// Stop accepting new points and let workers drain what's already
    /// queued. Workers observe end-of-stream once the queue is both closed
    /// and empty.
    pub async fn close(&self) {
        self.receiver.lock().await.close();
    }
}
