//! Process-wide metric registry.
//!
//! Lifted to an explicit `Arc<Metrics>` handed to the ingress router and to
//! every destination/worker — no hidden singleton. The vocabulary is fixed
//! and small enough that hand-formatting Prometheus text directly is
//! simpler than pulling in a scraping crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

#[derive(Debug, Default)]
struct Counter(AtomicU64);

impl Counter {
    fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A coarse histogram: running count + sum, sufficient for the fixed
/// vocabulary this service publishes (batch sizes, delivery sizes).
#[derive(Debug, Default)]
struct Histogram {
    count: AtomicU64,
    sum: AtomicU64,
}

impl Histogram {
    fn observe(&self, value: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
    }

    fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }
}

/// A running-total timer (microseconds), rendered the same shape as
/// [`Histogram`].
type Timer = Histogram;

/// Per-code router-error counters (`lines.router.errors.<code>`), created
/// lazily since the code vocabulary (H10, H12, H14, ...) is not known in
/// advance.
#[derive(Debug, Default)]
struct PerCodeCounters(RwLock<HashMap<String, AtomicU64>>);

impl PerCodeCounters {
    fn inc(&self, code: &str) {
        if let Some(counter) = self.0.read().expect("per-code lock poisoned").get(code) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let mut map = self.0.write().expect("per-code lock poisoned");
        map.entry(code.to_string())
            .or_insert_with(AtomicU64::default)
            .fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> Vec<(String, u64)> {
        self.0
            .read()
            .expect("per-code lock poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Per-destination pending-depth gauges, one per configured destination
/// (the destination set is fixed at startup, so this map never grows at
/// runtime).
#[derive(Debug, Default)]
struct PendingGauges(RwLock<HashMap<String, AtomicU64>>);

impl PendingGauges {
    fn register(&self, destination: &str) {
        self.0
            .write()
            .expect("pending gauge lock poisoned")
            .entry(destination.to_string())
            .or_insert_with(AtomicU64::default);
    }

    fn set(&self, destination: &str, value: u64) {
        if let Some(gauge) = self
            .0
            .read()
            .expect("pending gauge lock poisoned")
            .get(destination)
        {
            gauge.store(value, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> Vec<(String, u64)> {
        self.0
            .read()
            .expect("pending gauge lock poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect()
    }
}

/// The fixed vocabulary published under `lumbermill.*`.
#[derive(Debug, Default)]
pub struct Metrics {
    batch: Counter,
    lines: Counter,
    lines_router: Counter,
    lines_router_error: Counter,
    lines_router_blank: Counter,
    lines_dyno_mem: Counter,
    lines_dyno_load: Counter,
    lines_dyno_error: Counter,
    router_error_by_code: PerCodeCounters,

    errors_dropped: Counter,
    errors_auth_failure: Counter,
    errors_badrequest: Counter,
    errors_token_missing: Counter,
    errors_time_parse: Counter,
    errors_logfmt_parse: Counter,
    errors_unknown_heroku: Counter,
    errors_unknown_user: Counter,

    points_success: Counter,
    points_failure: Counter,

    batches_parse_time: Timer,
    failure_time: Timer,
    batches_sizes: Histogram,
    poster_deliver_sizes: Histogram,

    pending: PendingGauges,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_destination(&self, name: &str) {
        self.pending.register(name);
    }

    pub fn inc_batch(&self) {
        self.batch.inc();
    }

    pub fn inc_lines(&self, n: u64) {
        self.lines.inc_by(n);
    }

    pub fn inc_lines_router(&self) {
        self.lines_router.inc();
    }

    pub fn inc_lines_router_error(&self, code: &str) {
        self.lines_router_error.inc();
        self.router_error_by_code.inc(code);
    }

    pub fn inc_lines_router_blank(&self) {
        self.lines_router_blank.inc();
    }

    pub fn inc_lines_dyno_mem(&self) {
        self.lines_dyno_mem.inc();
    }

    pub fn inc_lines_dyno_load(&self) {
        self.lines_dyno_load.inc();
    }

    pub fn inc_lines_dyno_error(&self) {
        self.lines_dyno_error.inc();
    }

    pub fn inc_dropped(&self) {
        self.errors_dropped.inc();
    }

    pub fn inc_auth_failure(&self) {
        self.errors_auth_failure.inc();
    }

    pub fn inc_badrequest(&self) {
        self.errors_badrequest.inc();
    }

    pub fn inc_token_missing(&self) {
        self.errors_token_missing.inc();
    }

    pub fn inc_time_parse_error(&self) {
        self.errors_time_parse.inc();
    }

    pub fn inc_logfmt_parse_error(&self) {
        self.errors_logfmt_parse.inc();
    }

    pub fn inc_unknown_heroku(&self) {
        self.errors_unknown_heroku.inc();
    }

    pub fn inc_unknown_user(&self) {
        self.errors_unknown_user.inc();
    }

    pub fn inc_points_success(&self, delivered: u64) {
        self.points_success.inc_by(delivered);
        self.poster_deliver_sizes.observe(delivered);
    }

    pub fn inc_points_failure(&self, failed: u64, elapsed_micros: u64) {
        self.points_failure.inc_by(failed);
        self.failure_time.observe(elapsed_micros);
    }

    pub fn observe_parse_time(&self, elapsed_micros: u64) {
        self.batches_parse_time.observe(elapsed_micros);
    }

    pub fn observe_batch_size(&self, lines: u64) {
        self.batches_sizes.observe(lines);
    }

    pub fn set_pending(&self, destination: &str, depth: u64) {
        self.pending.set(destination, depth);
    }

    /// Render the registry as Prometheus exposition format 0.0.4.
    pub fn render(&self) -> String {
        let mut body = String::with_capacity(2048);

        push_counter(&mut body, "lumbermill_batch_total", "Batches received", self.batch.get());
        push_counter(&mut body, "lumbermill_lines_total", "Lines parsed", self.lines.get());
        push_counter(&mut body, "lumbermill_lines_router_total", "Router lines", self.lines_router.get());
        push_counter(
            &mut body,
            "lumbermill_lines_router_error_total",
            "Router error lines",
            self.lines_router_error.get(),
        );
        push_counter(
            &mut body,
            "lumbermill_lines_router_blank_total",
            "Blank-app router lines",
            self.lines_router_blank.get(),
        );
        push_counter(&mut body, "lumbermill_lines_dyno_mem_total", "Dyno memory samples", self.lines_dyno_mem.get());
        push_counter(&mut body, "lumbermill_lines_dyno_load_total", "Dyno load samples", self.lines_dyno_load.get());
        push_counter(&mut body, "lumbermill_lines_dyno_error_total", "Dyno error lines", self.lines_dyno_error.get());

        body.push_str("# HELP lumbermill_lines_router_error_by_code_total Router error lines by code\n");
        body.push_str("# TYPE lumbermill_lines_router_error_by_code_total counter\n");
        for (code, count) in self.router_error_by_code.snapshot() {
            body.push_str(&format!(
                "lumbermill_lines_router_error_by_code_total{{code=\"{code}\"}} {count}\n"
            ));
        }

        push_counter(&mut body, "lumbermill_errors_dropped_total", "Points dropped on queue overflow", self.errors_dropped.get());
        push_counter(&mut body, "lumbermill_errors_auth_failure_total", "Auth failures", self.errors_auth_failure.get());
        push_counter(&mut body, "lumbermill_errors_badrequest_total", "Bad requests", self.errors_badrequest.get());
        push_counter(&mut body, "lumbermill_errors_token_missing_total", "Lines with no resolvable token", self.errors_token_missing.get());
        push_counter(&mut body, "lumbermill_errors_time_parse_total", "Timestamp parse failures", self.errors_time_parse.get());
        push_counter(&mut body, "lumbermill_errors_logfmt_parse_total", "Logfmt parse failures", self.errors_logfmt_parse.get());
        push_counter(&mut body, "lumbermill_errors_unknown_heroku_total", "Unrecognized dyno lines", self.errors_unknown_heroku.get());
        push_counter(&mut body, "lumbermill_errors_unknown_user_total", "Unrecognized user lines", self.errors_unknown_user.get());

        push_counter(&mut body, "lumbermill_points_success_total", "Points delivered successfully", self.points_success.get());
        push_counter(&mut body, "lumbermill_points_failure_total", "Points failed in flight", self.points_failure.get());

        push_timer(&mut body, "lumbermill_batches_parse_time_micros", "Batch parse time", &self.batches_parse_time);
        push_timer(&mut body, "lumbermill_failure_time_micros", "Sink failure latency", &self.failure_time);
        push_histogram(&mut body, "lumbermill_batches_sizes", "Lines per batch", &self.batches_sizes);
        push_histogram(&mut body, "lumbermill_poster_deliver_sizes", "Points per delivery", &self.poster_deliver_sizes);

        body.push_str("# HELP lumbermill_points_pending Pending queue depth per destination\n");
        body.push_str("# TYPE lumbermill_points_pending gauge\n");
        for (destination, depth) in self.pending.snapshot() {
            body.push_str(&format!(
                "lumbermill_points_pending{{destination=\"{destination}\"}} {depth}\n"
            ));
        }

        body
    }
}

fn push_counter(body: &mut String, name: &str, help: &str, value: u64) {
    body.push_str(&format!("# HELP {name} {help}\n"));
    body.push_str(&format!("# TYPE {name} counter\n"));
    body.push_str(&format!("{name} {value}\n"));
}

fn push_timer(body: &mut String, name: &str, help: &str, timer: &Timer) {
    body.push_str(&format!("# HELP {name} {help}\n"));
    body.push_str(&format!("# TYPE {name} summary\n"));
    body.push_str(&format!("{name}_count {}\n", timer.count()));
    body.push_str(&format!("{name}_sum {}\n", timer.sum()));
}

fn push_histogram(body: &mut String, name: &str, help: &str, histogram: &Histogram) {
    body.push_str(&format!("# HELP {name} {help}\n"));
    body.push_str(&format!("# TYPE {name} summary\n"));
    body.push_str(&format!("{name}_count {}\n", histogram.count()));
    body.push_str(&format!("{name}_sum {}\n", histogram.sum()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_zero_valued_counters() {
        let metrics = Metrics::new();
        let body = metrics.render();
        assert!(body.contains("lumbermill_batch_total 0"));
        assert!(body.contains("lumbermill_points_success_total 0"));
    }

    #[test]
    fn per_code_and_pending_gauges_show_up() {
        let metrics = Metrics::new();
        metrics.register_destination("primary");
        metrics.inc_lines_router_error("H12");
        metrics.inc_lines_router_error("H12");
        metrics.set_pending("primary", 42);

        let body = metrics.render();
        assert!(body.contains("code=\"H12\"} 2"));
        assert!(body.contains("destination=\"primary\"} 42"));
    }
}
