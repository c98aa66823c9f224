//! The typed point model: series kinds, their fixed column schemas, and the
//! `Point` that flows from the line parser to a sink worker.

use std::fmt;

/// One of the five record shapes the parser recognizes. Each kind owns an
/// immutable column list; the first column is always the timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeriesKind {
    RouterRequest,
    RouterError,
    DynoMem,
    DynoLoad,
    DynoEvent,
}

impl SeriesKind {
    /// Stable name used as the `<kind>` half of a series name and in metric
    /// namespacing (`lines.router`, `lines.dyno.mem`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            SeriesKind::RouterRequest => "router_request",
            SeriesKind::RouterError => "router_error",
            SeriesKind::DynoMem => "dyno_mem",
            SeriesKind::DynoLoad => "dyno_load",
            SeriesKind::DynoEvent => "dyno_event",
        }
    }

    /// Fixed, ordered column schema for this kind. `Point::values` always
    /// has the same length as this slice.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            SeriesKind::RouterRequest => &["timestamp", "status", "service"],
            SeriesKind::RouterError => &["timestamp", "code"],
            SeriesKind::DynoMem => &[
                "timestamp",
                "source",
                "memory_cache",
                "memory_pgpgin",
                "memory_pgpgout",
                "memory_rss",
                "memory_swap",
                "memory_total",
                "dyno_type",
            ],
            SeriesKind::DynoLoad => &[
                "timestamp",
                "source",
                "load_avg_1m",
                "load_avg_5m",
                "load_avg_15m",
                "dyno_type",
            ],
            SeriesKind::DynoEvent => &[
                "timestamp",
                "procid",
                "event_class",
                "code",
                "message",
                "dyno_type",
            ],
        }
    }
}

/// A single value in a `Point`'s column tuple.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I64(i64),
    F64(f64),
    Str(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I64(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
        }
    }
}

/// One parsed record, ready for delivery. Created per accepted line,
/// consumed once by exactly one worker, then dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub token: String,
    pub kind: SeriesKind,
    pub values: Vec<Value>,
}

impl Point {
    pub fn new(token: impl Into<String>, kind: SeriesKind, values: Vec<Value>) -> Self {
        debug_assert_eq!(values.len(), kind.columns().len());
        Self {
            token: token.into(),
            kind,
            values,
        }
    }

    /// `<kind>.<token>`, the per-tenant stream identifier at the sink.
    pub fn series_name(&self) -> String {
        format!("{}.{}", self.kind.name(), self.token)
    }

    /// Microsecond timestamp, always column 0 by construction.
    pub fn timestamp_micros(&self) -> i64 {
        match self.values.first() {
            Some(Value::I64(ts)) => *ts,
            _ => 0,
        }
    }
}
