//! The `/drain` handler: authenticate, tokenize the framed batch,
//! classify each record, route through the ring, and publish to the
//! resolved destination's queue.

use crate::destination::Destination;
use crate::health::RecentTokenMap;
use crate::lifecycle::Lifecycle;
use crate::metrics::Metrics;
use crate::parser::{self, framing};
use crate::record::SeriesKind;
use crate::ring::Ring;
use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::Receiver;
use tokio::sync::Mutex;

const DRAIN_TOKEN_HEADER: &str = "logplex-drain-token";

/// Everything the `/drain` handler needs, shared across requests.
pub struct IngressState {
    pub ring: Ring,
    pub destinations: HashMap<String, Arc<Destination>>,
    pub metrics: Arc<Metrics>,
    pub recent_tokens: Arc<RecentTokenMap>,
    pub lifecycle: Arc<Lifecycle>,
    pub recycle_rx: Mutex<Receiver<()>>,
    pub debug: bool,
}

pub async fn drain(
    state: Arc<IngressState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let _guard = state.lifecycle.enter();

    let header_token = headers
        .get(DRAIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let mut current_token = header_token;

    let started = Instant::now();
    let frames = framing::tokenize(&body);

    let mut lines = 0u64;
    let mut touched: Vec<String> = Vec::new();

    for frame in frames {
        let record = match frame {
            Ok(record) => record,
            Err(_) => {
                state.metrics.inc_badrequest();
                continue;
            }
        };
        lines += 1;
        state.metrics.inc_lines(1);

        let point = match parser::parse_line(&record, &mut current_token, &state.metrics, state.debug) {
            Some(point) => point,
            None => continue,
        };

        match point.kind {
            SeriesKind::RouterRequest => state.metrics.inc_lines_router(),
            SeriesKind::DynoMem => state.metrics.inc_lines_dyno_mem(),
            SeriesKind::DynoLoad => state.metrics.inc_lines_dyno_load(),
            SeriesKind::DynoEvent => state.metrics.inc_lines_dyno_error(),
            SeriesKind::RouterError => {}
        }

        let Some(destination_name) = state.ring.get(&point.token) else {
            continue;
        };
        let destination_name = destination_name.to_string();

        if matches!(point.kind, SeriesKind::DynoMem | SeriesKind::DynoLoad) {
            state.recent_tokens.try_update(&destination_name, &point.token);
        }

        if let Some(destination) = state.destinations.get(&destination_name) {
            destination.post_point(point);
            if !touched.contains(&destination_name) {
                touched.push(destination_name);
            }
        }
    }

    state.metrics.inc_batch();
    state.metrics.observe_batch_size(lines);
    state
        .metrics
        .observe_parse_time(started.elapsed().as_micros() as u64);

    tracing::info!(
        lines,
        destinations = touched.join(","),
        elapsed_us = started.elapsed().as_micros() as u64,
        "drain batch processed"
    );

    let mut response = StatusCode::NO_CONTENT.into_response();
    response
        .headers_mut()
        .insert(axum::http::header::CONTENT_LENGTH, HeaderValue::from_static("0"));

    let should_close = state.lifecycle.is_shutting_down() || state.recycle_rx.lock().await.try_recv().is_ok();
    if should_close {
        response
            .headers_mut()
            .insert(axum::http::header::CONNECTION, HeaderValue::from_static("close"));
    }

    response
}
