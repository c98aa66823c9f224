//! Router composition: wires `/drain`, `/health`, `/health/sink`,
//! `/target/:id` and `/metrics` onto one shared [`AppState`].
//!
//! `/drain` and `/target/:id` share the drain authenticator (the original
//! wraps both the same way); `/metrics` uses its own. Both are applied as
//! `axum::middleware::from_fn_with_state` layers over [`auth::require_auth`]
//! rather than inline checks in each handler, so the 401 short-circuit
//! lives in one place.

use crate::auth::{self, Authenticator};
use crate::health::SinkHealth;
use crate::ingress::{self, IngressState};
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use std::sync::Arc;

pub struct AppState {
    pub ingress: Arc<IngressState>,
    pub sink_health: Arc<SinkHealth>,
    pub drain_auth: Arc<dyn Authenticator>,
    pub metrics_auth: Arc<dyn Authenticator>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let drain_guarded = Router::new()
        .route("/drain", post(drain_handler))
        .route("/target/:id", get(target_handler))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), drain_auth_layer));

    let metrics_guarded = Router::new()
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), metrics_auth_layer));

    let open = Router::new()
        .route("/health", get(health_handler))
        .route("/health/sink", get(health_sink_handler));

    Router::new()
        .merge(drain_guarded)
        .merge(metrics_guarded)
        .merge(open)
        .with_state(state)
}

async fn drain_auth_layer(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    auth::require_auth(state.drain_auth.as_ref(), request, next).await
}

async fn metrics_auth_layer(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    auth::require_auth(state.metrics_auth.as_ref(), request, next).await
}

async fn drain_handler(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    ingress::drain(Arc::clone(&state.ingress), headers, body).await
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    if crate::health::is_alive(&state.ingress.lifecycle) {
        StatusCode::OK.into_response()
    } else {
        StatusCode::SERVICE_UNAVAILABLE.into_response()
    }
}

async fn health_sink_handler(State(state): State<Arc<AppState>>) -> Response {
    let errors = state.sink_health.check().await;
    if errors.is_empty() {
        StatusCode::OK.into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, errors.join("\n")).into_response()
    }
}

async fn target_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    if id.is_empty() {
        return (StatusCode::BAD_REQUEST, "id must not be empty").into_response();
    }
    if state.ingress.ring.is_empty() {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    match state.ingress.ring.get(&id) {
        Some(host) => Json(json!({ "host": host })).into_response(),
        None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    state.ingress.metrics.render().into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AllowAll, BasicAuth};
    use crate::config::CredStore;
    use crate::health::RecentTokenMap;
    use crate::lifecycle::Lifecycle;
    use crate::metrics::Metrics;
    use crate::ring::Ring;
    use crate::sink::NullSink;
    use axum::body::Body;
    use axum::http::Request;
    use std::collections::HashMap;
    use tower::ServiceExt;

    fn test_app() -> Router {
        test_app_with_auth(Arc::new(AllowAll), Arc::new(AllowAll))
    }

    fn test_app_with_auth(drain_auth: Arc<dyn Authenticator>, metrics_auth: Arc<dyn Authenticator>) -> Router {
        let metrics = Arc::new(Metrics::new());
        let destination = crate::destination::Destination::new("null", 1024, Arc::clone(&metrics));
        let mut destinations = HashMap::new();
        destinations.insert("null".to_string(), Arc::clone(&destination));
        let (_tx, rx) = tokio::sync::mpsc::channel(1);

        let ingress = Arc::new(IngressState {
            ring: Ring::build(&["null".to_string()]),
            destinations,
            metrics: Arc::clone(&metrics),
            recent_tokens: Arc::new(RecentTokenMap::new()),
            lifecycle: Lifecycle::new(),
            recycle_rx: tokio::sync::Mutex::new(rx),
            debug: false,
        });
        let mut sinks: HashMap<String, Arc<dyn crate::sink::Sink>> = HashMap::new();
        sinks.insert("null".to_string(), Arc::new(NullSink::default()));
        let sink_health = Arc::new(SinkHealth::new(Arc::clone(&ingress.recent_tokens), sinks));

        let state = Arc::new(AppState {
            ingress,
            sink_health,
            drain_auth,
            metrics_auth,
        });
        build_router(state)
    }

    #[tokio::test]
    async fn health_is_ok_when_running() {
        let app = test_app();
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn target_lookup_rejects_empty_id() {
        let app = test_app();
        let response = app
            .oneshot(Request::get("/target/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_ne!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn target_lookup_resolves_a_configured_destination() {
        let app = test_app();
        let response = app
            .oneshot(Request::get("/target/t.abc").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn target_lookup_rejects_unauthenticated_request() {
        let store = CredStore::parse("alice:secret").unwrap();
        let app = test_app_with_auth(Arc::new(BasicAuth::new(store)), Arc::new(AllowAll));
        let response = app
            .oneshot(Request::get("/target/t.abc").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn non_post_drain_is_method_not_allowed() {
        let app = test_app();
        let response = app
            .oneshot(Request::get("/drain").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_prometheus_text() {
        let app = test_app();
        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
