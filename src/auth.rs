//! Auth adapter: wraps a handler so a rejecting authenticator short
//! circuits to 401 before the handler runs.

use crate::config::CredStore;
use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;

/// Decides whether a request may proceed.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, headers: &axum::http::HeaderMap) -> bool;
}

/// Used for `/drain` when `CRED_STORE` is empty and for test/probe routes.
pub struct AllowAll;

impl Authenticator for AllowAll {
    fn authenticate(&self, _headers: &axum::http::HeaderMap) -> bool {
        true
    }
}

/// HTTP Basic auth backed by a [`CredStore`]. Multiple passwords per user
/// are permitted; any match admits the request.
pub struct BasicAuth {
    store: CredStore,
}

impl BasicAuth {
    pub fn new(store: CredStore) -> Self {
        Self { store }
    }
}

impl Authenticator for BasicAuth {
    fn authenticate(&self, headers: &axum::http::HeaderMap) -> bool {
        let Some(value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
            return false;
        };
        let Some(encoded) = value.strip_prefix("Basic ") else {
            return false;
        };
        let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };
        let Some((user, pass)) = decoded.split_once(':') else {
            return false;
        };
        self.store.admits(user, pass)
    }
}

/// Builds an `axum::middleware::from_fn`-compatible layer wrapping
/// `next.run` with the given authenticator's decision.
pub async fn require_auth(
    authenticator: &(dyn Authenticator + Send + Sync),
    request: Request,
    next: Next,
) -> Response {
    if !authenticator.authenticate(request.headers()) {
        return (StatusCode::UNAUTHORIZED, "authentication required").into_response();
    }
    next.run(request).await
}
