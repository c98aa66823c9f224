//! Error types used at the two boundaries the core cares about: boot-time
//! configuration failures (fatal, non-zero exit) and per-delivery sink
//! failures (non-fatal, surfaced only through metrics).

use thiserror::Error;

/// Errors that can escape the core.
///
/// `Config` errors are raised while parsing/validating `AppConfig` or
/// `CRED_STORE` and are always fatal — `main` propagates them with `?` and
/// the process exits non-zero before a listener is ever bound.
///
/// `Sink` errors are raised by a [`crate::sink::Sink`] implementation during
/// delivery. Workers never propagate them past `deliver()`; they are turned
/// into a `points.failure` counter increment instead, since one
/// destination's outage shouldn't take the whole process down.
#[derive(Debug, Error)]
pub enum LumbermillError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("sink error: {0}")]
    Sink(String),
}
