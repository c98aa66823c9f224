//! Lumbermill: a log-drain ingestion service. Accepts batched framed
//! records over authenticated HTTP, classifies them into typed points, and
//! fans them out through a consistent-hash ring to bounded, per-destination
//! delivery queues.

pub mod auth;
pub mod config;
pub mod destination;
pub mod error;
pub mod health;
pub mod ingress;
pub mod lifecycle;
pub mod metrics;
pub mod parser;
pub mod record;
pub mod ring;
pub mod router;
pub mod sink;
