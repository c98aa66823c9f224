//! Binary entry point: load configuration, wire the destinations and
//! sinks, bind the HTTP listener, and supervise the long-running tasks
//! (server, pending-depth sampler, connection recycler) through a
//! `JoinSet`, shutting down cooperatively on SIGINT/SIGTERM.

use anyhow::{Context, Result};
use lumbermill::auth::{AllowAll, Authenticator, BasicAuth};
use lumbermill::config::{AppConfig, CredStore};
use lumbermill::destination::{Destination, Worker};
use lumbermill::health::{RecentTokenMap, SinkHealth};
use lumbermill::ingress::IngressState;
use lumbermill::lifecycle::{self, Lifecycle};
use lumbermill::metrics::Metrics;
use lumbermill::ring::Ring;
use lumbermill::router::{build_router, AppState};
use lumbermill::sink::{FanoutSink, HttpSink, NullSink, RetryPolicy, Sink};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info};

#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    PendingSampler,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::HttpServer => write!(f, "HttpServer"),
            TaskName::PendingSampler => write!(f, "PendingSampler"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = match AppConfig::parse_and_validate() {
        Ok(config) => config,
        Err(err) => {
            error!("configuration error: {err}");
            std::process::exit(1);
        }
    };

    info!(
        port = config.port,
        destinations = config.destination_names().join(","),
        workers_per_destination = config.workers_per_destination,
        queue_capacity = config.queue_capacity,
        secondary_sink = !config.secondary_sink_host.trim().is_empty(),
        "starting lumbermill"
    );

    let metrics = Arc::new(Metrics::new());
    let lifecycle = Lifecycle::new();

    let destination_names = config.destination_names();
    let ring = Ring::build(&destination_names);

    let mut destinations: HashMap<String, Arc<Destination>> = HashMap::new();
    let mut sinks: HashMap<String, Arc<dyn Sink>> = HashMap::new();
    let mut worker_handles = Vec::new();

    for name in &destination_names {
        let destination = Destination::new(name.clone(), config.queue_capacity, Arc::clone(&metrics));
        let sink: Arc<dyn Sink> = build_sink(&config, name);

        for _ in 0..config.workers_per_destination {
            let worker = Worker::new(Arc::clone(&destination), Arc::clone(&sink), Arc::clone(&metrics));
            worker_handles.push(tokio::spawn(worker.run()));
        }

        destinations.insert(name.clone(), destination);
        sinks.insert(name.clone(), sink);
    }

    let recent_tokens = Arc::new(RecentTokenMap::new());
    let sink_health = Arc::new(SinkHealth::new(Arc::clone(&recent_tokens), sinks));

    let (recycle_rx, recycler_handle) = lifecycle::spawn_recycler(
        Arc::clone(&lifecycle),
        Duration::from_secs(config.recycle_interval_secs),
    );

    let ingress = Arc::new(IngressState {
        ring,
        destinations: destinations.clone(),
        metrics: Arc::clone(&metrics),
        recent_tokens,
        lifecycle: Arc::clone(&lifecycle),
        recycle_rx: tokio::sync::Mutex::new(recycle_rx),
        debug: config.debug,
    });

    let drain_auth: Arc<dyn Authenticator> = match CredStore::parse(&config.cred_store)? {
        store if store.is_empty() => Arc::new(AllowAll),
        store => Arc::new(BasicAuth::new(store)),
    };
    let metrics_auth: Arc<dyn Authenticator> = if config.metrics_user.is_empty() {
        Arc::new(AllowAll)
    } else {
        let store = CredStore::parse(&format!("{}:{}", config.metrics_user, config.metrics_password))?;
        Arc::new(BasicAuth::new(store))
    };

    let app_state = Arc::new(AppState {
        ingress: Arc::clone(&ingress),
        sink_health,
        drain_auth,
        metrics_auth,
    });
    let app = build_router(app_state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    info!("listening on 0.0.0.0:{}", config.port);

    let mut tasks: JoinSet<Result<TaskName>> = JoinSet::new();

    let server_token = lifecycle.cancellation();
    tasks.spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                server_token.cancelled().await;
            })
            .await
            .context("HTTP server error")?;
        Ok(TaskName::HttpServer)
    });

    let sampler_token = lifecycle.cancellation();
    let sampler_destinations = destinations.clone();
    tasks.spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(10));
        loop {
            tokio::select! {
                _ = sampler_token.cancelled() => return Ok(TaskName::PendingSampler),
                _ = ticker.tick() => {
                    for destination in sampler_destinations.values() {
                        destination.sample_pending_gauge();
                    }
                }
            }
        }
    });

    let shutdown_token = lifecycle.cancellation();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        #[cfg(unix)]
        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate.recv() => {}
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("shutdown signal received");
        shutdown_token.cancel();
    });

    loop {
        let cancellation = lifecycle.cancellation();
        tokio::select! {
            _ = cancellation.cancelled() => {
                info!("supervisor: shutdown signal received");
                break;
            }
            result = tasks.join_next() => {
                match result {
                    Some(Ok(Ok(name))) => info!("supervisor: task {name} completed normally"),
                    Some(Ok(Err(err))) => {
                        error!("supervisor: task failed: {err}");
                        lifecycle.begin_shutdown();
                        return Err(err);
                    }
                    Some(Err(err)) => {
                        error!("supervisor: task panicked: {err}");
                        lifecycle.begin_shutdown();
                        return Err(anyhow::anyhow!("task panicked: {err}"));
                    }
                    None => {
                        info!("supervisor: all tasks completed");
                        break;
                    }
                }
            }
        }
    }

    lifecycle.begin_shutdown();
    info!("draining in-flight requests");
    lifecycle.wait_drained().await;

    for destination in destinations.values() {
        destination.close().await;
    }
    for handle in worker_handles {
        let _ = handle.await;
    }
    recycler_handle.abort();

    lifecycle.mark_stopped();
    info!("lumbermill shutdown complete");
    Ok(())
}

fn build_sink(config: &AppConfig, destination_name: &str) -> Arc<dyn Sink> {
    if config.sink_hosts.trim().is_empty() {
        return Arc::new(NullSink::default());
    }
    let scheme = if config.sink_insecure { "http" } else { "https" };
    let base_url = format!("{scheme}://{destination_name}");

    let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(20));
    if config.sink_skip_verify {
        builder = builder.danger_accept_invalid_certs(true);
    }
    let client = builder.build().unwrap_or_default();

    let primary: Arc<dyn Sink> = Arc::new(HttpSink::new(base_url, client.clone(), RetryPolicy::None));

    let secondary_host = config.secondary_sink_host.trim();
    if secondary_host.is_empty() {
        return primary;
    }
    let secondary = Arc::new(HttpSink::new(secondary_host.to_string(), client, RetryPolicy::backoff_poster()));
    Arc::new(FanoutSink::new(primary, secondary))
}
