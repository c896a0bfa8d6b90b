//! Mail Worker Service
//!
//! Consumes the `mail` queue and delivers each job through the configured
//! provider.
//!
//! ## Architecture
//!
//! ```text
//! Redis (courier:{mail}:*)
//!   ↓ lease (Lua, atomic)
//! Worker<MailPayload, MailJobHandler> × MAIL_WORKER_CONCURRENCY
//!   ↓
//! MailProvider (SMTP | Resend)
//!   ↓ complete / fail (retry with backoff, terminal after max attempts)
//! Redis
//! ```
//!
//! ## Features
//!
//! - Expired leases reclaimed, so a crashed worker never strands a job
//! - Graceful shutdown on SIGINT/SIGTERM, in-flight dispatches are drained
//! - Health, readiness, queue stats and Prometheus metrics over HTTP

use core_config::{ConfigError, Environment, FromEnv, env_optional, redis::RedisConfig};
use domain_mail::{MailJobHandler, MailPayload, MailProvider, MailQueue, provider_from_env};
use eyre::{Result, WrapErr};
use job_queue::{
    HealthState, JobHandler, QueueConfig, RedisJobStore, Worker, WorkerConfig,
    connect_with_retry, health_router, init_metrics,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

const DEFAULT_HEALTH_PORT: u16 = 8083;

/// `MAIL_WORKER_HEALTH_PORT`, then `HEALTH_PORT`, then 8083.
fn health_port() -> Result<u16, ConfigError> {
    let Some((key, raw)) = env_optional("MAIL_WORKER_HEALTH_PORT")
        .map(|v| ("MAIL_WORKER_HEALTH_PORT", v))
        .or_else(|| env_optional("HEALTH_PORT").map(|v| ("HEALTH_PORT", v)))
    else {
        return Ok(DEFAULT_HEALTH_PORT);
    };

    raw.trim().parse::<u16>().map_err(|e| ConfigError::ParseError {
        key: key.to_string(),
        details: e.to_string(),
    })
}

/// Start the health HTTP server
///
/// - Liveness probes: `/health`, `/healthz`
/// - Readiness probes: `/ready`, `/readyz`
/// - Queue depth: `/queue/stats`
/// - Prometheus metrics: `/metrics`
async fn start_health_server(health_state: HealthState, port: u16) -> Result<()> {
    let app = health_router(health_state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", addr))?;

    info!(port = %port, "Health server listening");

    axum::serve(listener, app)
        .await
        .wrap_err("Health server failed")?;

    Ok(())
}

/// Run the mail worker
///
/// 1. Sets up structured logging and the metrics recorder
/// 2. Connects to Redis with retry
/// 3. Builds the provider selected by `MAIL_PROVIDER`
/// 4. Runs the worker pool until SIGINT/SIGTERM, then drains it
///
/// # Errors
///
/// Returns an error if configuration is invalid, Redis stays unreachable, the
/// provider cannot be built or a worker loop fails.
pub async fn run() -> Result<()> {
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);
    init_metrics().wrap_err("Failed to install metrics recorder")?;

    let app_name = env!("CARGO_PKG_NAME");
    let app_version = env!("CARGO_PKG_VERSION");
    info!(name = %app_name, version = %app_version, environment = ?environment, "Starting mail worker");

    let health_port = health_port().wrap_err("Invalid health port")?;

    let queue_config = QueueConfig::from_queue_def::<MailQueue>()
        .with_env_overrides("MAIL")
        .wrap_err("Failed to load queue configuration")?;
    let worker_config = WorkerConfig::new()
        .with_env_overrides("MAIL")
        .wrap_err("Failed to load worker configuration")?;
    worker_config
        .validate(queue_config.lease_ttl)
        .wrap_err("Invalid worker configuration")?;

    info!(
        queue = %queue_config.name,
        key_prefix = %queue_config.key_prefix,
        lease_ttl_ms = queue_config.lease_ttl.as_millis() as u64,
        backoff = ?queue_config.backoff,
        concurrency = worker_config.concurrency,
        dispatch_timeout_ms = worker_config.dispatch_timeout.as_millis() as u64,
        "Worker configuration loaded"
    );

    let redis_config = RedisConfig::from_env().wrap_err("Failed to load Redis configuration")?;
    let redis = connect_with_retry(&redis_config.uri, redis_config.connect_retries)
        .await
        .wrap_err("Failed to connect to Redis")?;

    let provider = provider_from_env().wrap_err("Failed to build mail provider")?;
    let provider_name = provider.name();
    let handler = Arc::new(MailJobHandler::new(provider));
    match handler.health_check().await {
        Ok(true) => info!(provider = provider_name, "Mail provider ready"),
        Ok(false) => warn!(provider = provider_name, "Mail provider reports unhealthy"),
        Err(e) => warn!(provider = provider_name, error = %e, "Mail provider health check failed"),
    }

    let store = Arc::new(RedisJobStore::<MailPayload>::new(redis, queue_config.clone()));
    let worker = Worker::new(store.clone(), handler, queue_config.name.clone(), worker_config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        let _ = shutdown_tx.send(true);
    });

    let health_state = HealthState::new(store, app_name, app_version);
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state, health_port).await {
            error!(error = %e, "Health server failed");
        }
    });

    let mut pool = worker.spawn_pool(shutdown_rx);
    let mut failures = 0usize;
    while let Some(joined) = pool.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failures += 1;
                error!(error = %e, "Worker loop failed");
            }
            Err(e) => {
                failures += 1;
                error!(error = %e, "Worker task aborted");
            }
        }
    }

    if failures > 0 {
        return Err(eyre::eyre!("{} worker loop(s) exited with an error", failures));
    }

    info!("Mail worker stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install SIGTERM handler")?;

        tokio::select! {
            result = ctrl_c => {
                result.wrap_err("Failed to listen for Ctrl+C")?;
                info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, initiating shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.wrap_err("Failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C, initiating shutdown...");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_port_precedence() {
        temp_env::with_vars(
            [("MAIL_WORKER_HEALTH_PORT", Some("9100")), ("HEALTH_PORT", Some("9200"))],
            || assert_eq!(health_port().unwrap(), 9100),
        );
        temp_env::with_vars(
            [("MAIL_WORKER_HEALTH_PORT", None), ("HEALTH_PORT", Some("9200"))],
            || assert_eq!(health_port().unwrap(), 9200),
        );
        temp_env::with_vars_unset(["MAIL_WORKER_HEALTH_PORT", "HEALTH_PORT"], || {
            assert_eq!(health_port().unwrap(), DEFAULT_HEALTH_PORT)
        });
    }

    #[test]
    fn test_health_port_rejects_garbage() {
        temp_env::with_var("MAIL_WORKER_HEALTH_PORT", Some("http"), || {
            let err = health_port().unwrap_err();
            assert!(err.to_string().contains("MAIL_WORKER_HEALTH_PORT"));
        });
    }

    #[test]
    fn test_default_configuration_is_valid() {
        let vars: [(&str, Option<&str>); 4] = [
            ("MAIL_LEASE_TTL_MS", None),
            ("MAIL_DISPATCH_TIMEOUT_MS", None),
            ("MAIL_BACKOFF", None),
            ("MAIL_WORKER_CONCURRENCY", None),
        ];
        temp_env::with_vars(vars, || {
            let queue = QueueConfig::from_queue_def::<MailQueue>()
                .with_env_overrides("MAIL")
                .unwrap();
            let worker = WorkerConfig::new().with_env_overrides("MAIL").unwrap();
            assert_eq!(queue.name, "mail");
            assert_eq!(queue.key_prefix, "courier:{mail}");
            assert!(worker.validate(queue.lease_ttl).is_ok());
        });
    }
}
