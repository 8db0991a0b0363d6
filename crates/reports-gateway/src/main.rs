//! Reports Gateway
//!
//! Serves each authenticated caller their own device telemetry reports.

use reports_gateway::auth::{KeySetCache, KeySetConfig, TokenVerifier};
use reports_gateway::config::Config;
use reports_gateway::observability::init_metrics_recorder;
use reports_gateway::repositories::ClickHouseReportStore;
use reports_gateway::routes::{self, AppState};
use reports_gateway::services::ReportGateway;
use reports_gateway::tls::install_crypto_provider;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reports_gateway=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Reports Gateway");

    // Must precede every TLS client (JWKS fetcher, ClickHouse)
    install_crypto_provider();

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        jwks_url = %config.jwks_url(),
        clickhouse_url = %config.clickhouse_url,
        store_failure_policy = ?config.store_failure_policy,
        jwt_clock_skew_seconds = config.jwt_clock_skew_seconds,
        expected_issuer = ?config.expected_issuer,
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    // Tokens cannot be verified without keys, so an unreachable identity
    // provider at startup is fatal
    let key_set = KeySetCache::init(KeySetConfig::from_config(&config))
        .await
        .map_err(|e| {
            error!("Failed to load signing keys: {}", e);
            e
        })?;

    let cancel_token = CancellationToken::new();
    let refresh_task = key_set.spawn_refresh_task(cancel_token.clone());

    // Config validation bounds the skew to 1..=600 seconds
    let clock_skew = Duration::from_secs(config.jwt_clock_skew_seconds.unsigned_abs());
    let verifier = Arc::new(TokenVerifier::new(
        key_set,
        clock_skew,
        config.expected_issuer.clone(),
    ));

    let store = Arc::new(ClickHouseReportStore::from_config(&config));
    let gateway = Arc::new(ReportGateway::new(store, config.store_failure_policy));

    let bind_address = config.bind_address.clone();

    let state = Arc::new(AppState {
        verifier,
        gateway,
    });

    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Reports Gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the key set refresh task
    cancel_token.cancel();
    if let Err(e) = refresh_task.await {
        error!("Key set refresh task ended abnormally: {}", e);
    }

    info!("Reports Gateway shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
