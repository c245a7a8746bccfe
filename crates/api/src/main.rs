//! SCOS API server binary entrypoint.
//!
//! Wires the price table, position store and vault submitter into the position
//! service, starts the liquidation monitor (and the optional price drift) in the
//! background, and serves the HTTP API until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use scos_chain::VaultSubmitter;
use scos_common::config::AppConfig;
use scos_common::db::create_pool;
use scos_engine::audit::{AuditLog, PgAuditLog, TracingAuditLog};
use scos_engine::collateral::CollateralParams;
use scos_engine::drift::PriceDrift;
use scos_engine::monitor::LiquidationMonitor;
use scos_engine::persistence::PgPositionRepository;
use scos_engine::position_store::PositionStore;
use scos_engine::price_table::PriceTable;
use scos_engine::service::PositionService;
use scos_engine::submission::Submitter;

use scos_api::routes::create_router;
use scos_api::state::AppState;

const DEFAULT_LOG_FILTER: &str =
    "scos_api=debug,scos_engine=debug,scos_chain=info,tower_http=debug";
const MAX_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    tracing::info!("Starting SCOS API server...");

    // Load configuration
    let config = AppConfig::from_env()?;

    let prices = Arc::new(PriceTable::with_prices(config.seed_prices.clone())?);
    tracing::info!(symbols = config.seed_prices.len(), "Price table seeded");

    let pool = match &config.database_url {
        Some(url) => Some(create_pool(url, config.db_max_connections).await?),
        None => None,
    };

    let (positions, audit): (Arc<PositionStore>, Arc<dyn AuditLog>) = match pool {
        Some(pool) => {
            let repository = PgPositionRepository::new(pool.clone());
            let existing = repository.load().await?;
            let restored = existing.iter().filter(|p| p.is_active()).count();
            let store = PositionStore::persistent(Arc::new(repository), existing)?;
            tracing::info!(active = restored, "Positions restored from database");
            (Arc::new(store), Arc::new(PgAuditLog::new(pool)))
        }
        None => {
            tracing::warn!(
                "DATABASE_URL not set; positions are in memory only and audit records are logged"
            );
            (Arc::new(PositionStore::new()), Arc::new(TracingAuditLog))
        }
    };

    let vault = VaultSubmitter::from_config(&config)?;
    tracing::info!(signer = %vault.signer_address(), "Vault signer loaded");
    let submitter: Arc<dyn Submitter> = Arc::new(vault);

    let params = CollateralParams {
        collateral_ratio: config.collateral_ratio,
        drop_threshold: config.liquidation_drop_threshold,
    };

    let service = Arc::new(PositionService::new(
        prices.clone(),
        positions.clone(),
        submitter.clone(),
        audit.clone(),
        params,
        config.submission_timeout(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut background = Vec::new();

    let monitor = LiquidationMonitor::new(
        prices.clone(),
        positions,
        submitter,
        audit,
        params,
        config.monitor_interval(),
        config.submission_timeout(),
    );
    let rx = shutdown_rx.clone();
    background.push(tokio::spawn(async move { monitor.run(rx).await }));

    if let Some(drift) = &config.price_drift {
        let drift = PriceDrift::new(
            prices.clone(),
            drift.symbol.clone(),
            drift.delta,
            std::time::Duration::from_secs(drift.period_secs),
        );
        let rx = shutdown_rx.clone();
        background.push(tokio::spawn(async move { drift.run(rx).await }));
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    // Build router
    let app = create_router(AppState::new(service, config)).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .map_response(|res: axum::response::Response<_>| res.map(axum::body::Body::new))
            .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES)),
    );

    // Start server
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    for handle in background {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Background task panicked");
        }
    }

    tracing::info!("SCOS API server stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    if std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
