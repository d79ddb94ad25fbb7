//! # Skynet Accounts API Server
//!
//! Startup order: configuration, database pool, schema (indexes are created
//! when missing; any failure aborts startup), billing client, HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p skyaccounts-api
//! ```

use skyaccounts_api::{
    app::{build_router, AppState},
    config::Config,
};
use skyaccounts_shared::billing::stripe::StripeClient;
use skyaccounts_shared::db::{pool, schema};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "skyaccounts_api=debug,skyaccounts_shared=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Skynet Accounts API Server v{} starting...",
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::from_env()?;
    let catalog = config.plan_catalog()?;
    tracing::info!(plans = catalog.len(), "Loaded plan catalog");

    let db = pool::create_pool(pool::DatabaseConfig {
        url: config.connection_descriptor().connection_url()?,
        max_connections: config.database.max_connections,
        ..Default::default()
    })
    .await?;

    schema::ensure_schema(&db, &schema::default_schema()).await?;

    let billing = StripeClient::new(
        config.stripe.api_key.clone(),
        config.stripe.api_base.clone(),
        config.request_timeout(),
    )?;

    let bind_address = config.bind_address();
    let state = AppState::new(db.clone(), config, catalog, Arc::new(billing));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!("Server listening on http://{}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown signal received, exiting...");
    pool::close_pool(db).await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
