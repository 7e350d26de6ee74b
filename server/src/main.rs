use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clinical_records::app::{cors_layer, router, AppState};
use clinical_records::auth::HmacTokenAuthority;
use clinical_records::config::AppConfig;
use clinical_records::db::{schema, Gateway};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const RECHECK_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,sqlx=warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    tracing::info!(
        db_host = %config.database.host,
        db_name = %config.database.database,
        max_connections = config.database.max_connections,
        "configuration loaded"
    );

    let gateway = Arc::new(Gateway::connect_lazy(&config.database).context("invalid database settings")?);

    // Serve even when the database is down; health reports it and requests get 503
    match gateway.await_ready().await {
        Ok(()) => bootstrap_schema(&gateway, config.database.apply_schema).await,
        Err(e) => {
            tracing::warn!(error = %e, "starting without a database, will keep checking");
            let gateway = gateway.clone();
            let apply_schema = config.database.apply_schema;
            tokio::spawn(async move {
                while !gateway.ping().await {
                    tokio::time::sleep(RECHECK_INTERVAL).await;
                }
                bootstrap_schema(&gateway, apply_schema).await;
            });
        }
    }

    let tokens = Arc::new(HmacTokenAuthority::from_config(&config.auth));
    let state = Arc::new(AppState::new(gateway.clone(), tokens));
    let app = router(state, cors_layer(config.server.client_origin.as_deref()));

    let address = config.server.bind_address()?;
    let listener = tokio::net::TcpListener::bind(address).await?;
    tracing::info!("✓ Clinical records API listening on http://{}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    gateway.close().await;
    Ok(())
}

async fn bootstrap_schema(gateway: &Gateway, apply: bool) {
    if !apply {
        return;
    }
    if let Err(e) = schema::apply(gateway).await {
        tracing::error!(error = %e, "schema bootstrap failed");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining requests");
}
