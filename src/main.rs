mod api;
mod config;
mod database;
mod divvyd;
mod error;
mod logging;
mod services;

use crate::api::AppState;
use crate::config::AppConfig;
use crate::database::{MemoryRecordStore, PgRecordStore, RecordStore};
use crate::divvyd::monitor::ConnectionMonitor;
use crate::divvyd::ws::WsTransport;
use crate::divvyd::{HeartbeatWorker, NodeClient, NodeConnection};
use crate::logging::init_tracing;
use crate::services::{ConfirmationRouter, PaymentService};
use dotenv::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = AppConfig::from_env()?;
    config.validate()?;
    init_tracing(&config.logging);

    let store: Arc<dyn RecordStore> = match &config.database.url {
        Some(url) => {
            let pool = database::init_pool(
                url,
                config.database.max_connections,
                config.database.connect_timeout(),
            )
            .await?;
            let store = PgRecordStore::new(pool);
            store.ensure_schema().await?;
            info!("submission records backed by postgres");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set, submission records will not survive a restart");
            Arc::new(MemoryRecordStore::new())
        }
    };

    let (transport, inbound) = WsTransport::connect(&config.divvyd.ws_url).await?;
    let connection = NodeConnection::start(
        Arc::new(transport),
        inbound,
        config.divvyd.ws_url.clone(),
        config.divvyd.standalone,
    );
    let client = NodeClient::new(Arc::clone(&connection), config.divvyd.request_timeout());
    client.subscribe_streams().await?;

    let monitor = Arc::new(ConnectionMonitor::new(
        Arc::clone(&connection),
        client.clone(),
    ));
    let router = ConfirmationRouter::new();
    tokio::spawn(router.clone().run(connection.subscribe_events()));

    let payments = Arc::new(PaymentService::new(
        client.clone(),
        Arc::clone(&monitor),
        router,
        store,
        config.divvyd.ledger_horizon,
        config.divvyd.validation_timeout(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let heartbeat = HeartbeatWorker::new(client.clone(), config.divvyd.heartbeat_interval());
    let heartbeat_handle = tokio::spawn(heartbeat.run(shutdown_rx));

    let app = api::router(AppState {
        client,
        monitor,
        payments,
    })
    .layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id()),
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "divvy-rest listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = heartbeat_handle.await;
    info!("divvy-rest stopped");
    Ok(())
}
