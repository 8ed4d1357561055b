/**
 * AGRO MIDDLEWARE - Process entry point
 *
 * ROLE : Loads the configuration, picks the broker and history store, boots
 * the three replica pools and serves the dashboard facade until Ctrl-C.
 *
 * `--offline` swaps the MQTT broker for the in-process one so the whole
 * control loop can be exercised without infrastructure.
 */

use agro_middleware::broker::{MemoryBroker, MqttBroker, SharedBroker};
use agro_middleware::config::{load_config, MiddlewareConfig};
use agro_middleware::http::{build_router, AppState};
use agro_middleware::middleware::Middleware;
use agro_middleware::ports::{JsonlHistoryStore, MemoryHistoryStore, SharedStore};
use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn open_store(cfg: &MiddlewareConfig) -> SharedStore {
    let Some(path) = cfg.store.path.as_deref() else {
        info!("history kept in memory");
        return Arc::new(MemoryHistoryStore::new());
    };
    match JsonlHistoryStore::open(path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(%path, error = %e, "cannot open history store, falling back to memory");
            Arc::new(MemoryHistoryStore::new())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("agro_middleware=info")),
        )
        .init();

    let offline = std::env::args().any(|arg| arg == "--offline");
    let cfg = load_config().await;

    let broker: SharedBroker = if offline {
        info!("offline mode, using in-process broker");
        Arc::new(MemoryBroker::new())
    } else {
        info!(host = %cfg.mqtt.host, port = cfg.mqtt.port, "using MQTT broker");
        Arc::new(MqttBroker::new(cfg.mqtt.clone()))
    };
    let store = open_store(&cfg);

    let middleware = Arc::new(
        Middleware::bootstrap(&cfg, broker, store)
            .await
            .context("failed to start replica pools")?,
    );

    let app = build_router(AppState { middleware: middleware.clone() });
    let listener = TcpListener::bind(&cfg.http.bind)
        .await
        .with_context(|| format!("cannot bind {}", cfg.http.bind))?;
    info!(bind = %cfg.http.bind, "remote API listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown requested");
        })
        .await;

    middleware.shutdown().await;
    served.context("http server failed")?;
    Ok(())
}
