//! Hunt coordinator binary entrypoint wiring storage, the event relay, SSE and REST layers.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hunt_coordinator::{
    clock::{SharedClock, SystemClock},
    config::AppConfig,
    dao::hunt_store::{HuntStore, memory::MemoryHuntStore},
    relay::EventRelay,
    routes,
    services::{lock_sweeper, storage_supervisor},
    state::{AppState, SharedState},
};

const DEFAULT_PORT: u16 = 4200;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let store = select_store().await?;
    let relay = select_relay(&config).await;
    let clock: SharedClock = Arc::new(SystemClock);

    let app_state = AppState::build(config, store, clock, relay).await;

    lock_sweeper::spawn(
        app_state.locks().clone(),
        app_state.config().lock_sweep_interval,
    );
    tokio::spawn(storage_supervisor::run(app_state.clone()));

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Pick the storage backend from the environment.
///
/// `STORE_BACKEND=memory` wins, then MongoDB when `MONGO_URI` is set, then SQLite.
async fn select_store() -> anyhow::Result<Arc<dyn HuntStore>> {
    if env::var("STORE_BACKEND").is_ok_and(|backend| backend.eq_ignore_ascii_case("memory")) {
        warn!("using in-memory store; state is lost on restart and not shared across instances");
        return Ok(Arc::new(MemoryHuntStore::new()));
    }

    #[cfg(feature = "mongo-store")]
    {
        if env::var("MONGO_URI").is_ok_and(|uri| !uri.trim().is_empty()) {
            use hunt_coordinator::dao::hunt_store::mongodb::{MongoConfig, MongoHuntStore};

            let config = MongoConfig::from_env()
                .await
                .context("reading MongoDB settings")?;
            let store = MongoHuntStore::connect(config)
                .await
                .context("connecting to MongoDB")?;
            info!("using MongoDB store");
            return Ok(Arc::new(store));
        }
    }

    #[cfg(feature = "sqlite-store")]
    {
        use hunt_coordinator::dao::hunt_store::sqlite::{SqliteConfig, SqliteHuntStore};

        let config = SqliteConfig::from_env();
        let url = config.url.clone();
        let store = SqliteHuntStore::connect(config)
            .await
            .context("opening SQLite database")?;
        info!(%url, "using SQLite store");
        Ok(Arc::new(store))
    }

    #[cfg(not(feature = "sqlite-store"))]
    {
        warn!("no persistent backend compiled in; using in-memory store");
        Ok(Arc::new(MemoryHuntStore::new()))
    }
}

/// Connect the cross-instance relay when `REDIS_URL` is set and reachable.
async fn select_relay(config: &AppConfig) -> Option<Arc<dyn EventRelay>> {
    let Some(url) = env::var("REDIS_URL").ok().filter(|url| !url.trim().is_empty()) else {
        warn!("REDIS_URL not set; events reach only clients connected to this instance");
        return None;
    };

    #[cfg(feature = "redis-relay")]
    {
        use hunt_coordinator::relay::redis::RedisRelay;

        match RedisRelay::connect(&url, config.relay_channel.clone()).await {
            Ok(relay) => {
                info!(channel = %config.relay_channel, "relaying events through Redis");
                Some(Arc::new(relay))
            }
            Err(err) => {
                warn!(error = %err, "Redis unreachable; events reach only local clients");
                None
            }
        }
    }

    #[cfg(not(feature = "redis-relay"))]
    {
        let _ = (url, config);
        warn!("built without redis-relay; events reach only local clients");
        None
    }
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
