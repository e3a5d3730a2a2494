//! # Lockstep Server
//!
//! A sync node: keeps every participant of a group-viewing room in lock-step.
//!
//! Each node terminates WebSocket connections for any number of rooms and
//! coordinates with its peers through Redis - shared session state, a
//! per-room lock lease, and pub/sub fan-out - so rooms are never pinned to a
//! node. Late joiners get their initial playback position from a live local
//! peer when one exists, with the stored snapshot as fallback.

mod app_state;
mod config;
mod errors;
mod handlers;
mod routes;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use lockstep_core::infrastructure::{RedisEventBus, RedisSyncStore};
use lockstep_core::ports::{EventBus, SyncStore};
use lockstep_core::{
    ConnectionRegistry, EngineConfig, SessionAuthenticator, SyncEngine, listener, sweeper,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app_state::AppState;
use crate::config::{CliOverrides, Config};

/// Command line arguments for the Lockstep sync node
#[derive(Parser, Debug)]
#[command(name = "lockstep-server")]
#[command(about = "Real-time playback synchronization node for group viewing")]
struct Args {
    /// Path to a TOML config file
    #[arg(long, env = "LOCKSTEP_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Bind host (overrides config)
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,

    /// Bind port (overrides config)
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "lockstep_server=debug,lockstep_core=debug,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = CliOverrides {
        config_path: args.config,
        host: args.host,
        port: args.port,
    };
    let config = Arc::new(Config::load(&cli)?);
    info!(
        bind = %config.bind_address(),
        presence_ttl = ?config.presence_ttl,
        room_lock_ttl = ?config.room_lock_ttl,
        handoff_timeout = ?config.handoff_timeout,
        "configuration loaded"
    );

    let store: Arc<dyn SyncStore> = Arc::new(
        RedisSyncStore::connect(&config.redis_url, config.presence_ttl, config.room_grace)
            .await
            .context("failed to connect the state store")?,
    );
    let bus: Arc<dyn EventBus> = Arc::new(
        RedisEventBus::connect(&config.redis_url)
            .await
            .context("failed to connect the event bus")?,
    );
    info!("coordination backend connected");

    let registry = Arc::new(ConnectionRegistry::new());
    let engine = Arc::new(SyncEngine::new(
        store,
        bus.clone(),
        registry.clone(),
        EngineConfig {
            room_lock_ttl: config.room_lock_ttl,
            handoff_timeout: config.handoff_timeout,
        },
    ));
    let authenticator = Arc::new(SessionAuthenticator::new(
        config.jwt_secret.as_bytes(),
        config.guest_validator_url.clone(),
    ));

    tokio::spawn(listener::run_bus_listener(
        bus,
        registry,
        engine.shutdown_token().clone(),
    ));
    tokio::spawn(sweeper::run_sweeper(
        engine.clone(),
        config.sweeper_interval,
        engine.shutdown_token().clone(),
    ));

    let state = AppState {
        config: config.clone(),
        engine: engine.clone(),
        authenticator,
    };
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!(bind = %config.bind_address(), "sync node listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(engine))
        .await
        .context("server error")?;

    info!("sync node stopped");
    Ok(())
}

/// Resolve on SIGINT; flips the engine's shutdown token so the listener,
/// sweeper, handoff timers, and per-connection read loops wind down while
/// axum drains in-flight requests.
async fn shutdown_signal(engine: Arc<SyncEngine>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
    engine.shutdown();
}
