#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # termhub
//!
//! Control plane that relays interactive terminal sessions between viewer
//! clients and remote worker agents hosting PTYs.
//!
//! Workers keep an outbound websocket open to this server; viewers open a
//! websocket per session. The in-memory hub buffers recent output per
//! session (scrollback), fans live output out to every attached viewer, and
//! routes input/resize/kill back to the right worker. Session and worker
//! records are persisted in SQLite so that sessions survive worker
//! disconnects and resume automatically on reconnect.
//!
//! ## API surface
//!
//! | Method | Path                          | Auth   | Description                    |
//! |--------|-------------------------------|--------|--------------------------------|
//! | GET    | `/api/health`                 | No     | Liveness probe                 |
//! | GET    | `/api/worker/ws`              | token* | Worker control websocket       |
//! | GET    | `/api/sessions/{id}/terminal` | token* | Viewer terminal websocket      |
//! | GET    | `/api/sessions`               | Bearer | List the user's sessions       |
//! | POST   | `/api/sessions`               | Bearer | Create a session (issues spawn)|
//! | PATCH  | `/api/sessions/{id}`          | Bearer | Rename a session               |
//! | DELETE | `/api/sessions/{id}`          | Bearer | Kill and remove a session      |
//! | GET    | `/api/workers`                | Bearer | List the user's workers        |
//! | DELETE | `/api/workers/{id}`           | Bearer | Deregister a worker            |
//!
//! *Websocket auth is via `?token=<jwt>` query param (no `Authorization`
//! header is available during a browser upgrade handshake).

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    middleware,
    routing::get,
    Extension, Router,
};
use clap::Parser;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use termhub::auth::{self, JwtSecret};
use termhub::config::Config;
use termhub::hub::Hub;
use termhub::sessions::manager::SessionManager;
use termhub::sessions::repository::SessionRepository;
use termhub::state::AppState;
use termhub::workers::repository::WorkerRepository;
use termhub::workers::selector::WorkerSelector;
use termhub::{db, routes, ws};

/// Terminal session relay control plane.
#[derive(Parser)]
#[command(name = "termhub", version)]
struct Cli {
    /// Path to TOML config file.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref());

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("termhub v{} starting", env!("CARGO_PKG_VERSION"));

    if config.auth.jwt_secret == "dev-secret-change-in-production" {
        warn!("Using development JWT secret — set JWT_SECRET before exposing this server");
    }

    let pool = db::connect(&config.server.database_url)
        .await
        .expect("Failed to open database");

    let worker_repo = WorkerRepository::new(pool.clone());
    let session_repo = SessionRepository::new(pool);

    let hub = Arc::new(Hub::new(
        worker_repo.clone(),
        session_repo.clone(),
        config.relay.scrollback_size,
    ));
    let ping_task =
        hub.start_ping_loop(Duration::from_secs(config.relay.worker_ping_interval));

    let selector = WorkerSelector::new(worker_repo.clone());
    let session_manager = Arc::new(SessionManager::new(
        session_repo.clone(),
        selector,
        Arc::clone(&hub),
    ));

    let state = AppState {
        config: Arc::new(config),
        hub,
        session_manager,
        session_repo,
        worker_repo,
        start_time: Instant::now(),
    };

    let public_routes = Router::new().route("/api/health", get(routes::health::health));

    // Websocket endpoints validate the token themselves (query param) and
    // must sit outside the bearer middleware.
    let ws_routes = Router::new()
        .route("/api/worker/ws", get(ws::worker::ws_upgrade))
        .route(
            "/api/sessions/{id}/terminal",
            get(ws::viewer::ws_upgrade),
        );

    let authed_routes = Router::new()
        .route(
            "/api/sessions",
            get(routes::sessions::list).post(routes::sessions::create),
        )
        .route(
            "/api/sessions/{id}",
            axum::routing::patch(routes::sessions::rename).delete(routes::sessions::delete),
        )
        .route("/api/workers", get(routes::workers::list))
        .route(
            "/api/workers/{id}",
            axum::routing::delete(routes::workers::delete),
        )
        .layer(middleware::from_fn(auth::require_jwt));

    let app = Router::new()
        .merge(public_routes)
        .merge(ws_routes)
        .merge(authed_routes)
        .layer(Extension(JwtSecret(state.config.auth.jwt_secret.clone())))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let listen = format!("0.0.0.0:{}", state.config.server.port);
    let listener = TcpListener::bind(&listen).await.expect("Failed to bind");
    info!("Listening on {listen}");

    // Graceful shutdown
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM");
            tokio::select! {
                _ = ctrl_c => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("Received SIGINT");
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("Server error");

    info!("Shutting down...");
    ping_task.abort();
    info!("Goodbye");
}
