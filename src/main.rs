use std::process::ExitCode;

use tracing_subscriber::EnvFilter;
use ub_site::config::Config;
use ub_site::db::connection::init_db;
use ub_site::sse::create_poll_broadcaster;
use ub_site::startup::{AppState, build_router, spawn_pool_health_check};

#[macro_use]
extern crate tracing;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let db = match init_db(&config.database_url).await {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to connect to database: {}", e);
            return ExitCode::FAILURE;
        }
    };
    spawn_pool_health_check(db.clone());

    let addr = config.bind_addr;
    let app_state = match AppState::new(config, db) {
        Ok(app_state) => app_state,
        Err(e) => {
            error!("Failed to set up post storage: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let poll_tx = create_poll_broadcaster();
    let app = build_router(app_state, poll_tx);

    info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Unable to spawn tcp listener");

    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
