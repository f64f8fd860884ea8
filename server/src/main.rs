// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use anyhow::Context;
use axum::http::HeaderName;
use chrono::Utc;
use server::config::Config;
use server::database::{self, SqliteTaskStore};
use server::scheduler::run_evaluation_cycle;
use server::{AppState, routes};
use tower_http::cors::{Any, CorsLayer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::info!("Starting up the server...");

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::debug!("Configuration: {:?}", config);

    let db_pool = match database::establish_connection_pool(&config.database_url).await {
        Ok(pool) => {
            tracing::info!("Database connection was made successfully.");
            pool
        }
        Err(e) => {
            tracing::error!("Failed to connect with the database: {:?}", e);
            std::process::exit(1);
        }
    };
    let store = SqliteTaskStore::new(db_pool);

    // Occurrences are generated on demand; startup counts as a session start.
    if config.evaluate_on_startup {
        if let Err(e) = run_evaluation_cycle(&store, Utc::now()).await {
            tracing::error!("Startup evaluation of recurring tasks failed: {:?}", e);
        }
    }

    let app_routes = routes::create_router(AppState::new(store, config.evaluate_on_list));

    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("accept"),
        ])
        .allow_origin(Any);

    let app = app_routes.layer(cors);

    let addr = config.socket_addr()?;
    tracing::info!("The server listens on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
