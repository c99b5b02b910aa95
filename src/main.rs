mod api;
mod app;
mod auth;
mod config;
mod db;
mod domain;
mod error;
mod logging;
mod middleware;
mod routes;
mod services;
#[cfg(test)]
mod testing;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use auth::TokenService;
use services::{jobs, mailer, scheduler, ChatHub, JobQueue, MediaStorage, PushClient, RedisCache};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let settings = config::Settings::from_env()?;

    logging::init_logging(&settings.env);

    tracing::info!(
        env = ?settings.env,
        server_addr = %settings.server_addr,
        version = env!("CARGO_PKG_VERSION"),
        "Starting HandshakeMe backend"
    );

    let pool = db::create_pool(&settings).await?;
    db::run_migrations(&pool).await?;

    let cache = RedisCache::new(&settings.redis_url, settings.redis_cache_ttl_seconds).await?;
    tracing::info!("Redis cache initialized");

    let mailer = mailer::from_settings(&settings)?;
    let push = PushClient::from_settings(&settings)?;
    let (job_queue, job_rx) = JobQueue::new();

    let state = Arc::new(app::AppState {
        db: pool,
        tokens: TokenService::from_settings(&settings),
        storage: MediaStorage::from_settings(&settings),
        settings: settings.clone(),
        cache,
        jobs: job_queue,
        chat_hub: ChatHub::new(),
        mailer,
        push,
    });

    if let Err(e) = jobs::recover_interrupted(&state.db, &state.jobs).await {
        tracing::error!(error = %e, "Failed to re-queue interrupted deliveries");
    }
    tokio::spawn(jobs::run_worker(state.clone(), job_rx));
    tokio::spawn(scheduler::run_scheduler(state.clone()));

    let app = app::create_app(state);

    let listener = tokio::net::TcpListener::bind(&settings.server_addr).await?;
    tracing::info!("Listening on {}", settings.server_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // give in-flight jobs a moment to finish
    tokio::time::sleep(Duration::from_millis(500)).await;
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
