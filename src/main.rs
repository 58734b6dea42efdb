// src/main.rs
mod clock;
mod config;
mod db;
mod dispatch;
mod error;
mod handlers;
mod models;
mod poll;
mod routes;
mod scheduler;
mod services;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tracing_subscriber::EnvFilter;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::dispatch::DispatchEngine;
use crate::handlers::AppState;
use crate::poll::PollClosureEngine;
use crate::scheduler::{Reconciler, Scheduler};
use crate::services::NotificationService;
use crate::store::{PgStore, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok(); // Load environment variables from .env file

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    let pool = db::create_pool(&config)
        .await
        .context("Failed to connect to the database")?;
    db::run_migrations(&pool).await?;

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let notifier = Arc::new(NotificationService::new(store.clone(), clock.clone()));
    let closure = Arc::new(PollClosureEngine::new(store.clone(), notifier));
    let reconciler = Arc::new(Reconciler::new(
        DispatchEngine::new(store.clone(), config.dispatch_batch_size),
        closure.clone(),
        clock.clone(),
    ));

    let scheduler = Scheduler::start(reconciler, config.reconcile_interval);

    let routes = routes::create_routes(AppState {
        store,
        closure,
        clock,
    });

    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    let grace = config.shutdown_grace;
    let shutdown = tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
        }
        tracing::info!("shutting down");
        scheduler.stop().await;
        shutdown_handle.graceful_shutdown(Some(grace));
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "listening");

    axum_server::bind(addr)
        .handle(handle)
        .serve(routes.into_make_service())
        .await?;

    shutdown.abort();
    Ok(())
}
