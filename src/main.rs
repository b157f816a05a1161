use std::sync::Arc;

use anyhow::{Context, Result};
use api::{nats::NatsPickupListener, service::PickupServiceImpl};
use async_nats::Client;
use clap::Parser;
use config::{Config, StoreBackend};
use domain::repository::JobStore;
use infrastructure::{disk::DiskJobStore, postgres::PgJobStore};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

mod api;
mod config;
mod domain;
mod infrastructure;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    config::configure_tracing();

    info!(
        ordering = %config.ordering,
        limits = ?config.concurrency_limits,
        store = ?config.store,
        "Starting dispatch"
    );

    let nc = async_nats::connect(&config.nats_url).await?;

    match config.store {
        StoreBackend::Disk => {
            let store = DiskJobStore::open(&config.database_path).await?;
            serve(store, nc, &config).await
        }
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for the postgres store")?;
            let pool = PgPoolOptions::new().connect(url).await?;
            let store = PgJobStore::new(pool);
            store.ensure_schema().await?;
            serve(store, nc, &config).await
        }
    }
}

async fn serve<S>(store: S, nc: Client, config: &Config) -> Result<()>
where
    S: JobStore + 'static,
{
    let service = Arc::new(PickupServiceImpl::new(store, config.pickup_settings()));
    let listener = NatsPickupListener::new(
        nc,
        config.subject.clone(),
        config.queue_group.clone(),
        service,
        None,
    );

    tokio::select! {
        result = listener.listen() => {
            error!("Pickup listener exited");
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
        }
    }

    info!("Exiting");

    Ok(())
}
