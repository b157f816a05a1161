use std::{collections::HashMap, path::PathBuf, time::Duration};

use anyhow::{anyhow, Context, Result};
use clap::{ArgEnum, Parser};
use tracing_subscriber::{fmt::format, prelude::__tracing_subscriber_field_MakeExt, EnvFilter};

use crate::{
    api::service::PickupSettings,
    domain::{concurrency::ConcurrencyLimits, load_balance::OrderingPolicy},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ArgEnum)]
pub enum StoreBackend {
    Disk,
    Postgres,
}

#[derive(Debug, Parser)]
pub struct Config {
    #[clap(long, arg_enum, default_value = "fifo", env)]
    pub ordering: OrderingPolicy,
    /// JSON object mapping a job type to its maximum number of in-progress jobs
    #[clap(long, default_value = "{}", env, parse(try_from_str = parse_limits))]
    pub concurrency_limits: ConcurrencyLimits,

    #[clap(long, arg_enum, default_value = "disk", env)]
    pub store: StoreBackend,
    #[clap(long, default_value = "jobs.json", env)]
    pub database_path: PathBuf,
    #[clap(long, env, required_if_eq("store", "postgres"))]
    pub database_url: Option<String>,

    #[clap(long, default_value = "nats://localhost:4222", env)]
    pub nats_url: String,
    #[clap(long, default_value = "jobs.pickup", env)]
    pub subject: String,
    #[clap(long, default_value = "dispatch", env)]
    pub queue_group: String,

    #[clap(long, default_value = "5000", env)]
    pub hook_timeout_ms: u64,
    #[clap(long, default_value = "2", env)]
    pub pickup_retries: u32,
}

impl Config {
    pub fn pickup_settings(&self) -> PickupSettings {
        PickupSettings {
            ordering: self.ordering,
            limits: self.concurrency_limits.clone(),
            hook_timeout: Duration::from_millis(self.hook_timeout_ms),
            retries: self.pickup_retries,
        }
    }
}

fn parse_limits(raw: &str) -> Result<ConcurrencyLimits> {
    let limits: HashMap<String, i64> = serde_json::from_str(raw)
        .context("concurrency limits must be a JSON object of type -> integer")?;

    limits
        .into_iter()
        .map(|(job_type, limit)| {
            let limit = u32::try_from(limit)
                .ok()
                .filter(|l| *l > 0)
                .ok_or_else(|| {
                    anyhow!("limit for {:?} must be a positive integer, got {}", job_type, limit)
                })?;
            Ok((job_type, limit))
        })
        .collect()
}

pub fn configure_tracing() {
    let formatter =
        format::debug_fn(|writer, field, value| write!(writer, "{}={:?}", field, value))
            .delimited(" ");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .fmt_fields(formatter)
        .init();
}
