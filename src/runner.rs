use std::future::Future;

use anyhow::Context;
use tracing::{error, info, instrument, warn};

use crate::config::Config;
use crate::dataset::Dataset;
use crate::keys::KeySpace;
use crate::pubsub::RedisPubSub;
use crate::redis_store::RedisStore;
use crate::report::Report;
use crate::service::{Showcase, ShowcaseOptions};

/// Loads the dataset, runs the configured scenarios against Redis and
/// returns their reports.
///
/// The run stops with an error when `shutdown` completes first. Keys written
/// up to that point are still cleaned up unless `keep_keys` is set.
#[instrument(skip_all, fields(url = %config.redis_url))]
pub async fn run(config: &Config, shutdown: impl Future) -> anyhow::Result<Vec<Report>> {
    let mut dataset = Dataset::load(&config.csv_path)
        .await
        .with_context(|| format!("loading {}", config.csv_path.display()))?;
    if let Some(max) = config.max_records {
        dataset.truncate(max);
    }
    info!(
        records = dataset.len(),
        columns = dataset.headers.len(),
        "dataset loaded"
    );

    let mut store = RedisStore::connect(&config.redis_url)
        .await
        .context("connecting to redis")?;
    store.ping().await.context("pinging redis")?;
    let pubsub = RedisPubSub::connect(&config.redis_url)
        .await
        .context("opening pub/sub connection")?;

    let keys = if config.isolate {
        KeySpace::isolated(&config.key_prefix)
    } else {
        KeySpace::new(config.key_prefix.as_str())
    };
    info!(prefix = keys.prefix(), "using key prefix");

    let mut showcase = Showcase::new(store, pubsub, dataset, keys, ShowcaseOptions::from(config))?;
    let scenarios = config.scenarios();

    // Runs until every scenario has finished or the shutdown signal arrives,
    // whichever happens first.
    let outcome = tokio::select! {
        res = showcase.run(&scenarios) => Some(res),
        _ = shutdown => {
            warn!("interrupted, skipping remaining scenarios");
            None
        }
    };

    if config.keep_keys {
        info!(keys = showcase.written_keys().count(), "keeping keys");
    } else if let Err(err) = showcase.cleanup().await {
        error!(cause = %err, "cleanup failed");
    }

    match outcome {
        Some(res) => Ok(res?),
        None => anyhow::bail!("interrupted before every scenario finished"),
    }
}
