//! Tidepool demo - syncs a store with a REST collection.
//!
//! Pulls the collection named by `TIDEPOOL_REMOTE_URL`, saves every JSON
//! object given on the command line, pushes the changes and logs the outcome.

use tidepool_engine::{SaveOptions, Store, StoreConfig};
use tidepool_sync::{lock_store, shared, Config, RestChannel, SyncBinding, SyncHooks, SyncOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tidepool_sync=debug,tidepool_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(
        store = %config.store_name,
        remote = config.remote_url.as_deref().unwrap_or("-"),
        "Starting Tidepool sync"
    );

    let store = shared(Store::from_config(
        StoreConfig::new(config.store_name.clone()).id_field(config.id_field.clone()),
    ));
    let remote = RestChannel::from_config(&config)?;

    let hooks = SyncHooks::new()
        .on_save_success(|record| tracing::info!(id = %record.id(), "saved remotely"))
        .on_save_error(|id, error| tracing::error!(id = %id, error = %error, "save failed"))
        .on_read_error(|error| tracing::error!(error = %error, "read failed"));

    // Passes are run explicitly below
    let binding = SyncBinding::new(
        config.store_name.clone(),
        store.clone(),
        remote,
        hooks,
        SyncOptions::from(&config).manual(),
    )?;

    if let Ok(pulled) = binding.pull(None).await {
        tracing::info!(records = pulled.applied, "pulled remote collection");
    }

    let records = std::env::args()
        .skip(1)
        .map(|arg| serde_json::from_str::<serde_json::Value>(&arg))
        .collect::<Result<Vec<_>, _>>()?;
    if !records.is_empty() {
        lock_store(&store).save(records, SaveOptions::default())?;
    }

    let report = binding.sync_now().await?;
    tracing::info!(
        pushed = report.pushed.len(),
        failed = report.failed.len(),
        removed = report.removed.len(),
        elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
        "sync finished"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);

    binding.shutdown().await;

    Ok(())
}
