//! Tether demo - two live collections kept in step through an in-memory
//! remote.
//!
//! Seeds a few records, opens two collections on the same remote, mutates
//! through one and shows the other converging, including a rolled-back write.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tether_client::{ClientConfig, LiveCollection, MemoryRemote, PushIdGenerator};
use tether_engine::{ChangeKind, Priority};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tether_client=debug,tether_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = ClientConfig::from_env()?;

    tracing::info!(
        latency_ms = config.remote_latency.as_millis() as u64,
        timeout_ms = config.write_timeout.as_millis() as u64,
        "Starting tether demo"
    );

    let remote = MemoryRemote::from_config(&config);
    remote.seed("groceries", json!({"title": "Groceries"}), Priority::from(1))?;
    remote.seed("laundry", json!({"title": "Laundry"}), Priority::from(2))?;
    remote.seed("taxes", json!({"title": "Taxes"}), Priority::from(3))?;

    let writer = LiveCollection::open(Arc::new(remote.clone()), PushIdGenerator::new());
    let reader = LiveCollection::open(Arc::new(remote.clone()), PushIdGenerator::new());

    reader.subscribe(|event| match event.kind {
        ChangeKind::Inserted { index } => tracing::info!(id = %event.id, index, "reader: inserted"),
        ChangeKind::Removed { index } => tracing::info!(id = %event.id, index, "reader: removed"),
        ChangeKind::Moved { from, to } => tracing::info!(id = %event.id, from, to, "reader: moved"),
        ChangeKind::Changed { index } => tracing::info!(id = %event.id, index, "reader: changed"),
    });

    for collection in [&writer, &reader] {
        tokio::time::timeout(config.ready_timeout, collection.ready()).await?;
    }
    tracing::info!(ids = ?reader.ids(), "initial sync complete");

    // Default priority sorts first
    let added = writer.add(json!({"title": "Call plumber"})).await?;
    tracing::info!(id = %added.id, index = ?writer.index_of(&added.id), "added");

    // Push groceries to the end
    writer.edit("groceries", |draft| draft.priority = Priority::from(10))?;
    writer.save("groceries").await?;

    writer.remove("laundry").await?;

    // A failed write is visible until the remote answers, then withdrawn
    remote.fail_next(1);
    match writer.add(json!({"title": "Doomed"})).await {
        Ok(record) => tracing::warn!(id = %record.id, "write unexpectedly succeeded"),
        Err(e) => tracing::info!(error = %e, "write failed and was rolled back"),
    }

    // Let the reader catch up with the last echoes
    tokio::time::sleep(Duration::from_millis(50)).await;

    tracing::info!(ids = ?writer.ids(), "writer order");
    tracing::info!(ids = ?reader.ids(), "reader order");
    tracing::info!(ids = ?remote.ids(), "remote order");
    println!("{}", reader.snapshot().to_json_pretty()?);

    writer.close();
    reader.close();

    Ok(())
}
