//! # converge
//!
//! Demonstrates the reconciler end to end:
//!
//! 1. **Map** - open an in-process map shaped by the config
//! 2. **Table** - register the desired-state table with a fresh database
//! 3. **Reconciler** - spawn the reconciliation loop with map operations
//! 4. **Converge** - insert pending entries, wait until all are `Done`, print
//!    the map
//! 5. **Delete** - mark every entry for deletion and wait for the table and
//!    map to empty

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;
mod demo;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use converge_maps::{Map, MapOps};
use converge_reconciler::Status;
use converge_statedb::{Database, Table};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Cli;
use crate::demo::{DemoConfig, Entry};

#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let expected = usize::try_from(cli.objects).context("Object count out of range")?;
    config.check_capacity(expected)?;
    let timeout = Duration::from_secs(cli.timeout_secs);

    let map = Map::new(config.map_spec()).context("Invalid map configuration")?;
    map.open_or_create();
    let map = Arc::new(map);

    let db = Database::new();
    let table = demo::register_entries(&db).context("Failed to register entry table")?;

    let ops = Arc::new(MapOps::<Entry>::new(Arc::clone(&map)));
    let reconciler_config = demo::reconciler_config(config.reconciler.clone(), ops);
    let handle = converge_reconciler::spawn(db.clone(), table.clone(), reconciler_config)
        .context("Failed to start reconciler")?;

    info!(objects = cli.objects, map = %map.name(), "Inserting desired entries");
    write_all(&db, &table, cli.objects, Status::pending).await?;
    wait_until(&db, &table, timeout, |entries| {
        entries.len() == expected && entries.iter().all(Entry::is_done)
    })
    .await
    .context("Entries did not converge")?;

    let dump = map.dump().context("Failed to dump map")?;
    println!(
        "{}",
        serde_json::to_string_pretty(&dump).context("Failed to encode map dump")?
    );

    info!("Deleting entries");
    write_all(&db, &table, cli.objects, Status::pending_delete).await?;
    wait_until(&db, &table, timeout, <[Entry]>::is_empty)
        .await
        .context("Entries were not deleted")?;
    if !map.is_empty().context("Failed to read map")? {
        bail!("map still holds entries after deletion");
    }

    handle.shutdown().await.context("Reconciler failed")?;
    map.close();

    info!(
        elapsed_ms = start_time.elapsed().as_millis(),
        "Converged and cleaned up"
    );
    Ok(())
}

/// Initialize tracing subscriber, honoring `RUST_LOG`.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(cli: &Cli) -> Result<DemoConfig> {
    match &cli.config {
        Some(path) => converge_core::load_toml(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(DemoConfig::default()),
    }
}

/// Write entry `i -> i * i` for every `i` below `count` with a fresh status.
async fn write_all(
    db: &Database,
    table: &Table<Entry>,
    count: u32,
    status: fn() -> Status,
) -> Result<()> {
    let mut txn = db.write_txn(&[table]).await?;
    for key in 0..count {
        table.insert(&mut txn, Entry::new(key, key.wrapping_mul(key), status()))?;
    }
    txn.commit();
    Ok(())
}

/// Wait on table watches until `done` holds for the table contents.
async fn wait_until(
    db: &Database,
    table: &Table<Entry>,
    timeout: Duration,
    done: impl Fn(&[Entry]) -> bool,
) -> Result<()> {
    let waiting = async {
        loop {
            let (rows, mut watch) = table.all_watch(&db.read_txn())?;
            let entries: Vec<Entry> = rows.map(|(entry, _)| entry).collect();
            if done(&entries) {
                return Ok::<_, anyhow::Error>(());
            }
            watch.ready().await;
        }
    };
    tokio::time::timeout(timeout, waiting)
        .await
        .with_context(|| format!("Timed out after {}s", timeout.as_secs()))?
}
