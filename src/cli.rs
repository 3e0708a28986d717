//! CLI definitions using clap.

use std::path::PathBuf;

use clap::Parser;

/// Reconcile a table of desired entries into an in-process map.
#[derive(Parser, Debug)]
#[command(name = "converge")]
#[command(version)]
#[command(
    about = "Drive a key/value map to match a desired-state table",
    long_about = "Inserts entries into a desired-state table, waits for the reconciler to write them \
                  into a map, prints the map, then deletes them again."
)]
pub struct Cli {
    /// TOML file with reconciler timings and the map shape
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of entries to reconcile
    #[arg(short, long, default_value_t = 16)]
    pub objects: u32,

    /// Give up if the map has not converged within this many seconds
    #[arg(short, long, default_value_t = 10)]
    pub timeout_secs: u64,
}
