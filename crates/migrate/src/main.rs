//! `encrypt-existing-data`: one-shot migration of legacy plaintext rows.
//!
//! Startup sequence:
//! 1. Parse arguments and load [`Settings`].
//! 2. Initialise logging.
//! 3. Resolve the database path and the field key.
//! 4. Run the migration in one transaction and report the row count.

mod cli;
mod telemetry;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use vault::{store, FieldCodec, KeyManager, MigrationMode, MigrationRunner, Settings};

use telemetry::LogFormat;

fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let args = cli::Args::parse();
    let settings = Settings::load(&args.config).map_err(|e| {
        // Logging is not up yet.
        eprintln!("ERROR: configuration invalid: {e}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Logging
    // -----------------------------------------------------------------------
    let format = args
        .log_format
        .unwrap_or_else(|| LogFormat::from_setting(&settings.logging.format));
    telemetry::init(&settings.logging.level, format)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %settings.source_path().display(),
        dry_run = args.dry_run,
        "encrypt-existing-data starting"
    );

    // -----------------------------------------------------------------------
    // 3. Database and key
    // -----------------------------------------------------------------------
    let cwd = std::env::current_dir().context("cannot determine working directory")?;
    let db_path = settings.database_path(&cwd)?;

    let codec = FieldCodec::new(Arc::new(KeyManager::from_settings(&settings)));
    let mut conn = store::open_connection(&db_path, &codec)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;

    // -----------------------------------------------------------------------
    // 4. Migration
    // -----------------------------------------------------------------------
    let mode = MigrationMode::from_dry_run(args.dry_run);
    let report = MigrationRunner::new(&codec, mode)
        .run(&mut conn)
        .context("encryption migration failed")?;

    for (table, rows) in &report.per_table {
        info!(table = %table, rows, "table summary");
    }
    if report.failures > 0 {
        warn!(failures = report.failures, "some values could not be encrypted and were left unchanged");
    }
    match mode {
        MigrationMode::DryRun => info!(rows = report.total(), "dry run complete; rows that would be updated"),
        MigrationMode::Commit => info!(rows = report.total(), "encryption migration complete; rows updated"),
    }
    Ok(())
}
