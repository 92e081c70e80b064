use std::path::PathBuf;

use clap::Parser;

use crate::telemetry::LogFormat;

/// Encrypt legacy plaintext columns of the finance database in place.
///
/// Every governed column is rewritten as ciphertext, timestamps are
/// normalised to UTC, and account name search tokens are backfilled. Rows
/// that are already encrypted are left alone, so the command can be re-run.
#[derive(Parser, Debug)]
#[command(name = "encrypt-existing-data", version, about)]
pub struct Args {
    /// Report how many rows would change, then roll back.
    #[arg(long)]
    pub dry_run: bool,

    /// Settings file; also where a generated key is stored.
    #[arg(long, short = 'c', env = "VAULT_CONFIG", default_value = vault::config::DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Log output format. Defaults to `logging.format` from the settings.
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,
}
