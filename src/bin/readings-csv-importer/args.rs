use std::{path::PathBuf, time::Duration};

use clap::Parser;
use maison_energie::validate::GasMode;

#[derive(Debug, Parser)]
pub struct Args {
    #[arg(long)]
    pub file: PathBuf,

    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    #[arg(long, env = "GAS_MODE", default_value_t = GasMode::Auto)]
    pub gas_mode: GasMode,

    #[arg(long, env = "STORE_TIMEOUT_MS", default_value_t = 30_000)]
    pub store_timeout_ms: u64,

    #[arg(long, default_value_t = 1000)]
    pub batch_size: usize,
}

impl Args {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}
