mod args;
mod csv;

use std::fs::File;

use anyhow::Context as _;
use args::Args;
use clap::Parser as _;
use maison_energie::{
    db::{PgStore, migrate, new_pool},
    ingest::{Origin, Pipeline, PipelineConfig},
    logging,
};
use tracing::info;

use crate::csv::CsvPayloadIter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logging::init()?;

    let file =
        File::open(&args.file).with_context(|| format!("failed to open file: {:?}", args.file))?;
    let mut iter = CsvPayloadIter::new(file).context("failed to create CSV payload iterator")?;

    let pool = new_pool(&args.database_url, args.store_timeout())
        .await
        .context("failed to connect to database")?;
    migrate(&pool).await.context("failed to prepare database")?;

    let pipeline = Pipeline::new(
        PgStore::new(pool),
        PipelineConfig {
            gas_mode: args.gas_mode,
            store_timeout: args.store_timeout(),
            ..Default::default()
        },
    );

    let batch_size = args.batch_size.max(1);
    let mut buffer = Vec::with_capacity(batch_size);
    let mut total = 0;

    loop {
        let line = iter.line();
        let Some(result) = iter.next() else {
            break;
        };

        let raw = result.with_context(|| format!("failed to parse CSV record at line {line}"))?;
        // Imported rows are operator input and get the same checks as the HTTP API.
        let validated = pipeline
            .normalize(&raw, Origin::Api)
            .with_context(|| format!("invalid reading at line {line}"))?;
        buffer.push(validated.reading);

        if buffer.len() >= batch_size {
            total += pipeline
                .persist_batch(std::mem::take(&mut buffer))
                .await
                .context("failed to store readings")?
                .len();
        }
    }

    if !buffer.is_empty() {
        total += pipeline
            .persist_batch(buffer)
            .await
            .context("failed to store remaining readings")?
            .len();
    }

    info!(total, file = ?args.file, "import finished");

    Ok(())
}
