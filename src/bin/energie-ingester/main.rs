mod args;

use std::{process::ExitCode, sync::Arc};

use anyhow::{Context as _, Result, anyhow};
use args::Args;
use clap::Parser as _;
use maison_energie::{
    db::{PgStore, migrate, new_pool},
    health::HealthProbe,
    http::{ApiState, routes},
    ingest::Pipeline,
    logging,
    store::{MemoryStore, Store},
    subscription::SubscriptionManager,
};
use tokio::{net::TcpListener, sync::mpsc};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = run().await {
        eprintln!("{e:#}");
        return ExitCode::from(1);
    }

    ExitCode::from(0)
}

async fn run() -> Result<()> {
    let args = Args::parse();

    logging::init()?;

    if args.in_memory {
        warn!("using in-memory store, readings will not survive a restart");
        return serve(args, MemoryStore::new()).await;
    }

    let database_url = args
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow!("--database-url is required unless --in-memory is set"))?;

    let pool = new_pool(database_url, args.store_timeout())
        .await
        .context("failed to connect to database")?;

    migrate(&pool).await.context("failed to prepare database")?;

    serve(args, PgStore::new(pool)).await
}

async fn serve<S: Store>(args: Args, store: S) -> Result<()> {
    let pipeline = Pipeline::new(store, args.pipeline_config());
    let manager = Arc::new(SubscriptionManager::new(args.subscription_config()));

    let (tx, rx) = mpsc::channel(args.ingest_queue);

    let worker = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.consume_bus(rx).await }
    });

    let subscriber = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.run(tx, shutdown_signal()).await }
    });

    let health = HealthProbe::new(pipeline.clone(), manager.watch());
    let app = routes(ApiState::new(pipeline, health, args.default_limit));

    let listener = TcpListener::bind(args.http_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener: {}", args.http_addr))?;

    info!(
        http_addr = %args.http_addr,
        broker = %format!("{}:{}", args.mqtt_host, args.mqtt_port),
        topic = %args.mqtt_topic,
        "ingester started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    subscriber.await.context("subscription task panicked")?;
    // The queue closes once the subscriber drops its sender; drain what is left.
    worker.await.context("ingest worker panicked")?;

    info!("ingester stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
