//! movies-etl - incremental extraction of the movies catalog
//!
//! Usage:
//!   # Poll forever, one pass every `poll_interval_secs`
//!   movies-etl --config movies-etl.yaml run
//!
//!   # One pass over genres only
//!   movies-etl run --once --kind genre
//!
//!   # Inspect and reset watermarks
//!   movies-etl state show
//!   movies-etl state reset person_filmwork

use anyhow::{bail, Context};
use clap::Parser;
use futures::StreamExt;
use movies_etl::cli::{Cli, Command, StateCommand};
use movies_etl::output::write_ndjson;
use movies_etl::prelude::*;
use movies_rdbc::connection::{Connection, ConnectionFactory};
use movies_rdbc::postgres::PgConnectionFactory;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr, stdout carries the extracted records
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(&cli).await?;

    match cli.command {
        Command::Run { once, kind } => run(&config, once, Cli::kinds(kind)).await,
        Command::Check => check(&config).await,
        Command::State { command } => state(&config, command).await,
    }
}

async fn load_config(cli: &Cli) -> anyhow::Result<EtlConfig> {
    let config = match (&cli.database_url, cli.config.exists()) {
        (Some(url), false) => EtlConfig::new(url.clone()),
        (url, _) => {
            let config = EtlConfig::load(&cli.config)
                .await
                .with_context(|| format!("loading {}", cli.config.display()))?;
            match url {
                Some(url) => config.with_database_url(url.clone()),
                None => config,
            }
        }
    };
    config.validate_all()?;
    Ok(config)
}

/// Connect and probe the store. Any failure here happens before a stream starts.
async fn connect(config: &EtlConfig) -> movies_etl::Result<Arc<dyn Connection>> {
    let conn_config = config.connection_config();
    let conn = PgConnectionFactory
        .connect(&conn_config)
        .await
        .map_err(|e| {
            EtlError::config(format!(
                "cannot reach {}: {}",
                conn_config.redacted_url(),
                e
            ))
        })?;

    if !conn.is_valid().await {
        return Err(EtlError::config("database liveness probe failed"));
    }

    info!(url = %conn_config.redacted_url(), "Connected");
    Ok(Arc::from(conn))
}

async fn run(config: &EtlConfig, once: bool, kinds: Vec<EntityKind>) -> anyhow::Result<()> {
    let conn = connect(config).await?;
    let store: Arc<dyn WatermarkStore> =
        Arc::new(FileWatermarkStore::open(&config.state.path).await?);
    let builder = QueryBuilder::postgres(config.postgres.schema.clone())?;
    let executor = Arc::new(RdbcExecutor::new(conn.clone(), builder));
    let extractor = Extractor::new(executor, store, config.chunk_size, config.retry_config())?;

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, stopping after the current page");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => warn!("Failed to install Ctrl+C handler: {}", e),
        }
    });

    loop {
        match run_pass(&extractor, &kinds, &shutdown_rx).await {
            Ok(records) => info!(records, "Pass complete"),
            Err(e) => {
                error!(category = e.category(), fatal = e.is_fatal(), "Pass failed: {}", e);
                conn.close().await.ok();
                return Err(e.into());
            }
        }

        if once || *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(config.poll_interval()) => {}
            _ = shutdown_rx.changed() => break,
        }
    }

    conn.close().await?;
    info!("Stopped");
    Ok(())
}

/// Drain every kind once, writing records to stdout. Stops early between
/// pages once shutdown is requested.
async fn run_pass(
    extractor: &Extractor,
    kinds: &[EntityKind],
    shutdown: &watch::Receiver<bool>,
) -> movies_etl::Result<usize> {
    let mut records = 0;
    for &kind in kinds {
        let mut batches = extractor.extract(kind);
        while let Some(batch) = batches.next().await {
            let batch = batch?;
            {
                let mut out = std::io::stdout().lock();
                records += write_ndjson(&mut out, &batch)?;
                out.flush()?;
            }
            if *shutdown.borrow() {
                return Ok(records);
            }
        }
    }
    Ok(records)
}

async fn check(config: &EtlConfig) -> anyhow::Result<()> {
    let conn = connect(config).await?;
    conn.close().await?;

    let store = FileWatermarkStore::open(&config.state.path).await?;
    let saved = store.snapshot().await?.len();

    println!("{}", serde_yaml::to_string(config)?);
    println!(
        "ok: database reachable, schema '{}', {} watermarks in {}",
        config.postgres.schema,
        saved,
        store.path().display()
    );
    Ok(())
}

async fn state(config: &EtlConfig, command: StateCommand) -> anyhow::Result<()> {
    let store = FileWatermarkStore::open(&config.state.path).await?;

    match command {
        StateCommand::Show => {
            let saved = store.snapshot().await?;
            for key in StreamKey::all() {
                match saved.get(key.as_str()) {
                    Some(mark) => println!("{:<16} {}", key, mark.to_rfc3339()),
                    None => println!("{:<16} -", key),
                }
            }
        }
        StateCommand::Reset { key: Some(key) } => {
            let key = StreamKey::from(key.as_str());
            if !StreamKey::all().contains(&key) {
                bail!("unknown stream key '{}'", key);
            }
            store.reset(&key).await?;
            println!("reset {}", key);
        }
        StateCommand::Reset { key: None } => {
            store.reset_all().await?;
            println!("reset all watermarks");
        }
    }
    Ok(())
}
