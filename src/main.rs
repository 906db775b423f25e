//! Binary entrypoint for the meshingest CLI.
//!
//! Commands:
//! - `start` - subscribe to the configured MQTT topics and ingest until Ctrl-C
//! - `init` - write a starter `config.toml` and create the database schema
//! - `status` - print table row counts as JSON
//!
//! See the library crate docs for module-level details: `meshingest::`.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::sync::Arc;

use meshingest::config::Config;
use meshingest::gate::CoordinationGate;
use meshingest::ingest::{self, EnvelopeProcessor};
use meshingest::meshtastic::envelope::EnvelopeDecoder;
use meshingest::metrics::IngestMetrics;
use meshingest::mqtt::{EnvelopeSubscriber, RumqttTransport};
use meshingest::storage::Store;

#[derive(Parser)]
#[command(name = "meshingest")]
#[command(about = "Ingest Meshtastic MQTT traffic into a relational store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the broker and start ingesting
    Start,
    /// Write a default configuration and create the database schema
    Init {
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },
    /// Show row counts for every table
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let config = Config::load(&cli.config).await?;
            init_logging(&Some(config.clone()), cli.verbose);
            info!("Starting meshingest v{}", env!("CARGO_PKG_VERSION"));
            run(config).await?;
        }
        Commands::Init { force } => {
            init_logging(&None, cli.verbose);
            if tokio::fs::try_exists(&cli.config).await.unwrap_or(false) && !force {
                warn!(
                    "{} already exists; leaving it in place (use --force to overwrite)",
                    cli.config
                );
            } else {
                Config::create_default(&cli.config).await?;
                info!("Configuration file created at {}", cli.config);
            }
            let config = Config::load(&cli.config).await?;
            let store = Store::connect(&config.database)
                .await
                .context("opening database")?;
            store.create_tables().await.context("creating tables")?;
            info!("Schema ready at {}", config.database.connection_string);
            store.close().await;
        }
        Commands::Status => {
            let config = Config::load(&cli.config).await?;
            init_logging(&Some(config.clone()), cli.verbose);
            let store = Store::connect(&config.database)
                .await
                .context("opening database")?;
            store.create_tables().await?;
            let counts = store.table_counts().await?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
            store.close().await;
        }
    }

    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let store = Store::connect(&config.database)
        .await
        .context("opening database")?;
    store.create_tables().await.context("creating tables")?;

    let metrics = Arc::new(IngestMetrics::new());
    let decoder = EnvelopeDecoder::from_config(&config.mqtt);
    if !decoder.skip_nodes().is_empty() {
        info!("Skipping {} node id(s)", decoder.skip_nodes().len());
    }
    let transport = RumqttTransport::from_config(&config.mqtt);
    info!(
        "Connecting to {}:{} as {}",
        config.mqtt.server,
        config.mqtt.port,
        transport.client_id()
    );
    let mut subscriber = EnvelopeSubscriber::new(
        transport,
        decoder,
        config
            .mqtt
            .topics
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        config.mqtt.reconnect_delay(),
        metrics.clone(),
    )
    .with_throughput_interval(config.ingest.throughput_log_interval);
    let processor = EnvelopeProcessor::new(store.clone(), CoordinationGate::new(), metrics.clone());

    let outcome = tokio::select! {
        res = ingest::run_pipeline(&mut subscriber, &processor) => res.map_err(anyhow::Error::from),
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            Ok(())
        }
    };

    let snapshot = metrics.snapshot();
    info!(
        "Ingested {} envelope(s): {} new packet(s), {} duplicate(s), {} sighting(s)",
        snapshot.decoded,
        snapshot.packets_inserted,
        snapshot.packets_duplicate,
        snapshot.sightings_inserted
    );
    store.close().await;
    if let Err(e) = &outcome {
        error!("Ingestion stopped: {:#}", e);
    }
    outcome
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let configured = config
        .as_ref()
        .and_then(|cfg| cfg.logging.level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);
    let base_level = match verbosity {
        0 => configured,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    builder.filter_module("sqlx", log::LevelFilter::Warn);
    builder.filter_module("rumqttc", log::LevelFilter::Info);

    let log_file = config
        .as_ref()
        .and_then(|cfg| cfg.logging.file.as_ref())
        .and_then(|file| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .ok()
        });

    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Echo to the console only when running in a terminal
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
