//! Command-line interface for span-balance
//!
//! # Usage Examples
//!
//! ## Consume
//! ```bash
//! # Print spans as JSON lines, retrying failed sessions forever
//! span-balance consume --brokers localhost:9092 --topic spans
//!
//! # Give up after 10 failed sessions in a row, one second apart
//! span-balance consume --brokers localhost:9092 --topic spans \
//!   --max-session-failures 10 --retry-delay-ms 1000 --output none
//! ```
//!
//! ## Populate
//! ```bash
//! span-balance populate --brokers localhost:9092 --topic spans --count 5000
//! ```
//!
//! Logging is controlled through `RUST_LOG`, e.g. `RUST_LOG=span_balance_kafka_source=debug`
//! shows session setup with its claimed partitions.

use anyhow::Context;
use clap::{Parser, Subcommand};
use span_balance::producer::{testdata, SpanProducer};
use span_balance::source::{KafkaConsumerGroup, SpanDecoder, SpanGroupHandler, Supervisor};
use span_balance::{ConsumeArgs, PopulateArgs, SpanPrinter};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "span-balance")]
#[command(about = "Consume Avro spans from a Kafka consumer group")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume spans until Ctrl-C
    Consume(ConsumeArgs),

    /// Publish random spans to a topic
    Populate(PopulateArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Consume(args) => run_consume(args).await,
        Commands::Populate(args) => run_populate(args).await,
    }
}

async fn run_consume(args: ConsumeArgs) -> anyhow::Result<()> {
    let config = args.consumer;
    let group = KafkaConsumerGroup::new(&config).context("Failed to create Kafka consumer")?;
    let decoder = SpanDecoder::new().context("Failed to load span schema")?;

    let printer = Arc::new(SpanPrinter::new(args.output));
    let handler = {
        let printer = Arc::clone(&printer);
        SpanGroupHandler::from_fn(decoder, move |span| printer.print(&span))
    };

    let handle = Supervisor::new(group, config.topic.clone(), Arc::new(handler))
        .with_retry_policy(config.retry_policy())
        .start()
        .await
        .with_context(|| format!("Failed to start consuming topic {}", config.topic))?;

    let gave_up = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Received Ctrl-C, stopping");
            false
        }
        _ = handle.stopped() => true,
    };

    handle.stop().await;
    info!("Handled {} spans from {}", printer.handled(), config.topic);

    if gave_up {
        warn!("Consumer stopped on its own");
        anyhow::bail!("Too many consecutive consumer group session failures");
    }
    Ok(())
}

async fn run_populate(args: PopulateArgs) -> anyhow::Result<()> {
    let producer = SpanProducer::new(&args.bootstrap_servers()).await?;
    producer
        .create_topic_if_not_exists(&args.topic, args.partitions)
        .await?;

    let published = testdata::publish_test_spans(&producer, &args.topic, args.count).await?;
    info!("Published {published} spans to {}", args.topic);
    Ok(())
}
