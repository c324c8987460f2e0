//! DEX fee recommendation engine
//!
//! Command-line driver: train the ensemble, recommend a fee for a market
//! snapshot, inspect the served models or export synthetic training data.

use clap::{Parser, Subcommand};
use dex_fee_engine::{
    config::Config,
    data::{FileMarketData, MarketDataSource, StaticMarketData},
    engine::{FeeEngine, RetrainRequest},
    ml::SyntheticGenerator,
};
use std::path::PathBuf;
use tokio::io::AsyncReadExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "fee-engine")]
#[command(about = "ML ensemble fee recommendations for a DEX")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a new model generation and print its metrics
    Train {
        /// Synthetic samples to generate
        #[arg(short, long)]
        samples: Option<usize>,
        /// Generator seed
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Recommend a fee for a market snapshot
    Predict {
        /// JSON file holding a market snapshot, or `-` for stdin
        #[arg(short, long)]
        snapshot: PathBuf,
    },
    /// Show what the engine currently serves
    Info,
    /// Export labelled synthetic training data as JSON
    Generate {
        #[arg(short, long, default_value = "1000")]
        samples: usize,
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    match cli.command {
        Commands::Train { samples, seed } => train(config, samples, seed).await,
        Commands::Predict { snapshot } => predict(config, snapshot).await,
        Commands::Info => show_info(config).await,
        Commands::Generate { samples, seed, out } => generate(config, samples, seed, out).await,
    }
}

async fn train(config: Config, samples: Option<usize>, seed: Option<u64>) -> anyhow::Result<()> {
    tracing::info!("Training fee models");

    let engine = FeeEngine::new(config);
    let metrics = engine
        .retrain(RetrainRequest {
            sample_count: samples,
            seed,
        })
        .await?;

    if let Some(best) = engine.info().best_model {
        tracing::info!("Best model: {}", best);
    }
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    Ok(())
}

async fn predict(config: Config, snapshot: PathBuf) -> anyhow::Result<()> {
    let engine = FeeEngine::load_or_init(config).await?;
    let source: Box<dyn MarketDataSource> = if snapshot.as_os_str() == "-" {
        let mut input = Vec::new();
        tokio::io::stdin().read_to_end(&mut input).await?;
        Box::new(StaticMarketData::from_json(&input)?)
    } else {
        Box::new(FileMarketData::new(snapshot))
    };

    let result = engine.recommend(source.as_ref()).await;
    if result.is_fallback() {
        tracing::warn!("Serving fallback recommendation");
    }
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn show_info(config: Config) -> anyhow::Result<()> {
    let engine = FeeEngine::load_or_init(config).await?;
    println!("{}", serde_json::to_string_pretty(&engine.info())?);
    Ok(())
}

async fn generate(config: Config, samples: usize, seed: u64, out: Option<PathBuf>) -> anyhow::Result<()> {
    let generator = SyntheticGenerator::new(config.training.synthetic, config.engine.base_fee_rate);
    let data = tokio::task::spawn_blocking(move || generator.generate(samples, seed)).await?;
    let json = serde_json::to_string_pretty(&data)?;

    match out {
        Some(path) => {
            tokio::fs::write(&path, json).await?;
            tracing::info!("Wrote {} samples to {}", data.len(), path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
