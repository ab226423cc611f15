use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;

use fraud_monitor::models::{Event, NetworkInfo};
use fraud_monitor::monitor::FraudMonitor;
use fraud_monitor::network::NetworkCorrelationAnalyzer;
use fraud_monitor::{load_config, utils, MonitorError};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a KEY=value configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Score a newline-delimited JSON event feed
    Run {
        /// Event file; reads stdin when omitted
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Print the device fingerprint for a network observation
    Fingerprint {
        /// JSON file holding the network observation; reads stdin when omitted
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    utils::logging::init_logger();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Run { input } => run_feed(config, input).await,
        Command::Fingerprint { input } => fingerprint(input).await,
    }
}

async fn run_feed(config: fraud_monitor::MonitorConfig, input: Option<PathBuf>) -> Result<()> {
    let monitor = FraudMonitor::with_defaults(config);
    monitor.start();

    let mut lines = match &input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open event feed {}", path.display()))?;
            LinesStream::new(BufReader::new(file).lines()).boxed()
        }
        None => LinesStream::new(BufReader::new(tokio::io::stdin()).lines()).boxed(),
    };

    info!("Reading event feed...");
    while let Some(line) = lines.next().await {
        let line = line.context("failed to read event feed")?;
        if line.trim().is_empty() {
            continue;
        }

        let event: Event = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!("skipping malformed event line: {}", e);
                continue;
            }
        };

        match monitor.ingest(event).await {
            Ok(Some(alert)) => {
                println!("{}", serde_json::to_string(&alert)?);
            }
            Ok(None) => {}
            Err(MonitorError::InvalidEvent(reason)) => {
                warn!("rejected event: {}", reason);
            }
            Err(e) => {
                error!("event processing failed: {}", e);
            }
        }
    }

    let stats = monitor.stats();
    monitor.stop().await;

    eprintln!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn fingerprint(input: Option<PathBuf>) -> Result<()> {
    let raw = match &input {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            let mut reader = BufReader::new(tokio::io::stdin());
            let mut line = String::new();
            while reader.read_line(&mut line).await? > 0 {
                buffer.push_str(&line);
                line.clear();
            }
            buffer
        }
    };

    let info: NetworkInfo =
        serde_json::from_str(&raw).context("failed to parse network observation")?;
    println!("{}", NetworkCorrelationAnalyzer::fingerprint(&info));
    Ok(())
}
