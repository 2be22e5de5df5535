use anyhow::{Context, Result};
use clap::Parser;
use rustle_facts::{CollectorConfig, Envelope, FactAggregator, OutputFormat};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "rustle-facts")]
#[command(about = "Collect host facts for rustle managed hosts")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct RustleFactsCli {
    /// YAML collector configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Fact subsets to gather (all, min, hardware, network, virtual, !name)
    #[arg(long = "gather-subset", value_delimiter = ',')]
    gather_subset: Vec<String>,

    /// Per-probe timeout in seconds
    #[arg(long)]
    gather_timeout: Option<u64>,

    /// Overall collection timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Directory holding *.fact files
    #[arg(long)]
    fact_path: Option<PathBuf>,

    /// Maximum number of probes running at once
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Only return facts whose names match these patterns
    #[arg(long)]
    filter: Vec<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl RustleFactsCli {
    fn load_config(&self) -> Result<CollectorConfig> {
        let mut config = match &self.config {
            Some(path) => CollectorConfig::from_file(path)?,
            None => CollectorConfig::default(),
        };
        if !self.gather_subset.is_empty() {
            config.gather_subset = self.gather_subset.clone();
        }
        if let Some(secs) = self.gather_timeout {
            config.gather_timeout = secs;
        }
        if let Some(secs) = self.timeout {
            config.timeout = secs;
        }
        if let Some(path) = &self.fact_path {
            config.fact_path = path.clone();
        }
        if let Some(max) = self.max_concurrency {
            config.max_concurrency = max;
        }
        if !self.filter.is_empty() {
            config.filter = self.filter.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = RustleFactsCli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &RustleFactsCli) -> Result<()> {
    info!("Starting rustle-facts v{}", env!("CARGO_PKG_VERSION"));
    let config = cli.load_config().context("invalid configuration")?;
    let filter = config.filter.clone();

    let collection = FactAggregator::new(config)
        .collect()
        .await
        .context("fact collection failed")?;

    let rendered = Envelope::new(collection.facts, &filter).render(cli.format)?;
    println!("{rendered}");
    Ok(())
}
