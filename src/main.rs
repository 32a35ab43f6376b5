use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use novelcrawl::config::Config;
use novelcrawl::spider::{Operation, Spider};
use novelcrawl::storage::open_repository;

#[derive(Parser)]
#[command(
    name = "novelcrawl",
    version,
    about = "Incremental crawler that discovers, tracks and archives serialized novels",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(short, long, global = true, default_value = "novelcrawl.toml")]
    config: PathBuf,

    /// Only run on this site
    #[arg(short, long, global = true)]
    site: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); defaults to the configured one
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Probe ids past the known frontier
    Explore,
    /// Refresh every known book
    Update,
    /// Refresh books with an error record
    UpdateError,
    /// Download finished books
    Download,
    /// Repair duplicates, error records and download flags
    Fix,
    /// Print a consistency report
    Check,
    /// Print books whose completion state needs attention
    CheckEnd,
    /// Back up the database
    Backup,
    /// Print site statistics
    Info,
    /// Backup, update, explore, download and fix
    Process,
}

impl From<Commands> for Operation {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Explore => Operation::Explore,
            Commands::Update => Operation::Update,
            Commands::UpdateError => Operation::UpdateError,
            Commands::Download => Operation::Download,
            Commands::Fix => Operation::Fix,
            Commands::Check => Operation::Check,
            Commands::CheckEnd => Operation::CheckEnd,
            Commands::Backup => Operation::Backup,
            Commands::Info => Operation::Info,
            Commands::Process => Operation::Process,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;
    config.validate()?;

    let log_format = cli.log_format.as_deref().unwrap_or(config.logging.format.as_str());
    setup_tracing(log_format, &config.logging.level, cli.verbose)?;

    let operation = Operation::from(cli.command);
    tracing::info!(
        %operation,
        config = %cli.config.display(),
        site = ?cli.site,
        "novelcrawl starting"
    );

    let repo = open_repository(&config.database).with_context(|| {
        format!(
            "Failed to open database: {}",
            config.database.sqlite_path.display()
        )
    })?;
    let spider = Spider::from_config(&config, repo)?;

    let cancel = spider.context().cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing admitted requests");
            cancel.cancel();
        }
    });

    let outcomes = spider.run(operation, cli.site.as_deref()).await?;
    println!("{}", serde_json::to_string_pretty(&outcomes)?);

    let failed = outcomes.iter().filter(|outcome| !outcome.is_ok()).count();
    if failed > 0 {
        anyhow::bail!("{operation} failed on {failed} site(s)");
    }

    tracing::info!(%operation, "novelcrawl completed successfully");
    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("novelcrawl=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .or_else(|_| tracing_subscriber::EnvFilter::try_new(format!("novelcrawl={level},warn")))
            .context("Invalid log level")?
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_target(false))
                .init();
        }
    }

    Ok(())
}
