use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use email_delivery::{SmtpDispatcher, SmtpSettings};
use interfaces::{Dispatcher, DryRunDispatcher};
use rss_aggregator::config::DEFAULT_CONFIG_PATH;
use rss_aggregator::{logging, AppConfig, FeedRegistry, FeedSource, Pipeline, RunOutcome};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch all feeds, compile new articles and deliver the newspaper
    Run {
        /// Write the newspaper and update the ledger, but do not send mail
        #[arg(long)]
        dry_run: bool,
    },

    /// Inspect or edit the feed registry
    Feeds {
        #[command(subcommand)]
        command: FeedsCommand,
    },
}

#[derive(Subcommand)]
enum FeedsCommand {
    /// List configured feeds in order
    List,

    /// Append a feed
    Add {
        /// Feed URL or local file path
        identifier: String,

        /// Display name; defaults to the feed's own title
        #[arg(short, long)]
        label: Option<String>,

        /// Only consider the first N entries of each fetch
        #[arg(short, long)]
        max_articles: Option<usize>,
    },

    /// Remove a feed
    Remove { identifier: String },

    /// Change the label or article limit of a feed
    Update {
        identifier: String,

        #[arg(short, long)]
        label: Option<String>,

        #[arg(short, long)]
        max_articles: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match AppConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("epistle: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init(config.log_dir.as_deref()) {
        eprintln!("epistle: {}", e);
        return ExitCode::FAILURE;
    }

    match execute(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn execute(command: Commands, config: AppConfig) -> Result<()> {
    match command {
        Commands::Run { dry_run } => run(config, dry_run).await,
        Commands::Feeds { command } => feeds(command, &config),
    }
}

async fn run(config: AppConfig, dry_run: bool) -> Result<()> {
    let dispatcher = dispatcher(&config, dry_run)?;
    let pipeline = Pipeline::from_config(config, dispatcher)?;
    let report = pipeline.run(Utc::now()).await?;

    for failure in &report.failures {
        warn!("Skipped {}: {}", failure.identifier, failure.cause);
    }
    match report.outcome {
        RunOutcome::Delivered { artifact, receipt } => {
            if receipt.sent {
                info!(
                    "Delivered {} articles to {} ({})",
                    report.accepted,
                    receipt.destination,
                    artifact.display()
                );
            } else {
                info!("Compiled {} articles into {} (not sent)", report.accepted, artifact.display());
            }
        }
        RunOutcome::NothingNew => info!("No new articles, nothing delivered"),
    }
    Ok(())
}

fn dispatcher(config: &AppConfig, dry_run: bool) -> Result<Box<dyn Dispatcher>> {
    match &config.delivery {
        Some(delivery) if !dry_run => {
            let dispatcher = SmtpDispatcher::new(SmtpSettings {
                server: delivery.smtp_server.clone(),
                port: delivery.smtp_port,
                username: delivery.smtp_username.clone(),
                password: delivery.smtp_password.clone(),
                from_address: delivery.sender().to_string(),
                starttls: delivery.smtp_starttls,
                timeout: Duration::from_secs(delivery.timeout_seconds),
            })
            .context("failed to set up SMTP delivery")?;
            Ok(Box::new(dispatcher))
        }
        Some(_) => Ok(Box::new(DryRunDispatcher)),
        None => {
            if !dry_run {
                warn!("No delivery section configured, the newspaper will only be written to disk");
            }
            Ok(Box::new(DryRunDispatcher))
        }
    }
}

fn feeds(command: FeedsCommand, config: &AppConfig) -> Result<()> {
    let mut registry = FeedRegistry::load(&config.feeds_path)?;

    match command {
        FeedsCommand::List => {
            if registry.list_sources().is_empty() {
                println!("No feeds configured in {}", config.feeds_path.display());
            }
            for (index, source) in registry.list_sources().iter().enumerate() {
                let label = source.label.as_deref().unwrap_or("-");
                match source.max_articles {
                    Some(max) => println!("{:>3}. {} [{}] (first {})", index + 1, source.identifier, label, max),
                    None => println!("{:>3}. {} [{}]", index + 1, source.identifier, label),
                }
            }
            return Ok(());
        }
        FeedsCommand::Add {
            identifier,
            label,
            max_articles,
        } => {
            let source = FeedSource {
                identifier,
                label,
                max_articles,
            };
            registry.add_source(source)?;
        }
        FeedsCommand::Remove { identifier } => {
            if !registry.remove_source(&identifier) {
                return Err(anyhow!("no feed registered as {}", identifier));
            }
        }
        FeedsCommand::Update {
            identifier,
            label,
            max_articles,
        } => {
            let mut source = registry
                .get(&identifier)
                .cloned()
                .ok_or_else(|| anyhow!("no feed registered as {}", identifier))?;
            if label.is_some() {
                source.label = label;
            }
            if max_articles.is_some() {
                source.max_articles = max_articles;
            }
            registry.update_source(&identifier, source)?;
        }
    }

    registry.save()?;
    Ok(())
}
