//! Harvester CLI
//!
//! Local execution entry point: runs fetch cycles and manages subscribers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use harvester::{
    error::{AppError, Result},
    models::{Config, SourceRegistry, Subscriber, SubscriberFilter},
    pipeline::{FetchOrchestrator, NotificationDispatcher, Transport},
    storage::{AnnouncementStore, DocumentStore, LocalBlobs, SubscriberStore},
};
use tokio_util::sync::CancellationToken;

/// Harvester - School Announcement Ingestion
#[derive(Parser, Debug)]
#[command(
    name = "harvester",
    version,
    about = "Collects school announcements and notifies subscribers"
)]
struct Cli {
    /// Path to storage directory containing config files and data
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Configuration file (default: {storage_dir}/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Keep documents in S3 instead of the storage directory
    #[cfg(feature = "s3")]
    #[arg(long)]
    s3: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one fetch cycle over all active sources
    Run {
        /// Only process these source ids
        #[arg(long)]
        source: Vec<String>,

        /// Print the run record as JSON
        #[arg(long)]
        json: bool,

        /// Skip subscriber notifications
        #[arg(long)]
        no_notify: bool,
    },

    /// Validate configuration and source files
    Validate,

    /// List configured sources
    Sources,

    /// Add or update a subscriber
    Subscribe {
        email: String,

        /// Restrict to these source ids
        #[arg(long)]
        source: Vec<String>,

        /// Restrict to these categories
        #[arg(long)]
        category: Vec<String>,

        /// Require this keyword in the announcement text
        #[arg(long)]
        keyword: Option<String>,
    },

    /// Deactivate a subscriber
    Unsubscribe { email: String },

    /// Show the last recorded run
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Resolve a configured path against the storage directory.
fn under(storage_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        storage_dir.join(path)
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.storage_dir.join("config.toml"));
    let mut config = Config::load_or_default(&config_path);
    config.apply_env_overrides(|key| std::env::var(key).ok())?;

    let paths = &mut config.paths;
    paths.sources_file = under(&cli.storage_dir, &paths.sources_file);
    paths.data_dir = under(&cli.storage_dir, &paths.data_dir);
    let render = &mut config.render;
    render.profile_dir = under(&cli.storage_dir, &render.profile_dir);
    render.signal_file = under(&cli.storage_dir, &render.signal_file);

    log::info!("Loaded configuration from {}", config_path.display());
    Ok(config)
}

type Stores = (Arc<dyn AnnouncementStore>, Arc<dyn SubscriberStore>);

fn local_stores(config: &Config) -> Stores {
    let store = Arc::new(DocumentStore::new(LocalBlobs::new(&config.paths.data_dir)));
    log::debug!("Document store at {}", store.blobs().root().display());
    (
        store.clone() as Arc<dyn AnnouncementStore>,
        store as Arc<dyn SubscriberStore>,
    )
}

#[cfg(feature = "s3")]
async fn open_stores(cli: &Cli, config: &Config) -> Result<Stores> {
    if cli.s3 {
        let blobs = harvester::storage::S3Blobs::from_env().await?;
        let store = Arc::new(DocumentStore::new(blobs));
        return Ok((
            store.clone() as Arc<dyn AnnouncementStore>,
            store as Arc<dyn SubscriberStore>,
        ));
    }
    Ok(local_stores(config))
}

#[cfg(not(feature = "s3"))]
async fn open_stores(_cli: &Cli, config: &Config) -> Result<Stores> {
    Ok(local_stores(config))
}

#[cfg(feature = "email")]
fn transport(config: &Config) -> Result<Arc<dyn Transport>> {
    Ok(Arc::new(harvester::pipeline::SmtpTransport::new(&config.notify)?))
}

#[cfg(not(feature = "email"))]
fn transport(_config: &Config) -> Result<Arc<dyn Transport>> {
    log::warn!("Built without email support; digests will only be logged");
    Ok(Arc::new(harvester::pipeline::LogTransport))
}

fn load_registry(config: &Config) -> Result<SourceRegistry> {
    let registry = SourceRegistry::load(&config.paths.sources_file)?;
    registry.validate()?;
    Ok(registry)
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(&cli)?;
    let (announcements, subscribers) = open_stores(&cli, &config).await?;

    match cli.command {
        Command::Run {
            source,
            json,
            no_notify,
        } => {
            config.validate()?;
            let mut registry = load_registry(&config)?;
            if !source.is_empty() {
                registry.retain_ids(&source)?;
            }
            log::info!("Loaded {} sources", registry.len());

            let notify = config.notify.enabled && !no_notify;
            let mut orchestrator =
                FetchOrchestrator::from_config(config.clone(), registry, announcements)?;
            if notify {
                orchestrator = orchestrator.with_dispatcher(NotificationDispatcher::new(
                    transport(&config)?,
                    subscribers,
                    config.notify.clone(),
                ));
            } else {
                log::info!("Notifications disabled for this run");
            }

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::warn!("Interrupt received, finishing current step...");
                    on_signal.cancel();
                }
            });

            let run = orchestrator.run_cycle(&cancel).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&run)?);
            }
            if run.cancelled {
                return Err(AppError::Cancelled);
            }
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("✓ Config OK");

            let registry = load_registry(&config)?;
            log::info!(
                "✓ Sources OK ({} configured, {} active)",
                registry.len(),
                registry.active().len()
            );

            log::info!("All validations passed!");
        }

        Command::Sources => {
            let registry = load_registry(&config)?;
            for source in registry.all() {
                println!(
                    "{:<20} {:<8} {:<40} {}",
                    source.id,
                    if source.active { "active" } else { "inactive" },
                    source.name,
                    source.listing_url
                );
            }
        }

        Command::Subscribe {
            email,
            source,
            category,
            keyword,
        } => {
            if !source.is_empty() {
                let registry = load_registry(&config)?;
                if let Some(unknown) = source.iter().find(|id| registry.get(id).is_none()) {
                    return Err(AppError::validation(format!("unknown source '{unknown}'")));
                }
            }
            let filter = SubscriberFilter {
                sources: source.into_iter().collect(),
                categories: category.into_iter().collect(),
                keyword: keyword.filter(|k| !k.trim().is_empty()),
            };
            let stored = subscribers.subscribe(Subscriber::new(&email, filter)?).await?;
            log::info!("Subscribed {}", stored.email);
        }

        Command::Unsubscribe { email } => {
            if subscribers.unsubscribe(&email).await? {
                log::info!("Unsubscribed {}", email);
            } else {
                log::warn!("No subscriber with address {}", email);
            }
        }

        Command::Info => {
            log::info!("Storage directory: {}", cli.storage_dir.display());
            match announcements.last_run().await? {
                Some(run) => {
                    log::info!("Last run: {}", run.summary());
                    for report in &run.sources {
                        log::info!(
                            "  {} {:?}: {} new, {} updated, {} unchanged{}",
                            report.source_id,
                            report.outcome,
                            report.new,
                            report.updated,
                            report.unchanged,
                            report
                                .error
                                .as_deref()
                                .map(|e| format!(" ({e})"))
                                .unwrap_or_default()
                        );
                    }
                }
                None => log::info!("No run recorded yet."),
            }
        }
    }

    Ok(())
}
