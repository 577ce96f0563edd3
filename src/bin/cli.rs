//! lendwatch CLI
//!
//! Local execution entry point: runs the scheduler or a single check and
//! manages recipients.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use lendwatch::{
    config::{config_path, load_config, load_config_file},
    context::AppContext,
    error::{AppError, Result},
    models::Domain,
    pipeline::RefreshStatus,
};

/// lendwatch - Lending platform change notifier
#[derive(Parser, Debug)]
#[command(
    name = "lendwatch",
    version,
    about = "Polls lending-platform sources and notifies subscribers about changes"
)]
struct Cli {
    /// Path to data directory containing config and state files
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler until interrupted
    Run,

    /// Run one check cycle now
    Refresh,

    /// Manage notification recipients
    Recipients {
        #[command(subcommand)]
        action: RecipientAction,
    },

    /// Validate configuration file
    Validate,

    /// Show snapshot ages and queue sizes
    Info,
}

#[derive(Subcommand, Debug)]
enum RecipientAction {
    /// List registered recipients
    List,

    /// Register a recipient
    Add {
        id: String,
        #[arg(long)]
        name: Option<String>,
    },

    /// Remove a recipient
    Remove { id: String },

    /// Flip a recipient's preference for one domain
    Toggle { id: String, domain: Domain },

    /// Flip a recipient's subscription to one news feed
    Feed { id: String, feed: String },
}

/// Initialize logging; `--verbose` wins over the configured level.
fn init_logging(verbose: bool, level: &str) {
    let level = if verbose { "debug" } else { level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn format_age(age: Option<std::time::Duration>) -> String {
    match age {
        Some(age) => {
            let mins = age.as_secs() / 60;
            format!("{}h {:02}m ago", mins / 60, mins % 60)
        }
        None => "never".to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging level comes from the file, so read it before validating.
    let level = load_config_file(&config_path(&cli.data_dir))
        .map(|c| c.logging.level)
        .unwrap_or_else(|_| "info".to_string());
    init_logging(cli.verbose, &level);

    if let Command::Validate = cli.command {
        log::info!("Validating configuration...");
        if let Err(e) = load_config(&cli.data_dir) {
            log::error!("Config validation failed: {e}");
            return Err(e);
        }
        log::info!("Config OK");
        return Ok(());
    }

    let config = load_config(&cli.data_dir)?;
    let ctx = AppContext::from_config(config, &cli.data_dir).await?;

    match cli.command {
        Command::Run => {
            log::info!("lendwatch starting...");
            let mut handle = ctx.spawn_scheduler();
            let cancel = ctx.cancel_token();
            let finished = tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    ctx.shutdown();
                    None
                }
                _ = cancel.cancelled() => None,
                joined = &mut handle => Some(joined),
            };
            let joined = match finished {
                Some(joined) => joined,
                None => handle.await,
            };
            if let Err(e) = joined {
                log::error!("Scheduler task failed: {e}");
                ctx.shutdown();
                return Err(AppError::from(e));
            }
        }

        Command::Refresh => match ctx.force_refresh().await {
            RefreshStatus::Completed(report) => {
                println!("Refresh complete: {report}");
                for failure in &report.failed {
                    println!("  {}: {}", failure.domain, failure.message);
                }
            }
            status @ RefreshStatus::AlreadyRunning => println!("{status}"),
        },

        Command::Recipients { action } => match action {
            RecipientAction::List => {
                let recipients = ctx.list_recipients().await;
                if recipients.is_empty() {
                    println!("No recipients registered.");
                }
                for r in recipients {
                    let prefs: Vec<&str> = r.preferences.iter().map(Domain::as_str).collect();
                    if r.feeds.is_empty() {
                        println!("{}  [{}]", r.label(), prefs.join(", "));
                    } else {
                        let feeds: Vec<&str> = r.feeds.iter().map(String::as_str).collect();
                        println!(
                            "{}  [{}] feeds: {}",
                            r.label(),
                            prefs.join(", "),
                            feeds.join(", ")
                        );
                    }
                }
            }
            RecipientAction::Add { id, name } => {
                if ctx.register_recipient(&id, name).await? {
                    println!("Registered {id}");
                } else {
                    println!("{id} is already registered");
                }
            }
            RecipientAction::Remove { id } => match ctx.remove_recipient(&id).await? {
                Some(r) => println!("Removed {}", r.label()),
                None => println!("{id} is not registered"),
            },
            RecipientAction::Toggle { id, domain } => {
                match ctx.toggle_preference(&id, domain).await? {
                    Some(true) => println!("{domain} notifications enabled for {id}"),
                    Some(false) => println!("{domain} notifications disabled for {id}"),
                    None => println!("{id} is not registered"),
                }
            }
            RecipientAction::Feed { id, feed } => match ctx.toggle_feed(&id, &feed).await? {
                Some(true) => println!("{id} subscribed to {feed}"),
                Some(false) => println!("{id} unsubscribed from {feed}"),
                None => println!("{id} is not registered"),
            },
        },

        Command::Info => {
            let info = ctx.status().await;
            println!("Data directory: {}", info.data_dir.display());
            for (domain, age) in &info.snapshot_ages {
                println!("Snapshot {domain}: {}", format_age(*age));
            }
            println!("Sent registry: {} records", info.stats.sent_records);
            println!("Pending delayed: {}", info.stats.pending_items);
            println!("Failed messages: {}", info.failed_messages);
            println!("Recipients: {}", info.recipients);
        }

        Command::Validate => {}
    }

    Ok(())
}
