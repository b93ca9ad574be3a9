//! eventwatch CLI
//!
//! Runs the poll loop, triggers single passes, and manages trackers from the
//! shell with operator permissions.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use eventwatch::{
    commands::{Command as ChatCommand, CommandHandler, Invoker, parse_destination},
    error::{AppError, Result},
    models::{Config, DestinationKind},
    pipeline::{DeliveryEngine, Poller},
    services::EventbriteSource,
    storage::{SqliteStore, TrackerStore},
    transport::{ChannelTransport, DestinationRouter, WebhookTransport},
    utils::http,
};

/// eventwatch - Eventbrite listing watcher
#[derive(Parser, Debug)]
#[command(
    name = "eventwatch",
    version,
    about = "Announces new Eventbrite events to chat channels"
)]
struct Cli {
    /// Directory holding config.toml and the database
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// Config file (default: {data_dir}/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll all trackers on the configured interval until Ctrl-C
    Run,

    /// Run a single pass over all trackers and exit
    Poll,

    /// Start tracking a listing URL for a destination
    Track {
        url: String,
        /// Channel id, <#id> mention or webhook URL
        destination: String,
    },

    /// Stop tracking a listing URL and forget what was announced there
    Untrack { url: String, destination: String },

    /// List tracked URLs, for one destination or grouped by destination
    List { destination: Option<String> },

    /// Show events already announced to a destination
    History { destination: String },

    /// Handle one raw chat message, e.g. "!track <url>"
    Exec {
        text: String,
        /// Channel the message was sent in
        #[arg(long)]
        channel: String,
        /// Sender has the manage-channels permission
        #[arg(long)]
        manage: bool,
    },

    /// Validate configuration
    Validate,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => Config::load(path).map_err(|e| {
            AppError::config(format!("cannot load {}: {}", path.display(), e))
        }),
        None => Ok(Config::load_or_default(cli.data_dir.join("config.toml"))),
    }
}

/// Wire the store, source, transports and poller together.
fn build(config: &Config, data_dir: &Path) -> Result<(Arc<Poller>, CommandHandler)> {
    let store = Arc::new(SqliteStore::open(data_dir.join(&config.storage.database))?);
    let client = http::create_client(&config.source)?;
    let source = Arc::new(EventbriteSource::new(client.clone(), &config.source)?);

    let channel = match std::env::var("BOT_TOKEN") {
        Ok(token) if !token.trim().is_empty() => Some(ChannelTransport::new(
            client.clone(),
            &config.delivery.api_base,
            token.trim(),
        )),
        _ => {
            log::warn!("BOT_TOKEN not set; only webhook destinations can be delivered");
            None
        }
    };
    let router = DestinationRouter::new(channel, WebhookTransport::new(client));
    let delivery = DeliveryEngine::new(Arc::new(router), &config.delivery);

    let poller = Arc::new(Poller::new(store, source, delivery, config.poll.clone()));
    let handler = CommandHandler::new(Arc::clone(&poller), &config.source.allowed_url_prefix);
    Ok((poller, handler))
}

/// Print a command reply; usage and permission errors are replies too.
fn print_reply(reply: Result<String>) -> Result<()> {
    match reply {
        Ok(text) => {
            println!("{text}");
            Ok(())
        }
        Err(AppError::Command(text)) => {
            println!("{text}");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    log::info!("eventwatch starting...");

    let config = load_config(&cli)?;
    if let Err(e) = config.validate() {
        log::error!("Config validation failed: {}", e);
        return Err(e);
    }

    if let Command::Validate = cli.command {
        log::info!("✓ Config OK");
        return Ok(());
    }

    let (poller, handler) = build(&config, &cli.data_dir)?;
    let operator = |destination: &str| Invoker::new(destination, true);

    match cli.command {
        Command::Run => {
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    log::error!("Cannot listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
            };
            poller.run(shutdown).await;
        }

        Command::Poll => {
            if let Some(report) = poller.run_pass().await {
                for (tracker, outcome) in &report.outcomes {
                    match outcome {
                        Ok(r) => println!(
                            "{} -> {}: {} new, {} delivered, {} pending",
                            tracker.source_url,
                            DestinationKind::label(&tracker.destination),
                            r.gate.admitted,
                            r.delivered,
                            r.pending
                        ),
                        Err(e) => println!(
                            "{} -> {}: skipped ({})",
                            tracker.source_url,
                            DestinationKind::label(&tracker.destination),
                            e
                        ),
                    }
                }
            }
        }

        Command::Track { url, destination } => {
            let destination = parse_destination(&destination)?;
            let command = ChatCommand::Track {
                url,
                destination: Some(destination.clone()),
            };
            print_reply(handler.execute(&operator(&destination), command).await)?;
            handler.settle().await;
        }

        Command::Untrack { url, destination } => {
            let destination = parse_destination(&destination)?;
            let command = ChatCommand::Untrack {
                url,
                destination: Some(destination.clone()),
            };
            print_reply(handler.execute(&operator(&destination), command).await)?;
        }

        Command::List { destination } => {
            let destination = destination.as_deref().map(parse_destination).transpose()?;
            let command = ChatCommand::ListTracking { destination };
            print_reply(handler.execute(&operator(""), command).await)?;
        }

        Command::History { destination } => {
            let destination = parse_destination(&destination)?;
            let records = poller.store().processed_for(&destination)?;
            if records.is_empty() {
                println!(
                    "Nothing announced to {} yet",
                    DestinationKind::label(&destination)
                );
            }
            for record in records {
                println!("{}  {}", record.processed_at.to_rfc3339(), record.event_id);
            }
        }

        Command::Exec {
            text,
            channel,
            manage,
        } => {
            let invoker = Invoker::new(channel, manage);
            match handler.handle(&invoker, &text).await {
                Some(reply) => println!("{reply}"),
                None => log::warn!("Not a command: {}", text),
            }
            handler.settle().await;
        }

        Command::Validate => {}
    }

    log::info!("Done!");

    Ok(())
}
