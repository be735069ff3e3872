//! webticks - command line tool for the webticks tracker
//!
//! This tool provides commands for:
//! - Checking the effective tracker configuration
//! - Sending a one-off custom event to the collection endpoint
//! - Reporting a server request, as a request handler would
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/webticks/config.toml (~/.config/webticks/config.toml)
//! - Logs: $XDG_STATE_HOME/webticks/webticks.log (~/.local/state/webticks/webticks.log)

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use webticks_core::{Config, FlushOutcome, ServerRequest, Tracker};

#[derive(Parser)]
#[command(name = "webticks")]
#[command(about = "Inspect webticks configuration and send events")]
#[command(version)]
struct Args {
    /// Config file (default: $XDG_CONFIG_HOME/webticks/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override tracker.destination_url
    #[arg(short, long, global = true)]
    destination: Option<String>,

    /// Also print logs to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the effective tracker configuration
    Status,

    /// Record one custom event and flush it
    Send {
        /// Event name (e.g. button_click)
        name: String,

        /// Event detail as key=value; values are parsed as JSON when possible
        #[arg(long = "detail", value_name = "KEY=VALUE")]
        details: Vec<String>,
    },

    /// Record one server request and flush it
    Request {
        /// HTTP method
        #[arg(short, long, default_value = "GET")]
        method: String,

        /// Request path
        #[arg(short, long)]
        path: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };
    if let Some(destination) = args.destination {
        config.tracker.destination_url = destination;
    }

    // Held until exit so buffered log lines are written
    let _log_guard = webticks_core::logging::init(&config, args.verbose)
        .context("failed to initialize logging")?;

    match args.command {
        Command::Status => cmd_status(&config, args.config),
        Command::Send { name, details } => {
            let details = parse_details(&details)?;
            run_and_flush(&config, |tracker| {
                tracker.record_custom_event(name.as_str(), Value::Object(details));
            })
        }
        Command::Request { method, path } => run_and_flush(&config, |tracker| {
            tracker.record_server_request(ServerRequest::new(method.to_uppercase(), path.as_str()));
        }),
    }
}

fn cmd_status(config: &Config, explicit_path: Option<PathBuf>) -> Result<()> {
    let tracker = &config.tracker;
    let config_path = explicit_path.unwrap_or_else(Config::config_path);

    println!("webticks Configuration");
    println!("======================");
    println!();
    println!(
        "Config file:     {}{}",
        config_path.display(),
        if config_path.exists() { "" } else { " (not found, using defaults)" }
    );
    println!("Destination:     {}", tracker.destination_url);
    println!(
        "App ID:          {}",
        tracker.app_id.as_deref().unwrap_or("<not set>")
    );
    println!("Debug:           {}", tracker.debug);
    println!("Flush Interval:  {}ms", tracker.flush_interval_ms);
    println!("Max Queue Size:  {}", tracker.max_queue_size);
    println!("Timeout:         {}s", tracker.timeout_secs);
    println!("Log file:        {}", Config::log_path().display());

    if tracker.destination_url.starts_with('/') {
        println!();
        println!("Destination is relative. It resolves against the page URL in a browser,");
        println!("but server-side delivery needs an absolute URL:");
        println!();
        println!("  [tracker]");
        println!("  destination_url = \"https://collect.example.com/api/track\"");
    }

    Ok(())
}

/// Build a server tracker, record through `record`, then flush once.
fn run_and_flush(config: &Config, record: impl FnOnce(&Tracker)) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create async runtime")?;

    let tracker =
        Tracker::for_server(config.tracker.clone()).context("failed to create tracker")?;
    record(&tracker);

    match runtime.block_on(tracker.flush()) {
        FlushOutcome::Committed { sent } => {
            println!("Sent {} event(s) to {}", sent, config.tracker.destination_url);
            Ok(())
        }
        FlushOutcome::Requeued { pending, .. } => {
            tracing::warn!(pending, "Batch was not delivered");
            bail!(
                "batch was not delivered to {} ({} event(s) still queued)",
                config.tracker.destination_url,
                pending
            )
        }
        FlushOutcome::Idle => {
            println!("Nothing to send");
            Ok(())
        }
    }
}

/// Parse `key=value` pairs into a JSON object.
fn parse_details(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut details = Map::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("invalid detail {:?}, expected KEY=VALUE", pair);
        };
        if key.is_empty() {
            bail!("invalid detail {:?}, key is empty", pair);
        }
        let value =
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        details.insert(key.to_string(), value);
    }
    Ok(details)
}
