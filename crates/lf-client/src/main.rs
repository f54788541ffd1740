//! lf-feed entry point.
//!
//! Thin: loads layered config and env, builds a [`RealtimeClient`], logs its
//! events, and exits on Ctrl-C or when the server ends the subscription.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use lf_client::{ClientEvent, RealtimeClient};
use lf_config::{
    load_layered_yaml, report_unused_keys, resolve_secrets, FeedSettings, UnusedKeyPolicy,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "lf-feed")]
#[command(about = "Realtime market line feed client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the snapshot, subscribe, and keep the line store reconciled
    Stream {
        /// Layered config paths in merge order (base -> env -> local)
        #[arg(long = "config")]
        config_paths: Vec<String>,

        /// Fail on config keys nothing reads instead of warning.
        #[arg(long, default_value_t = false)]
        strict_config: bool,

        /// Seconds between "still listening" lines.
        #[arg(long, default_value_t = 30)]
        status_every_secs: u64,

        /// Print each event as one JSON line on stdout.
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Reconnect (same store and cursor) when the feed reports a stall.
        #[arg(long, default_value_t = false)]
        reconnect_on_stall: bool,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cli = Cli::parse();
    match cli.cmd {
        Commands::Stream {
            config_paths,
            strict_config,
            status_every_secs,
            json,
            reconnect_on_stall,
        } => {
            let opts = StreamOpts {
                strict_config,
                status_every: Duration::from_secs(status_every_secs.max(1)),
                json,
                reconnect_on_stall,
            };
            stream(&config_paths, opts).await
        }
        Commands::ConfigHash { paths } => {
            let refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = load_layered_yaml(&refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

struct StreamOpts {
    strict_config: bool,
    status_every: Duration,
    json: bool,
    reconnect_on_stall: bool,
}

async fn stream(config_paths: &[String], opts: StreamOpts) -> Result<()> {
    let refs: Vec<&str> = config_paths.iter().map(|s| s.as_str()).collect();
    let loaded = load_layered_yaml(&refs)?;
    info!(config_hash = %loaded.config_hash, layers = refs.len(), "config loaded");

    let policy = if opts.strict_config {
        UnusedKeyPolicy::Fail
    } else {
        UnusedKeyPolicy::Warn
    };
    let report = report_unused_keys(&loaded.config_json, policy)?;
    if !report.is_clean() {
        warn!(keys = ?report.unused_leaf_pointers, "config keys not read by lf-feed");
    }

    let env = |name: &str| std::env::var(name).ok();
    let settings = FeedSettings::from_config_json(&loaded.config_json, env)?;
    let secrets = resolve_secrets(&loaded.config_json, env)?;

    let mut client = RealtimeClient::from_settings(&settings, &secrets)?;
    let mut events = client.subscribe();
    client.connect().await.context("initial connect failed")?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(opts.status_every);
    ticker.tick().await;

    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                res.context("ctrl-c handler failed")?;
                info!("ctrl-c received; closing");
                client.close().await?;
                return Ok(());
            }
            _ = ticker.tick() => {
                info!(
                    lines = client.store().len().await,
                    cursor_ms = ?client.cursor_ms(),
                    at = %Utc::now().to_rfc3339(),
                    "still listening"
                );
            }
            received = events.recv() => match received {
                Ok(event) => {
                    log_event(&event, opts.json)?;
                    match event {
                        ClientEvent::Stalled { .. } if opts.reconnect_on_stall => {
                            warn!("reconnecting after stall");
                            client.reconnect().await.context("reconnect failed")?;
                        }
                        ClientEvent::Disconnected { reason } => {
                            client.wait_closed().await?;
                            if reason.is_clean() {
                                info!(lines = client.store().len().await, "feed ended");
                                return Ok(());
                            }
                            bail!("feed disconnected: {reason:?}");
                        }
                        _ => {}
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event bus lagged; events dropped"),
                Err(RecvError::Closed) => bail!("event bus closed"),
            },
        }
    }
}

fn log_event(event: &ClientEvent, as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string(event).context("event serialize failed")?);
        return Ok(());
    }
    match event {
        ClientEvent::LinesUpdated { source, keys } => {
            debug!(?source, count = keys.len(), "lines updated")
        }
        ClientEvent::GapFillFailed { since_ms, error } => {
            warn!(since_ms, error = %error, "gap-fill failed; live stream continues")
        }
        ClientEvent::SubscriptionError { id, payload } => {
            warn!(?id, ?payload, "subscription error reported by server")
        }
        ClientEvent::Stalled { silent_for_ms } => warn!(silent_for_ms, "no frames; feed may be stalled"),
        other => info!(event = ?other, "feed event"),
    }
    Ok(())
}
