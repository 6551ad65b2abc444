//! idlenotify
//!
//! Watches a coding-agent server's event stream and pings webhooks when a
//! session finishes its turn and sits idle waiting for input.

mod auth;
mod config;
mod dispatcher;
mod logging;
mod runtime;
mod scheduler;
mod session_info;
mod sse;
mod stream_client;
mod tracker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use idlenotify_notifiers::FanOut;
use idlenotify_protocol::{Notification, SessionInfo};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{Config, ConfigOverrides};
use crate::dispatcher::{create_notification_channel, NotificationDispatcher};
use crate::runtime::{create_runtime_channel, stream_listener, NotifierRuntime, RuntimeSettings};
use crate::session_info::SessionInfoCache;
use crate::stream_client::StreamClient;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(
    name = "idlenotify",
    about = "Ping your webhooks when a coding session goes idle",
    version
)]
struct Cli {
    /// Config file (defaults to <config dir>/idlenotify/config.toml)
    #[arg(long, global = true, env = "IDLENOTIFY_CONFIG")]
    config: Option<PathBuf>,

    /// Write logs to <dir>/idlenotify.log instead of stderr
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[arg(long, global = true, env = "IDLENOTIFY_SERVER_URL")]
    server_url: Option<String>,

    #[arg(long, global = true, env = "IDLENOTIFY_SERVER_USERNAME")]
    username: Option<String>,

    #[arg(long, global = true, env = "IDLENOTIFY_SERVER_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Quiet period before an idle session notifies
    #[arg(long, global = true)]
    debounce_ms: Option<u64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch the event stream and notify (default)
    Run,
    /// Validate the config file and print a summary
    CheckConfig,
    /// Send one sample notification to every enabled destination
    TestNotify,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            server_url: self.server_url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            debounce_ms: self.debounce_ms,
        }
    }

    fn load_config(&self) -> anyhow::Result<Config> {
        let path = match &self.config {
            Some(path) => path.clone(),
            None => config::default_config_path()
                .context("no config directory on this platform; pass --config")?,
        };
        config::load(&path, &self.overrides())
            .with_context(|| format!("invalid config {}", path.display()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::CheckConfig) => check_config(&cli),
        Some(Command::TestNotify) => test_notify(&cli).await,
        Some(Command::Run) | None => run(&cli).await,
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    // Config errors are fatal before anything connects.
    let config = cli.load_config()?;
    let logging = logging::init_logging(cli.log_dir.as_deref())?;

    info!(
        component = "main",
        event = "main.starting",
        version = VERSION,
        run_id = %logging.run_id,
        server_url = %config.server_url,
        debounce_ms = config.debounce.as_millis() as u64,
        destinations = config.destinations.len(),
        "Starting idlenotify"
    );

    let stream_http = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()?;
    let notify_http = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(DELIVERY_TIMEOUT)
        .build()?;

    let cancel = CancellationToken::new();

    let (notify_tx, notify_rx) = create_notification_channel();
    let fanout = Arc::new(FanOut::new(notify_http, config.destinations.clone()));
    let dispatcher = tokio::spawn(NotificationDispatcher::new(notify_rx, fanout).run());

    let (runtime_tx, runtime_rx) = create_runtime_channel();
    let info_cache = SessionInfoCache::new(
        stream_http.clone(),
        config.server_url.clone(),
        config.auth.clone(),
    );
    let settings = RuntimeSettings {
        debounce: config.debounce,
        desktop_url: Some(config.desktop_url.clone()),
        notify_idle: config.notify_idle,
        notify_question: config.notify_question,
    };
    let runtime = NotifierRuntime::new(settings, info_cache, runtime_tx.clone(), notify_tx);
    let runtime_task = tokio::spawn(runtime.run(runtime_rx, cancel.clone()));

    let mut client = StreamClient::new(
        stream_http,
        &config.server_url,
        config.auth.clone(),
        cancel.clone(),
    );
    client.subscribe(stream_listener(runtime_tx));
    info!(
        component = "main",
        event = "main.stream_configured",
        stream_url = %client.url(),
        "Event stream configured"
    );

    // The client and runtime share `cancel`, so stopping the client also
    // stops the runtime.
    let client = Arc::new(client);
    tokio::spawn(shutdown_on_signal(client.clone()));
    client.start().await;

    // The runtime owns the last notification sender; once it exits the
    // dispatcher finishes queued and in-flight deliveries and stops.
    if let Err(err) = runtime_task.await {
        warn!(
            component = "main",
            event = "main.runtime_join_failed",
            error = %err,
            "Runtime task failed"
        );
    }
    if tokio::time::timeout(DELIVERY_TIMEOUT, dispatcher).await.is_err() {
        warn!(
            component = "main",
            event = "main.dispatch_abandoned",
            "Gave up waiting for in-flight notifications"
        );
    }

    info!(component = "main", event = "main.stopped", "idlenotify stopped");
    Ok(())
}

async fn shutdown_on_signal(client: Arc<StreamClient>) {
    wait_for_signal().await;
    info!(
        component = "main",
        event = "main.shutdown_signal",
        "Shutdown signal received"
    );
    client.stop();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(err) => {
            warn!(
                component = "main",
                event = "main.sigterm_unavailable",
                error = %err,
                "Could not install SIGTERM handler, listening for Ctrl-C only"
            );
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn check_config(cli: &Cli) -> anyhow::Result<()> {
    let config = cli.load_config()?;

    println!();
    println!("  idlenotify v{}", VERSION);
    println!("  Server:      {}", config.server_url);
    println!(
        "  Auth:        {}",
        if config.auth.is_some() { "basic" } else { "none" }
    );
    println!("  Debounce:    {} ms", config.debounce.as_millis());
    println!("  Desktop URL: {}", config.desktop_url);
    println!(
        "  Notify:      idle={} question={}",
        config.notify_idle, config.notify_question
    );
    println!("  Destinations:");
    for destination in &config.destinations {
        println!(
            "    - {} ({}){}",
            destination.name,
            destination.kind,
            if destination.enabled { "" } else { " [disabled]" }
        );
    }
    println!();
    Ok(())
}

async fn test_notify(cli: &Cli) -> anyhow::Result<()> {
    let config = cli.load_config()?;
    let _logging = logging::init_logging(cli.log_dir.as_deref())?;
    let http = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(DELIVERY_TIMEOUT)
        .build()?;
    let fanout = FanOut::new(http, config.destinations);

    let sample = SessionInfo {
        id: "ses_idlenotify_test".to_string(),
        title: Some("idlenotify test notification".to_string()),
        project_id: "test".to_string(),
        parent_session_id: None,
    };
    let directory = std::env::current_dir()
        .map(|dir| dir.display().to_string())
        .unwrap_or_default();
    let notification = Notification::idle(
        &sample.id,
        &directory,
        Some(&sample),
        Some(&config.desktop_url),
    );

    let report = fanout.dispatch(&notification).await;
    println!();
    println!(
        "  Sent to {} destination(s): {} delivered, {} failed",
        report.attempted,
        report.delivered(),
        report.failed
    );
    println!();

    if report.failed > 0 {
        anyhow::bail!("{} destination(s) failed", report.failed);
    }
    Ok(())
}
