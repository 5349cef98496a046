use std::io::BufRead;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use ratekeeper::config::{LoggingConfig, ServiceConfig};
use ratekeeper::ratelimit::{ClientKey, CleanupTask, Decision, RateLimiter, RulesConfig};

/// Line-oriented admission filter.
///
/// Reads `client [resource]` lines from stdin and prints one decision per line.
#[derive(Parser, Debug)]
#[command(name = "ratekeeper", version, about)]
struct Args {
    /// Service configuration file (YAML)
    #[arg(short, long)]
    config: Option<String>,

    /// Rate limit rules file (YAML); overrides `limiter.rules_path`
    #[arg(short, long)]
    rules: Option<String>,

    /// Print decisions as JSON lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = ServiceConfig::load(args.config.as_deref())?;

    init_tracing(&config.logging);

    info!("Starting Ratekeeper");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let rate_limiter = Arc::new(RateLimiter::with_config(&config.limiter)?);

    if let Some(path) = args.rules.as_deref().or(config.limiter.rules_path.as_deref()) {
        let rules = RulesConfig::from_file(path)?;
        let loaded = rate_limiter.load_rules(&rules)?;
        info!(path = %path, loaded = loaded, "Rules loaded");
        for (key, limit) in rate_limiter.limits() {
            debug!(
                key = %key,
                max_requests = limit.max_requests,
                window = ?limit.window,
                name = ?limit.name,
                "Configured limit"
            );
        }
    } else {
        warn!("No rules file configured; only the default limit applies");
    }

    let cleanup = CleanupTask::spawn(
        rate_limiter.clone(),
        Duration::from_millis(config.limiter.cleanup_interval_ms),
    );

    let lines = spawn_stdin_reader();

    tokio::select! {
        result = filter_lines(&rate_limiter, lines, args.json) => result?,
        _ = shutdown_signal() => {}
    }

    cleanup.shutdown().await;
    info!("Ratekeeper stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    // Decisions go to stdout, so logs go to stderr.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Read stdin on a dedicated thread.
///
/// A blocked read on this thread never holds up runtime shutdown; the thread
/// is detached and dies with the process.
fn spawn_stdin_reader() -> mpsc::Receiver<std::io::Result<String>> {
    let (tx, rx) = mpsc::channel(64);
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let failed = line.is_err();
            if tx.blocking_send(line).is_err() || failed {
                break;
            }
        }
    });
    rx
}

/// Answer one input line at a time until EOF.
async fn filter_lines(
    rate_limiter: &RateLimiter,
    mut lines: mpsc::Receiver<std::io::Result<String>>,
    as_json: bool,
) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.recv().await {
        let line = line?;
        let mut parts = line.split_whitespace();
        let Some(client) = parts.next() else {
            continue;
        };
        let key = match parts.next() {
            Some(resource) => ClientKey::with_resource(client, resource),
            None => ClientKey::new(client),
        };

        let output = match rate_limiter.check(&key) {
            Ok(decision) => render(&key, &decision, as_json),
            Err(e) if as_json => json!({ "key": key.to_string(), "error": e.to_string() }).to_string(),
            Err(e) => format!("error {}", e),
        };

        stdout.write_all(output.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    info!("Input closed");
    Ok(())
}

fn render(key: &ClientKey, decision: &Decision, as_json: bool) -> String {
    match (decision, as_json) {
        (Decision::Allowed { remaining }, false) => format!("allow {} remaining={}", key, remaining),
        (Decision::Denied { retry_after }, false) => {
            format!("deny {} retry_after_ms={}", key, retry_after.as_millis())
        }
        (Decision::Unconfigured, false) => format!("unconfigured {}", key),
        (Decision::Allowed { remaining }, true) => {
            json!({ "key": key.to_string(), "decision": "allow", "remaining": remaining }).to_string()
        }
        (Decision::Denied { retry_after }, true) => json!({
            "key": key.to_string(),
            "decision": "deny",
            "retry_after_ms": retry_after.as_millis() as u64,
        })
        .to_string(),
        (Decision::Unconfigured, true) => {
            json!({ "key": key.to_string(), "decision": "unconfigured" }).to_string()
        }
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
