//! 🚀 esm: the front door, the bouncer, the maitre d' of the migration.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 Loads config, sets up logging, wires Ctrl+C to the cancellation token, then lets
//! the library do the heavy lifting and prints the bill at the end. Like a manager. 🦆

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use esm::{Phase, load_config, render_summary};

const DEFAULT_CONFIG_FILE: &str = "esm.toml";

/// 🚚 Move documents between search clusters, dump files and Logstash.
#[derive(Parser, Debug)]
#[command(name = "esm", version, about, long_about = None)]
struct Args {
    /// TOML config file. Falls back to ./esm.toml when present, then to ESM_* env vars alone.
    #[arg(value_name = "FILE", env = "ESM_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter (e.g. `info`, `esm=debug`). Overrides RUST_LOG.
    #[arg(long, value_name = "FILTER")]
    log_level: Option<String>,
}

fn init_tracing(log_level: Option<&str>) {
    let filter = match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// -- 🔒 an explicit path must exist; the default one is allowed to be missing
fn resolve_config_path(explicit: Option<PathBuf>) -> Result<Option<PathBuf>> {
    match explicit {
        Some(path) => {
            let exists = path.try_exists().with_context(|| {
                format!("💀 couldn't check whether '{}' exists", path.display())
            })?;
            if !exists {
                anyhow::bail!(
                    "💀 config file '{}' doesn't exist. Relative paths are relative to the current directory; an absolute path removes all doubt",
                    path.display()
                );
            }
            Ok(Some(path))
        }
        None => {
            let fallback = Path::new(DEFAULT_CONFIG_FILE);
            Ok(fallback.is_file().then(|| fallback.to_path_buf()))
        }
    }
}

/// 🛑 First SIGINT/SIGTERM cancels the run. The run then drains and reports.
fn cancel_on_signals(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("💀 couldn't listen for Ctrl+C: {err}");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(err) => {
                    error!("💀 couldn't listen for SIGTERM: {err}");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("🛑 Ctrl+C received, wrapping up"),
            _ = terminate => info!("🛑 SIGTERM received, wrapping up"),
        }
        cancel.cancel();
    });
}

// -- 🕵️ sniff the chain like a truffle pig hunting for connection problems
fn looks_like_connection_trouble<'a>(causes: impl Iterator<Item = &'a str>) -> bool {
    const SMELLS: [&str; 6] = [
        "error sending request",
        "connection refused",
        "Connection refused",
        "tcp connect error",
        "dns error",
        "refused the connection",
    ];
    causes
        .into_iter()
        .any(|cause| SMELLS.iter().any(|smell| cause.contains(smell)))
}

fn connection_hint() {
    error!(
        "🔧 hint: looks like a service isn't reachable. \
        Double-check that the cluster (or Logstash) is actually running and the URL is right. \
        If you're using Docker, `docker ps` shows what's up. ☕"
    );
}

async fn run(args: Args) -> Result<bool> {
    let config_path = resolve_config_path(args.config)?;
    let app_config = load_config(config_path.as_deref())
        .context("💀 couldn't load the configuration; check the TOML and any ESM_* variables")?;

    let cancel = CancellationToken::new();
    cancel_on_signals(cancel.clone());

    let report = esm::run(app_config, cancel).await?;
    println!("{}", render_summary(&report));

    if report.phase == Phase::Done {
        return Ok(true);
    }
    if let Some(cause) = &report.cause {
        error!("💀 migration failed: {cause}");
        if looks_like_connection_trouble(std::iter::once(cause.as_str())) {
            connection_hint();
        }
    }
    Ok(false)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref());

    match run(args).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            error!("💀 error: {err}");
            // -- 🧅 peel the onion of sadness, one layer at a time
            let causes: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
            for cause in &causes {
                error!("⚠️  cause: {cause}");
            }
            if looks_like_connection_trouble(causes.iter().map(String::as_str)) {
                connection_hint();
            }
            // 🗑️ Exit with prejudice. Process exitus maximus.
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_a_refused_connection_earns_a_hint() {
        assert!(looks_like_connection_trouble(
            ["📡 transport failure: error sending request for url"].into_iter()
        ));
        assert!(!looks_like_connection_trouble(
            ["🔧 configuration rejected: workers must be at least 1"].into_iter()
        ));
    }

    #[test]
    fn the_one_where_a_missing_explicit_config_is_an_error() {
        let missing = PathBuf::from("/definitely/not/here/esm.toml");
        assert!(resolve_config_path(Some(missing)).is_err());
    }

    #[test]
    fn the_one_where_flags_parse() -> anyhow::Result<()> {
        let args = Args::try_parse_from(["esm", "migrate.toml", "--log-level", "esm=debug"])?;
        assert_eq!(args.config, Some(PathBuf::from("migrate.toml")));
        assert_eq!(args.log_level.as_deref(), Some("esm=debug"));
        Ok(())
    }
}
