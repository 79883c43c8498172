//! gitdrive entry point.
//!
//! Continuously syncs modifications to git-tracked files with the upstream
//! remote: local edits are committed, remote changes are rebased in, and the
//! result is pushed. The remote needs to be set up for password-less push.

mod logging;
mod signals;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use gitdrive_core::config::{parse_duration, AppConfig, ConflictPolicy};
use gitdrive_core::Synchronizer;

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// Keep a git working directory continuously synced with its upstream.
#[derive(Parser, Debug)]
#[command(name = "gitdrive", version, about)]
struct Args {
    /// Directory to keep in sync (default: current directory).
    #[arg(value_name = "WATCH_DIR", conflicts_with = "watch_dir_flag")]
    watch_dir: Option<PathBuf>,

    /// Directory to keep in sync (same as the positional argument).
    #[arg(long = "watch-dir", value_name = "DIR")]
    watch_dir_flag: Option<PathBuf>,

    /// Path to the TOML configuration file
    /// (default: <config dir>/gitdrive/config.toml, if present).
    #[arg(short, long)]
    config: Option<String>,

    /// Remote to sync with.
    #[arg(long)]
    remote: Option<String>,

    /// Local branch to sync with the remote.
    #[arg(long)]
    branch: Option<String>,

    /// Sync once and exit instead of watching.
    #[arg(long)]
    once: bool,

    /// Time between sync attempts (e.g. 30s, 5m).
    #[arg(long, value_parser = parse_duration_arg)]
    interval: Option<Duration>,

    /// Disable desktop notifications.
    #[arg(long)]
    no_notify: bool,

    /// Time during which duplicate notifications are suppressed.
    #[arg(long, value_parser = parse_duration_arg)]
    notify_dedup_interval: Option<Duration>,

    /// Side kept for conflicting hunks: prefer_local or prefer_remote.
    #[arg(long)]
    conflict_policy: Option<ConflictPolicy>,

    /// Fail the sync cycle when the push fails.
    #[arg(long)]
    strict_push: bool,

    /// Kill any git command running longer than this.
    #[arg(long, value_parser = parse_duration_arg)]
    command_timeout: Option<Duration>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Also write a daily-rotated log file to this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Print a documented config file template and exit.
    #[arg(long)]
    print_config_template: bool,
}

fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config_template {
        print!("{}", AppConfig::default_template());
        return Ok(());
    }

    let config_path = resolve_config_path(args.config.as_deref());
    let config = match load_config(config_path.as_deref(), &args) {
        Ok(config) => config,
        Err(e) => {
            // No configured log destination yet: report on stdout at the
            // requested level.
            let level = args.log_level.as_deref().unwrap_or("info");
            let _log_guard = logging::init(level, None)?;
            error!("{:#}", e);
            return Err(e);
        }
    };

    let _log_guard = logging::init(&config.log.level, config.log.dir.as_deref())?;

    // Startup banner
    info!("========================================");
    info!("  gitdrive v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    match &config_path {
        Some(path) => info!("Config file   : {}", path.display()),
        None => info!("Config file   : (defaults)"),
    }
    info!("Watch dir     : {}", config.sync.watch_dir.display());
    info!("Remote/branch : {}/{}", config.sync.remote, config.sync.branch);
    if config.sync.once {
        info!("Mode          : once");
    } else {
        info!("Mode          : every {}s", config.sync.interval.as_secs());
    }
    info!("Notifications : {}", config.sync.notify);
    info!("Conflicts     : {}", config.sync.conflict_policy);
    info!("Log level     : {}", config.log.level);
    info!("========================================");
    match config.to_toml() {
        Ok(toml) => debug!("effective configuration:\n{}", toml),
        Err(e) => debug!(error = %e, "could not render effective configuration"),
    }

    let shutdown = CancellationToken::new();
    let mut synchronizer = match Synchronizer::from_config(config.sync, shutdown.clone()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "startup failed");
            return Err(e).context("cannot start gitdrive");
        }
    };

    signals::cancel_on_shutdown(shutdown.clone());
    synchronizer.run(&shutdown).await;

    info!("gitdrive stopped.");
    Ok(())
}

// ---------------------------------------------------------------------------
// Configuration resolution
// ---------------------------------------------------------------------------

/// `--config` if given, else the per-user config file if it exists.
fn resolve_config_path(flag: Option<&str>) -> Option<PathBuf> {
    match flag {
        Some(path) => Some(expand_tilde(path)),
        None => dirs::config_dir()
            .map(|dir| dir.join("gitdrive").join("config.toml"))
            .filter(|path| path.is_file()),
    }
}

/// Read the config file (or defaults), apply flags and validate the result.
fn load_config(path: Option<&Path>, args: &Args) -> Result<AppConfig> {
    let mut config = match path {
        Some(path) => AppConfig::load_from_file(path).context("failed to load configuration file")?,
        None => AppConfig::default(),
    };
    apply_overrides(&mut config, args);
    config.sync.validate().context("configuration validation failed")?;
    Ok(config)
}

/// Command-line flags win over the config file.
fn apply_overrides(config: &mut AppConfig, args: &Args) {
    let sync = &mut config.sync;

    if let Some(dir) = args.watch_dir.as_ref().or(args.watch_dir_flag.as_ref()) {
        sync.watch_dir = dir.clone();
    }
    sync.watch_dir = absolute(&expand_tilde(&sync.watch_dir.to_string_lossy()));

    if let Some(remote) = &args.remote {
        sync.remote = remote.clone();
    }
    if let Some(branch) = &args.branch {
        sync.branch = branch.clone();
    }
    if args.once {
        sync.once = true;
    }
    if let Some(interval) = args.interval {
        sync.interval = interval;
    }
    if args.no_notify {
        sync.notify = false;
    }
    if let Some(window) = args.notify_dedup_interval {
        sync.notify_dedup_interval = window;
    }
    if let Some(policy) = args.conflict_policy {
        sync.conflict_policy = policy;
    }
    if args.strict_push {
        sync.strict_push = true;
    }
    if args.command_timeout.is_some() {
        sync.command_timeout = args.command_timeout;
    }

    if let Some(level) = &args.log_level {
        config.log.level = level.clone();
    }
    if let Some(dir) = &args.log_dir {
        config.log.dir = Some(dir.clone());
    }
    if let Some(dir) = config.log.dir.take() {
        config.log.dir = Some(expand_tilde(&dir.to_string_lossy()));
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Resolve `path` against the current directory so the watcher identity is
/// stable. Missing paths are left as they are for validation to report.
fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
