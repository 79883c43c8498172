//! Configuration for gitdrive.
//!
//! Settings are read from an optional TOML file and then overridden by
//! command-line flags in the binary. The resulting [`SyncConfig`] is
//! immutable for the lifetime of the process.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config file
// ---------------------------------------------------------------------------

/// Contents of a gitdrive config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Sync protocol and notification settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging settings (consumed by the binary).
    #[serde(default)]
    pub log: LogConfig,
}

// ---------------------------------------------------------------------------
// Sync section
// ---------------------------------------------------------------------------

/// Per-run sync settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Name of the upstream remote (default `origin`).
    pub remote: String,

    /// Local branch kept in sync with `<remote>/<branch>` (default `master`).
    pub branch: String,

    /// The git working directory to keep in sync. Defaults to the current
    /// directory.
    pub watch_dir: PathBuf,

    /// Run a single sync cycle and exit.
    pub once: bool,

    /// Time between successive sync attempts.
    #[serde(with = "duration_str")]
    pub interval: Duration,

    /// Deliver desktop notifications (via `notify-send`).
    pub notify: bool,

    /// Time during which repeated notifications of the same event are
    /// suppressed.
    #[serde(with = "duration_str")]
    pub notify_dedup_interval: Duration,

    /// Which side wins a conflicting hunk during rebase.
    pub conflict_policy: ConflictPolicy,

    /// Treat a failed push as a cycle error instead of logging it.
    pub strict_push: bool,

    /// Kill any single git command running longer than this. Unset means
    /// commands may run indefinitely.
    #[serde(with = "opt_duration_str", skip_serializing_if = "Option::is_none")]
    pub command_timeout: Option<Duration>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote: "origin".into(),
            branch: "master".into(),
            watch_dir: default_watch_dir(),
            once: false,
            interval: Duration::from_secs(60),
            notify: true,
            notify_dedup_interval: Duration::from_secs(60 * 60),
            conflict_policy: ConflictPolicy::default(),
            strict_push: false,
            command_timeout: None,
        }
    }
}

fn default_watch_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

impl SyncConfig {
    /// Validate that all fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.remote.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "sync.remote".into(),
                detail: "remote name must not be empty".into(),
            });
        }
        if self.branch.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "sync.branch".into(),
                detail: "branch name must not be empty".into(),
            });
        }
        if self.watch_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "sync.watch_dir".into(),
                detail: "watch directory must not be empty".into(),
            });
        }
        if self.interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "sync.interval".into(),
                detail: "interval must be > 0".into(),
            });
        }
        if self.command_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::InvalidValue {
                field: "sync.command_timeout".into(),
                detail: "command timeout must be > 0 when set".into(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Conflict policy
// ---------------------------------------------------------------------------

/// Which side's text is kept for a conflicting hunk when a rebase stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Keep the local commit being replayed.
    #[default]
    PreferLocal,
    /// Keep the upstream commit being rebased onto.
    PreferRemote,
}

impl ConflictPolicy {
    /// The `git merge-file` flag implementing this policy during a rebase.
    ///
    /// While rebasing, index stage 2 ("ours") holds the upstream side and
    /// stage 3 ("theirs") holds the local commit being replayed.
    pub fn merge_file_flag(self) -> &'static str {
        match self {
            Self::PreferLocal => "--theirs",
            Self::PreferRemote => "--ours",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreferLocal => write!(f, "prefer_local"),
            Self::PreferRemote => write!(f, "prefer_remote"),
        }
    }
}

impl FromStr for ConflictPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "prefer_local" | "local" => Ok(Self::PreferLocal),
            "prefer_remote" | "remote" => Ok(Self::PreferRemote),
            other => Err(ConfigError::InvalidValue {
                field: "sync.conflict_policy".into(),
                detail: format!("'{}' (valid: prefer_local, prefer_remote)", other),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging section
// ---------------------------------------------------------------------------

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    pub level: String,

    /// Directory for a daily-rotated log file, in addition to stdout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            dir: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Generate a default TOML config template string.
    pub fn default_template() -> &'static str {
        r#"# gitdrive configuration

[sync]
remote = "origin"
branch = "master"
# watch_dir = "/home/me/notes"   # defaults to the current directory
once = false
interval = "1m"
notify = true
notify_dedup_interval = "1h"
# prefer_local keeps the local side of a conflicting hunk during rebase
conflict_policy = "prefer_local"
# escalate push failures to cycle errors
strict_push = false
# command_timeout = "5m"          # unset: no timeout

[log]
level = "info"
# dir = "/home/me/.local/state/gitdrive"
"#
    }
}

// ---------------------------------------------------------------------------
// Durations
// ---------------------------------------------------------------------------

/// Parse a duration string such as `90s`, `5m`, `1h`, `2d` or `1500ms`.
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let trimmed = s.trim().to_lowercase();
    let invalid = || ConfigError::InvalidDuration(s.to_string());

    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (num_str, unit) = trimmed.split_at(split);
    let num: u64 = num_str.parse().map_err(|_| invalid())?;

    let secs = |scale: u64| num.checked_mul(scale).map(Duration::from_secs).ok_or_else(invalid);
    match unit.trim() {
        "ms" => Ok(Duration::from_millis(num)),
        "" | "s" => secs(1),
        "m" => secs(60),
        "h" => secs(60 * 60),
        "d" => secs(24 * 60 * 60),
        _ => Err(invalid()),
    }
}

/// Format a duration in the largest unit that represents it exactly.
pub fn format_duration(d: Duration) -> String {
    if d.subsec_millis() != 0 || d.as_secs() == 0 {
        return format!("{}ms", d.as_millis());
    }
    let secs = d.as_secs();
    for (unit, size) in [("d", 86_400), ("h", 3_600), ("m", 60)] {
        if secs % size == 0 {
            return format!("{}{}", secs / size, unit);
        }
    }
    format!("{}s", secs)
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

mod opt_duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_str(&super::format_duration(*d)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        raw.map(|r| super::parse_duration(&r).map_err(serde::de::Error::custom))
            .transpose()
    }
}
