use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::Settings;
use crate::limits::*;
use crate::model::MINUTE_MS;
use crate::pricing::BookingWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockProvider {
    /// Lock table inside the engine's store. Single process only.
    Store,
    Redis,
}

impl FromStr for LockProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "store" | "db" => Ok(LockProvider::Store),
            "redis" => Ok(LockProvider::Redis),
            other => Err(ConfigError::UnknownLockProvider(other.to_string())),
        }
    }
}

impl std::fmt::Display for LockProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LockProvider::Store => "store",
            LockProvider::Redis => "redis",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    UnknownLockProvider(String),
    Invalid { var: &'static str, value: String },
    MissingRedisUrl,
    BookingWindow { utc_offset_minutes: i32, cutoff_hour: u32 },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::UnknownLockProvider(p) => {
                write!(f, "unknown lock provider {p:?}, expected store or redis")
            }
            ConfigError::Invalid { var, value } => write!(f, "invalid value for {var}: {value:?}"),
            ConfigError::MissingRedisUrl => {
                write!(f, "PARKD_REDIS_URL is required when PARKD_LOCK_PROVIDER=redis")
            }
            ConfigError::BookingWindow {
                utc_offset_minutes,
                cutoff_hour,
            } => write!(
                f,
                "invalid booking window: offset {utc_offset_minutes} minutes, cutoff hour {cutoff_hour}"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub lock_provider: LockProvider,
    pub redis_url: Option<String>,
    pub lock_ttl_ms: u64,
    pub lock_wait_ms: u64,
    pub sweep_interval_secs: u64,
    pub no_show_minutes: i64,
    pub cutoff_hour: u32,
    pub utc_offset_minutes: i32,
    pub compact_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            lock_provider: LockProvider::Store,
            redis_url: None,
            lock_ttl_ms: DEFAULT_LOCK_TTL_MS,
            lock_wait_ms: DEFAULT_LOCK_WAIT_MS,
            sweep_interval_secs: 60,
            no_show_minutes: DEFAULT_NO_SHOW_GRACE_MS / MINUTE_MS,
            cutoff_hour: DEFAULT_CUTOFF_HOUR,
            utc_offset_minutes: DEFAULT_UTC_OFFSET_MINUTES,
            compact_threshold: 1000,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Config::default();
        let config = Config {
            data_dir: lookup("PARKD_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            metrics_port: parsed(&lookup, "PARKD_METRICS_PORT")?,
            lock_provider: parsed(&lookup, "PARKD_LOCK_PROVIDER")?.unwrap_or(d.lock_provider),
            redis_url: lookup("PARKD_REDIS_URL").filter(|s| !s.is_empty()),
            lock_ttl_ms: parsed(&lookup, "PARKD_LOCK_TTL_MS")?.unwrap_or(d.lock_ttl_ms),
            lock_wait_ms: parsed(&lookup, "PARKD_LOCK_WAIT_MS")?.unwrap_or(d.lock_wait_ms),
            sweep_interval_secs: parsed(&lookup, "PARKD_SWEEP_INTERVAL_SECS")?
                .unwrap_or(d.sweep_interval_secs),
            no_show_minutes: parsed(&lookup, "PARKD_NO_SHOW_MINUTES")?.unwrap_or(d.no_show_minutes),
            cutoff_hour: parsed(&lookup, "PARKD_CUTOFF_HOUR")?.unwrap_or(d.cutoff_hour),
            utc_offset_minutes: parsed(&lookup, "PARKD_UTC_OFFSET_MINUTES")?
                .unwrap_or(d.utc_offset_minutes),
            compact_threshold: parsed(&lookup, "PARKD_COMPACT_THRESHOLD")?
                .unwrap_or(d.compact_threshold),
        };
        if config.lock_provider == LockProvider::Redis && config.redis_url.is_none() {
            return Err(ConfigError::MissingRedisUrl);
        }
        if config.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "PARKD_SWEEP_INTERVAL_SECS",
                value: "0".into(),
            });
        }
        Ok(config)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("parkd.wal")
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn engine_settings(&self) -> Result<Settings, ConfigError> {
        let window = BookingWindow::new(self.utc_offset_minutes, self.cutoff_hour).ok_or(
            ConfigError::BookingWindow {
                utc_offset_minutes: self.utc_offset_minutes,
                cutoff_hour: self.cutoff_hour,
            },
        )?;
        Ok(Settings {
            lock_ttl: Duration::from_millis(self.lock_ttl_ms),
            lock_wait: Duration::from_millis(self.lock_wait_ms),
            no_show_grace_ms: self.no_show_minutes.max(0) * MINUTE_MS,
            window,
        })
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) if value.trim().is_empty() => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}
