//! TOML configuration for `gradectl`.
//!
//! ```toml
//! [db]
//! path = "./data/grades.sqlite"
//!
//! [grades]
//! enabled = true
//! enabled_for_all_courses = false
//! courses = ["course-v1:edX+DemoX+2024"]
//!
//! [cache]
//! max_courses = 256
//! ttl_secs = 86400
//!
//! [worker]
//! concurrency = 4
//! queue_capacity = 1024
//! max_retries = 2
//! retry_delay_ms = 250
//!
//! [logging]
//! filter = "info"
//! json = false
//! ```
//!
//! Only `[db]` is required.

use anyhow::{Context, Result};
use grade_recompute_core::cache::CacheSettings;
use grade_recompute_core::gate::PersistentGradesFlag;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub grades: PersistentGradesFlag,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_max_courses")]
    pub max_courses: u64,
    /// Zero disables expiry.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_courses: default_max_courses(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn settings(&self) -> CacheSettings {
        CacheSettings {
            max_courses: self.max_courses,
            time_to_live: (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs)),
        }
    }
}

fn default_max_courses() -> u64 {
    256
}
fn default_ttl_secs() -> u64 {
    24 * 3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Extra attempts for a task that failed with a retryable error.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            queue_capacity: default_queue_capacity(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}
fn default_queue_capacity() -> usize {
    1024
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_delay_ms() -> u64 {
    250
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directives; `RUST_LOG` wins when set.
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

fn default_filter() -> String {
    "info".to_string()
}

impl Config {
    /// Defaults for everything except the database location.
    pub fn with_db(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            grades: PersistentGradesFlag::default(),
            cache: CacheConfig::default(),
            worker: WorkerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.cache.max_courses == 0 {
        anyhow::bail!("cache.max_courses must be > 0");
    }

    if config.worker.concurrency == 0 {
        anyhow::bail!("worker.concurrency must be > 0");
    }

    if config.worker.queue_capacity == 0 {
        anyhow::bail!("worker.queue_capacity must be > 0");
    }

    if config.grades.enabled_for_all_courses && !config.grades.courses.is_empty() {
        anyhow::bail!(
            "grades.courses has no effect when grades.enabled_for_all_courses is true; remove one"
        );
    }

    Ok(config)
}
