use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::executor::{ExecutorSettings, RetryPolicy};

pub const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding plans, execution states, staging and the last snapshot.
    pub state_dir: String,
    /// Local mirror of the remote storage tree, read by the local adapter.
    pub source_root: String,
    /// Where the local adapter writes uploaded composite artifacts.
    pub output_root: String,
    /// Current inventory written by `scan` and read by `plan`.
    pub inventory_path: String,
    /// Matcher output mapping each group to its folder.
    pub membership_path: String,
    pub key_scheme: String,
    pub ignore_patterns: Vec<String>,
    pub planner: PlannerConfig,
    pub executor: ExecutorConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub size_ceiling_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub group_concurrency: usize,
    pub task_concurrency: usize,
    pub task_timeout_secs: u64,
    pub group_timeout_secs: u64,
    pub max_task_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub max_group_retries: u32,
    /// Upper bound on groups claimed by one run; 0 means no bound.
    pub groups_per_run: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Program and arguments spawned once per completed group, with the group id appended.
    pub command: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            state_dir: "./state".to_string(),
            source_root: "./mirror".to_string(),
            output_root: "./output".to_string(),
            inventory_path: "./state/inventory.jsonl".to_string(),
            membership_path: "./matching_results.json".to_string(),
            key_scheme: "relative-path".to_string(),
            ignore_patterns: Vec::new(),
            planner: PlannerConfig::default(),
            executor: ExecutorConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            size_ceiling_mb: 150,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            group_concurrency: 2,
            task_concurrency: 10,
            task_timeout_secs: 300,
            group_timeout_secs: 3600,
            max_task_retries: 3,
            backoff_base_ms: 1000,
            backoff_max_ms: 30_000,
            max_group_retries: 5,
            groups_per_run: 2,
        }
    }
}

impl AppConfig {
    pub fn state_dir(&self) -> PathBuf {
        PathBuf::from(&self.state_dir)
    }

    pub fn size_ceiling_bytes(&self) -> u64 {
        self.planner.size_ceiling_mb.saturating_mul(BYTES_PER_MB)
    }
}

impl ExecutorConfig {
    pub fn settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            group_concurrency: self.group_concurrency.max(1),
            task_concurrency: self.task_concurrency.max(1),
            task_timeout: Duration::from_secs(self.task_timeout_secs),
            group_timeout: Duration::from_secs(self.group_timeout_secs),
            retry: RetryPolicy::new(
                self.max_task_retries,
                Duration::from_millis(self.backoff_base_ms),
                Duration::from_millis(self.backoff_max_ms),
            ),
        }
    }
}

/// Load `Config.toml` (optional) and `COLLATE_*` environment overrides.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(
            Environment::with_prefix("COLLATE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_constants() {
        let config = AppConfig::default();
        assert_eq!(config.size_ceiling_bytes(), 150 * 1024 * 1024);

        let settings = config.executor.settings();
        assert_eq!(settings.group_concurrency, 2);
        assert_eq!(settings.task_concurrency, 10);
        assert_eq!(settings.retry.max_retries, 3);
        assert_eq!(settings.task_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let executor = ExecutorConfig {
            group_concurrency: 0,
            task_concurrency: 0,
            ..ExecutorConfig::default()
        };
        let settings = executor.settings();
        assert_eq!(settings.group_concurrency, 1);
        assert_eq!(settings.task_concurrency, 1);
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config: AppConfig = Config::builder()
            .add_source(config::File::from_str(
                "state_dir = \"/tmp/collate\"\n[planner]\nsize_ceiling_mb = 10\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.state_dir, "/tmp/collate");
        assert_eq!(config.planner.size_ceiling_mb, 10);
        assert_eq!(config.executor.groups_per_run, 2);
    }
}
