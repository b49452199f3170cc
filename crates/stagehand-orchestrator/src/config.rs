//! Run configuration.
//!
//! A run is described in YAML: an optional pre-step command, an ordered list
//! of stages, shutdown timings, and probe settings. Durations are written as
//! strings with a unit suffix (`500ms`, `30s`, `2m`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Command run to completion before stage 0. Non-zero exit aborts the
    /// run without starting any stage.
    #[serde(default)]
    pub pre_step: Option<CommandConfig>,

    /// Stages in startup order.
    pub stages: Vec<StageConfig>,

    #[serde(default)]
    pub shutdown: ShutdownConfig,

    #[serde(default)]
    pub probe: ProbeConfig,
}

/// One command with its launch context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    pub executable: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

/// A set of processes launched together, gated from the next stage by
/// readiness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub processes: Vec<ProcessEntry>,
}

impl StageConfig {
    /// Display label: the declared name or the positional index.
    pub fn label(&self, index: usize) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("stage-{}", index),
        }
    }
}

/// One managed process definition within a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub name: String,
    pub executable: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    #[serde(default)]
    pub environment: HashMap<String, String>,

    /// Port the process is expected to listen on. Absent means the process
    /// is considered ready immediately after spawn.
    #[serde(default)]
    pub listen_port: Option<u16>,

    #[serde(
        default = "default_readiness_timeout",
        with = "duration_serde"
    )]
    pub readiness_timeout: Duration,
}

/// Two-phase shutdown timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    #[serde(
        default = "default_grace_period",
        with = "duration_serde"
    )]
    pub grace_period: Duration,

    #[serde(
        default = "default_force_kill_timeout",
        with = "duration_serde"
    )]
    pub force_kill_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period: default_grace_period(),
            force_kill_timeout: default_force_kill_timeout(),
        }
    }
}

/// Readiness probe settings shared by all checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_host")]
    pub host: String,

    #[serde(
        default = "default_poll_interval",
        with = "duration_serde"
    )]
    pub poll_interval: Duration,

    #[serde(
        default = "default_connect_timeout",
        with = "duration_serde"
    )]
    pub connect_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            host: default_probe_host(),
            poll_interval: default_poll_interval(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl RunConfig {
    /// Load configuration from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        Self::load_from_string(&content)
    }

    /// Load configuration from a YAML string.
    pub fn load_from_string(content: &str) -> Result<Self> {
        let config: RunConfig =
            serde_yaml::from_str(content).context("Failed to parse YAML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints after parsing.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.stages.is_empty(), "at least one stage is required");

        let mut seen = HashSet::new();
        for (idx, stage) in self.stages.iter().enumerate() {
            anyhow::ensure!(
                !stage.processes.is_empty(),
                "{} has no processes",
                stage.label(idx)
            );
            for entry in &stage.processes {
                anyhow::ensure!(
                    !entry.name.is_empty(),
                    "{} has a process with an empty name",
                    stage.label(idx)
                );
                anyhow::ensure!(
                    !entry.executable.is_empty(),
                    "process {} has an empty executable",
                    entry.name
                );
                anyhow::ensure!(
                    seen.insert(entry.name.clone()),
                    "duplicate process name: {}",
                    entry.name
                );
                anyhow::ensure!(
                    entry.readiness_timeout > Duration::ZERO,
                    "process {} has a zero readiness timeout",
                    entry.name
                );
            }
        }

        anyhow::ensure!(
            self.shutdown.grace_period > Duration::ZERO,
            "shutdown grace period must be positive"
        );
        anyhow::ensure!(
            self.probe.poll_interval > Duration::ZERO,
            "probe poll interval must be positive"
        );
        Ok(())
    }

    /// All process names, in stage order.
    pub fn process_names(&self) -> Vec<String> {
        self.stages
            .iter()
            .flat_map(|s| s.processes.iter().map(|p| p.name.clone()))
            .collect()
    }
}

fn default_readiness_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_grace_period() -> Duration {
    Duration::from_secs(5)
}

fn default_force_kill_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_probe_host() -> String {
    "127.0.0.1".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(1)
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() != 0 {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        } else {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    fn parse_duration(s: &str) -> Result<Duration, String> {
        // "ms" must be checked before "s".
        if let Some(num) = s.strip_suffix("ms") {
            let millis: u64 = num.parse().map_err(|_| format!("Invalid duration: {}", s))?;
            Ok(Duration::from_millis(millis))
        } else if let Some(num) = s.strip_suffix('s') {
            let secs: u64 = num.parse().map_err(|_| format!("Invalid duration: {}", s))?;
            Ok(Duration::from_secs(secs))
        } else if let Some(num) = s.strip_suffix('m') {
            let mins: u64 = num.parse().map_err(|_| format!("Invalid duration: {}", s))?;
            Ok(Duration::from_secs(mins * 60))
        } else {
            Err(format!("Duration must end with 's', 'ms', or 'm': {}", s))
        }
    }

}
