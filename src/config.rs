use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::{clog_debug, Error, Result};

/// Engine configuration.
///
/// The source design leaves retry limits, timeout values, and checkpoint
/// cadence open; the defaults here are explicit choices, all overridable
/// from `~/.conductor/conductor.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of worker slots the orchestrator registers (must be > 0).
    pub pool_size: usize,
    /// Maximum attempts per task before it is left Failed.
    pub retry_limit: u32,
    /// Seconds a worker may stay silent before its assignment is lost.
    pub worker_timeout_secs: u64,
    /// Checkpoint after this many task completions.
    pub checkpoint_every_completions: u64,
    /// Checkpoint after this many elapsed seconds, whichever comes first.
    pub checkpoint_every_secs: u64,
    /// Number of checkpoints to retain (oldest pruned first).
    pub checkpoint_retain: usize,
    /// Aggregate context size that triggers archiving.
    pub archive_threshold_bytes: u64,
    /// Maximum number of worker reports processed in one run.
    pub step_budget: Option<u64>,
    /// Wall-clock budget for one run, in seconds.
    pub time_budget_secs: Option<u64>,
    /// How many times the planner may be asked for corrective tasks.
    pub replan_limit: u32,
    /// State store directory; defaults to ~/.conductor/state.
    pub state_dir: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_size: 4,
            retry_limit: 3,
            worker_timeout_secs: 300,
            checkpoint_every_completions: 5,
            checkpoint_every_secs: 120,
            checkpoint_retain: 5,
            archive_threshold_bytes: 64 * 1024,
            step_budget: None,
            time_budget_secs: None,
            replan_limit: 1,
            state_dir: None,
        }
    }
}

impl Config {
    pub fn conductor_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".conductor"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::conductor_dir()?.join("conductor.toml"))
    }

    /// Resolve the state store directory, expanding a leading tilde.
    pub fn state_path(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(Self::conductor_dir()?.join("state")),
        }
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_secs)
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_every_secs)
    }

    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget_secs.map(Duration::from_secs)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(Error::Validation(
                "pool_size must be greater than zero".to_string(),
            ));
        }
        if self.checkpoint_retain == 0 {
            return Err(Error::Validation(
                "checkpoint_retain must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        clog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            clog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        config.validate()?;
        clog_debug!(
            "Config loaded: pool_size={}, retry_limit={}, timeout={}s",
            config.pool_size,
            config.retry_limit,
            config.worker_timeout_secs
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let dir = Self::conductor_dir()?;
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        clog_debug!("Config saved to {}", path.display());
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
