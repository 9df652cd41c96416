use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Highest accepted probe frequency: one probe per millisecond. Anything
/// faster would produce a zero-length send interval.
const MAX_FREQUENCY: u32 = 60_000;

/// Top-level configuration for the udprobe engine.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (trace, debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    #[allow(dead_code)]
    pub log_level: String,

    /// Driver loop tick period: one receive pass plus one reaper pass per
    /// tick. Default: 1ms.
    #[serde(default = "default_tick_interval", with = "humantime_serde")]
    pub tick_interval: Duration,

    /// Age after which an unanswered probe is evicted and reported as
    /// lost. Fixed for all targets. Default: 60s.
    #[serde(default = "default_timeout_window", with = "humantime_serde")]
    pub timeout_window: Duration,

    /// How often to log aggregate outcome counters. Default: 60s.
    #[serde(default = "default_stats_interval", with = "humantime_serde")]
    pub stats_interval: Duration,

    /// Probe targets. Loaded once at startup, never mutated.
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

/// One probe target descriptor.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    /// Name carried on every event for this target.
    pub name: String,

    /// Hostname or IP address of the echo responder.
    pub host: String,

    /// UDP port of the echo responder.
    pub port: u16,

    /// Probes per minute (1 to 60000).
    pub frequency: u32,

    /// Lower bound of the per-probe payload size draw. Sizes below the
    /// 32-byte wire minimum are floor-clamped at send time. Default: 32.
    #[serde(default = "default_payload_size")]
    pub payload_min: u32,

    /// Upper bound of the per-probe payload size draw. Default: 32.
    #[serde(default = "default_payload_size")]
    pub payload_max: u32,
}

impl TargetConfig {
    /// Send interval derived from the configured frequency.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(60_000 / u64::from(self.frequency))
    }
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_tick_interval() -> Duration {
    Duration::from_millis(1)
}

fn default_timeout_window() -> Duration {
    Duration::from_secs(60)
}

fn default_stats_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_payload_size() -> u32 {
    32
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            tick_interval: default_tick_interval(),
            timeout_window: default_timeout_window(),
            stats_interval: default_stats_interval(),
            targets: Vec::new(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            bail!("tick_interval must be positive");
        }

        if self.timeout_window.is_zero() {
            bail!("timeout_window must be positive");
        }

        if self.stats_interval.is_zero() {
            bail!("stats_interval must be positive");
        }

        if self.targets.is_empty() {
            bail!("at least one target is required");
        }

        let mut names = HashSet::new();
        for t in &self.targets {
            if t.name.is_empty() {
                bail!("target name must not be empty");
            }

            if !names.insert(t.name.as_str()) {
                bail!("duplicate target name: {}", t.name);
            }

            if t.host.is_empty() {
                bail!("target {}: host must not be empty", t.name);
            }

            if t.frequency == 0 {
                bail!("target {}: frequency must be positive", t.name);
            }

            if t.frequency > MAX_FREQUENCY {
                bail!(
                    "target {}: frequency {} exceeds maximum {MAX_FREQUENCY}",
                    t.name,
                    t.frequency
                );
            }

            if t.payload_max < t.payload_min {
                bail!(
                    "target {}: payload_max {} is less than payload_min {}",
                    t.name,
                    t.payload_max,
                    t.payload_min
                );
            }
        }

        Ok(())
    }
}
