//! TOML configuration for pulse.
//!
//! Every tunable of the scoring pipeline, alerting, session cadence and the
//! gatekeeper lives here. Missing sections and keys fall back to defaults, and
//! a loaded config is validated before anything is built from it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::alert::AlertConfig;
use crate::algo::isolation_forest::MIN_TRAINING_SAMPLES;
use crate::engine::PipelineConfig;
use crate::error::{PulseError, Result};
use crate::forwarder::ForwarderConfig;
use crate::registry::RegistryConfig;
use crate::session::SessionConfig;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "PULSE_CONFIG";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PulseConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub forwarder: ForwarderConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl PulseConfig {
    /// Load and validate configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), "loaded pulse configuration");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the path in `PULSE_CONFIG`, falling back to defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "PULSE_CONFIG set but file could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| PulseError::InvalidConfig(e.to_string()))
    }

    /// Reject combinations that would leave a session unable to train, score
    /// or alert.
    pub fn validate(&self) -> Result<()> {
        let s = &self.session;
        let p = &self.pipeline;
        let a = &self.alerts;

        check(s.tick_interval_ms > 0, "session.tick_interval_ms must be positive")?;
        check(s.scoring_every >= 1, "session.scoring_every must be at least 1")?;
        check(
            s.history_capacity >= p.baseline_ticks_needed,
            "session.history_capacity must hold the baseline window",
        )?;

        check(
            p.baseline_ticks_needed >= MIN_TRAINING_SAMPLES,
            "pipeline.baseline_ticks_needed is below the forest's training minimum",
        )?;
        check(p.forest.trees >= 1, "pipeline.forest.trees must be at least 1")?;
        check(
            p.forest.subsample_size >= 2,
            "pipeline.forest.subsample_size must be at least 2",
        )?;
        check(
            p.smoother.alpha > 0.0 && p.smoother.alpha <= 1.0,
            "pipeline.smoother.alpha must be in (0, 1]",
        )?;
        check(
            p.calibration.steepness > 0.0 && p.calibration.steepness.is_finite(),
            "pipeline.calibration.steepness must be positive",
        )?;
        check(
            p.calibration.forest_weight >= 0.0 && p.calibration.ewma_weight >= 0.0,
            "pipeline.calibration weights must be non-negative",
        )?;
        check(p.score_history >= 1, "pipeline.score_history must be at least 1")?;
        check(
            p.trend_window >= 2 && p.trend_window <= p.score_history,
            "pipeline.trend_window must be between 2 and score_history",
        )?;

        check(
            a.warning_threshold < a.critical_threshold
                && a.critical_threshold < a.emergency_threshold
                && a.emergency_threshold <= 100,
            "alert thresholds must satisfy warning < critical < emergency <= 100",
        )?;
        check(a.warning_consecutive >= 1, "alerts.warning_consecutive must be at least 1")?;
        check(a.log_capacity >= 1, "alerts.log_capacity must be at least 1")?;

        check(self.registry.max_sessions >= 1, "registry.max_sessions must be at least 1")?;
        check(
            self.forwarder.channel_capacity >= 1,
            "forwarder.channel_capacity must be at least 1",
        )?;
        check(
            self.server.history_channel_capacity >= 1,
            "server.history_channel_capacity must be at least 1",
        )?;

        Ok(())
    }
}

fn check(ok: bool, message: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(PulseError::InvalidConfig(message.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Gatekeeper HTTP server and history persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Directory for hourly JSONL history files; persistence is off when unset
    pub history_dir: Option<PathBuf>,
    pub history_channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3100".to_string(),
            history_dir: Some(PathBuf::from("data/history")),
            history_channel_capacity: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PulseConfig::default();
        config.validate().unwrap();
        assert_eq!(config.session.scoring_every, 3);
        assert_eq!(config.pipeline.baseline_ticks_needed, 12);
        assert_eq!(config.pipeline.forest.trees, 80);
        assert_eq!(config.alerts.critical_threshold, 72);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PulseConfig::from_toml_str(
            r#"
            [session]
            scoring_every = 1

            [pipeline.forest]
            seed = 42

            [alerts]
            hysteresis_delta = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.session.scoring_every, 1);
        assert_eq!(config.session.history_capacity, 144);
        assert_eq!(config.pipeline.forest.seed, Some(42));
        assert_eq!(config.pipeline.forest.subsample_size, 128);
        assert_eq!(config.alerts.hysteresis_delta, 5);
        assert_eq!(config.alerts.warning_threshold, 50);
    }

    #[test]
    fn test_round_trip() {
        let mut config = PulseConfig::default();
        config.pipeline.calibration.center = 0.65;
        config.forwarder.webhook_url = Some("http://hooks.local/alerts".to_string());

        let text = config.to_toml_string().unwrap();
        let parsed = PulseConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.pipeline.calibration.center, 0.65);
        assert_eq!(
            parsed.forwarder.webhook_url.as_deref(),
            Some("http://hooks.local/alerts")
        );
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let err = PulseConfig::from_toml_str("[alerts]\nwarning_threshold = 80\n").unwrap_err();
        assert!(matches!(err, PulseError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_untrainable_baseline() {
        let err =
            PulseConfig::from_toml_str("[pipeline]\nbaseline_ticks_needed = 5\n").unwrap_err();
        assert!(matches!(err, PulseError::InvalidConfig(_)));
    }

    #[test]
    fn test_parse_error_is_typed() {
        let err = PulseConfig::from_toml_str("[session\n").unwrap_err();
        assert!(matches!(err, PulseError::ConfigParse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = PulseConfig::load(Path::new("/nonexistent/pulse.toml")).unwrap_err();
        assert!(matches!(err, PulseError::ConfigIo(_)));
    }
}
