use std::{fs, num::NonZeroUsize, path::PathBuf, str::FromStr, time::Duration};

use serde::Deserialize;
use trainer::EngineConfig;

use crate::{error::OrchestratorErr, sync::SyncConfig};

const ENV_PREFIX: &str = "TRAINING_SIM_";

/// How uploads of model artifacts are retried.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub retries: u32,
    /// Wait before the first retry, doubled on each following one.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// The wait before retry number `attempt`, counted from zero.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(1 << attempt.min(16))
    }
}

/// Runtime settings of the orchestrator.
///
/// Every field has a default, a JSON file may set any subset of them and
/// `TRAINING_SIM_*` environment variables override both.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Simulated dataset size.
    pub samples: usize,
    pub batch_delay_ms: u64,
    pub decay_rate: f32,
    pub decay_steps: usize,
    pub poll_interval_ms: u64,
    pub max_not_found: u32,
    pub upload_retries: u32,
    pub upload_backoff_ms: u64,
    pub retention_epochs: u32,
    /// Where the registry persists, in memory when unset.
    pub store_path: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            samples: 1000,
            batch_delay_ms: 20,
            decay_rate: 0.95,
            decay_steps: 1,
            poll_interval_ms: 500,
            max_not_found: 8,
            upload_retries: 3,
            upload_backoff_ms: 200,
            retention_epochs: 5,
            store_path: None,
        }
    }
}

impl OrchestratorConfig {
    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    /// `InvalidConfig` if the file can't be read or parsed.
    pub fn from_file(path: &str) -> Result<Self, OrchestratorErr> {
        let content = fs::read_to_string(path)
            .map_err(|e| OrchestratorErr::InvalidConfig(format!("cannot read '{path}': {e}")))?;

        serde_json::from_str(&content)
            .map_err(|e| OrchestratorErr::InvalidConfig(format!("invalid JSON in '{path}': {e}")))
    }

    /// Overrides fields from the process environment.
    pub fn with_env(self) -> Result<Self, OrchestratorErr> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Overrides fields from `lookup`, which is queried with the full variable name,
    /// e.g. `TRAINING_SIM_SAMPLES`.
    ///
    /// # Errors
    /// `InvalidConfig` naming the variable whose value couldn't be parsed.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, OrchestratorErr>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_with(&lookup, "SAMPLES", &mut self.samples)?;
        override_with(&lookup, "BATCH_DELAY_MS", &mut self.batch_delay_ms)?;
        override_with(&lookup, "DECAY_RATE", &mut self.decay_rate)?;
        override_with(&lookup, "DECAY_STEPS", &mut self.decay_steps)?;
        override_with(&lookup, "POLL_INTERVAL_MS", &mut self.poll_interval_ms)?;
        override_with(&lookup, "MAX_NOT_FOUND", &mut self.max_not_found)?;
        override_with(&lookup, "UPLOAD_RETRIES", &mut self.upload_retries)?;
        override_with(&lookup, "UPLOAD_BACKOFF_MS", &mut self.upload_backoff_ms)?;
        override_with(&lookup, "RETENTION_EPOCHS", &mut self.retention_epochs)?;

        if let Some(path) = lookup(&format!("{ENV_PREFIX}STORE_PATH")) {
            self.store_path = Some(path.into());
        }

        Ok(self)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            samples: self.samples.max(1),
            batch_delay: Duration::from_millis(self.batch_delay_ms),
            decay_rate: self.decay_rate,
            decay_steps: NonZeroUsize::new(self.decay_steps).unwrap_or(NonZeroUsize::MIN),
            ..Default::default()
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            max_not_found: self.max_not_found,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.upload_retries,
            backoff: Duration::from_millis(self.upload_backoff_ms),
        }
    }
}

fn override_with<F, T>(lookup: &F, name: &str, field: &mut T) -> Result<(), OrchestratorErr>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let key = format!("{ENV_PREFIX}{name}");
    let Some(raw) = lookup(&key) else {
        return Ok(());
    };

    *field = raw
        .trim()
        .parse()
        .map_err(|_| OrchestratorErr::InvalidConfig(format!("{key}: cannot parse '{raw}'")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: OrchestratorConfig =
            serde_json::from_str(r#"{ "samples": 200, "pollIntervalMs": 50 }"#).unwrap();

        assert_eq!(config.samples, 200);
        assert_eq!(config.poll_interval_ms, 50);
        assert_eq!(config.max_not_found, 8);
        assert_eq!(config.batch_delay_ms, 20);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let res = serde_json::from_str::<OrchestratorConfig>(r#"{ "sample": 200 }"#);
        assert!(res.is_err());
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<_, _> = [
            ("TRAINING_SIM_SAMPLES", "64"),
            ("TRAINING_SIM_STORE_PATH", "/tmp/sessions.json"),
        ]
        .into_iter()
        .collect();

        let config = OrchestratorConfig::default()
            .with_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.samples, 64);
        assert_eq!(config.store_path, Some(PathBuf::from("/tmp/sessions.json")));
        assert_eq!(config.engine_config().samples, 64);
    }

    #[test]
    fn bad_override_names_the_variable() {
        let err = OrchestratorConfig::default()
            .with_overrides(|k| (k == "TRAINING_SIM_DECAY_RATE").then(|| "fast".to_string()))
            .unwrap_err();

        assert!(err.to_string().contains("TRAINING_SIM_DECAY_RATE"));
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            retries: 3,
            backoff: Duration::from_millis(100),
        };

        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
    }

    #[test]
    fn zero_decay_steps_falls_back_to_one() {
        let config = OrchestratorConfig {
            decay_steps: 0,
            ..Default::default()
        };

        assert_eq!(config.engine_config().decay_steps.get(), 1);
    }
}
