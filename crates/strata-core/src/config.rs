use std::collections::HashMap;
use std::env;
use std::num::NonZeroUsize;
use std::thread;

use anyhow::{anyhow, Result};

pub const CASE_HACK_ENV: &str = "STRATA_CASE_HACK";
pub const LAYER_JOBS_ENV: &str = "STRATA_LAYER_JOBS";

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

/// Settings of the tar serializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TarConfig {
    /// Strip the `~nix~case~hack~N` suffixes the store adds on
    /// case-insensitive filesystems.
    pub case_hack: bool,
}

impl Default for TarConfig {
    fn default() -> Self {
        Self {
            case_hack: cfg!(target_os = "macos"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerConfig {
    /// Upper bound on layers serialized at the same time.
    pub jobs: usize,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            jobs: thread::available_parallelism().map_or(1, NonZeroUsize::get),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Config {
    pub tar: TarConfig,
    pub layers: LayerConfig,
}

impl Config {
    /// Builds a configuration snapshot from the current process environment.
    ///
    /// # Errors
    /// Returns an error if a variable is set to a value that cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_snapshot(&EnvSnapshot::capture())
    }

    pub(crate) fn from_snapshot(snapshot: &EnvSnapshot) -> Result<Self> {
        let defaults = Self::default();
        let case_hack = match snapshot.var(CASE_HACK_ENV) {
            None => defaults.tar.case_hack,
            Some("1" | "true") => true,
            Some("0" | "false" | "") => false,
            Some(other) => {
                return Err(anyhow!(
                    "{CASE_HACK_ENV} must be 0 or 1 (got {other:?})"
                ))
            }
        };
        let jobs = match snapshot.var(LAYER_JOBS_ENV) {
            None => defaults.layers.jobs,
            Some(raw) => raw
                .parse::<NonZeroUsize>()
                .map(NonZeroUsize::get)
                .map_err(|_| anyhow!("{LAYER_JOBS_ENV} must be a positive integer (got {raw:?})"))?,
        };
        Ok(Self {
            tar: TarConfig { case_hack },
            layers: LayerConfig { jobs },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_overrides_from_environment() {
        let snapshot = EnvSnapshot::testing(&[(CASE_HACK_ENV, "1"), (LAYER_JOBS_ENV, "3")]);
        let config = Config::from_snapshot(&snapshot).expect("config");
        assert!(config.tar.case_hack);
        assert_eq!(config.layers.jobs, 3);
    }

    #[test]
    fn falls_back_to_defaults() {
        let config = Config::from_snapshot(&EnvSnapshot::testing(&[])).expect("config");
        assert_eq!(config, Config::default());
        assert!(config.layers.jobs >= 1);
    }

    #[test]
    fn rejects_invalid_values() {
        let zero_jobs = EnvSnapshot::testing(&[(LAYER_JOBS_ENV, "0")]);
        assert!(Config::from_snapshot(&zero_jobs).is_err());
        let bad_flag = EnvSnapshot::testing(&[(CASE_HACK_ENV, "maybe")]);
        assert!(Config::from_snapshot(&bad_flag).is_err());
    }
}
