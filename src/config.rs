//! Process-local, read-only tunables (spec §4.9).
//!
//! None of these affect correctness, only the initial capacity of a couple
//! of internal tables and how chatty the `log` output is.

use std::env;

const ENV_LOCK_CACHE_CAPACITY: &str = "OOMPH_RS_LOCK_CACHE_CAPACITY";
const ENV_LOG_REQUESTS: &str = "OOMPH_RS_LOG_REQUESTS";

const DEFAULT_LOCK_CACHE_CAPACITY: usize = 8;
const DEFAULT_REGION_TABLE_CAPACITY: usize = 8;

/// Runtime configuration for a [`crate::context::Context`].
///
/// Constructed via [`Config::from_env`] or [`Config::builder`]; once built it
/// is cloned into the `Context` and never mutated again.
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) lock_cache_capacity: usize,
    pub(crate) region_table_capacity: usize,
    pub(crate) log_requests: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl Config {
    /// Build a `Config` by reading the environment, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self {
            lock_cache_capacity: parse_env_usize(
                ENV_LOCK_CACHE_CAPACITY,
                DEFAULT_LOCK_CACHE_CAPACITY,
            ),
            region_table_capacity: DEFAULT_REGION_TABLE_CAPACITY,
            log_requests: parse_env_bool(ENV_LOG_REQUESTS, false),
        }
    }

    /// Start a builder seeded with the environment-derived defaults.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            config: Self::from_env(),
        }
    }

    /// Initial capacity hint for a window's lock-cache rank set.
    pub fn lock_cache_capacity(&self) -> usize {
        self.lock_cache_capacity
    }

    /// Initial capacity hint for a context's region table.
    pub fn region_table_capacity(&self) -> usize {
        self.region_table_capacity
    }

    /// Whether request lifecycle events are logged at `debug` instead of
    /// `trace`.
    pub fn log_requests(&self) -> bool {
        self.log_requests
    }
}

/// Builder for [`Config`], letting callers override individual env-sourced
/// fields programmatically.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Override the lock-cache capacity hint.
    pub fn lock_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.lock_cache_capacity = capacity;
        self
    }

    /// Override the region-table capacity hint.
    pub fn region_table_capacity(mut self, capacity: usize) -> Self {
        self.config.region_table_capacity = capacity;
        self
    }

    /// Override whether request lifecycle events log at `debug`.
    pub fn log_requests(mut self, enabled: bool) -> Self {
        self.config.log_requests = enabled;
        self
    }

    /// Finish building.
    pub fn build(self) -> Config {
        self.config
    }
}

fn parse_env_usize(var: &str, default: usize) -> usize {
    match env::var(var) {
        Ok(raw) => match raw.parse::<usize>() {
            Ok(v) => v,
            Err(e) => {
                log::warn!("{var}={raw:?} is not a valid usize ({e}), using default {default}");
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_env_bool(var: &str, default: bool) -> bool {
    match env::var(var) {
        Ok(raw) => match raw.as_str() {
            "1" | "true" | "TRUE" | "yes" => true,
            "0" | "false" | "FALSE" | "no" => false,
            _ => {
                log::warn!("{var}={raw:?} is not a valid bool, using default {default}");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global, so serialize tests that
    // touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_without_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::remove_var(ENV_LOCK_CACHE_CAPACITY);
        env::remove_var(ENV_LOG_REQUESTS);
        let cfg = Config::from_env();
        assert_eq!(cfg.lock_cache_capacity(), DEFAULT_LOCK_CACHE_CAPACITY);
        assert!(!cfg.log_requests());
    }

    #[test]
    fn env_overrides_default() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var(ENV_LOCK_CACHE_CAPACITY, "16");
        let cfg = Config::from_env();
        assert_eq!(cfg.lock_cache_capacity(), 16);
        env::remove_var(ENV_LOCK_CACHE_CAPACITY);
    }

    #[test]
    fn builder_overrides_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var(ENV_LOCK_CACHE_CAPACITY, "16");
        let cfg = Config::builder().lock_cache_capacity(32).build();
        assert_eq!(cfg.lock_cache_capacity(), 32);
        env::remove_var(ENV_LOCK_CACHE_CAPACITY);
    }

    #[test]
    fn invalid_env_falls_back_to_default() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var(ENV_LOCK_CACHE_CAPACITY, "not-a-number");
        let cfg = Config::from_env();
        assert_eq!(cfg.lock_cache_capacity(), DEFAULT_LOCK_CACHE_CAPACITY);
        env::remove_var(ENV_LOCK_CACHE_CAPACITY);
    }
}
