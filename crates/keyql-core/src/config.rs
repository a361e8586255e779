use std::sync::OnceLock;

use crate::error::{KeyqlError, Result};

/// Engine tunables. Resolved once per process; see [`global`] / [`init`].
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Rows a plan emits per `batch()` pull before yielding to the caller.
    pub plan_batch_size: usize,
    /// Default for the per-execution field-result cache.
    pub enable_field_cache: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            plan_batch_size: 32,
            enable_field_cache: true,
        }
    }
}

impl EngineConfig {
    /// Build a config from the environment, falling back to defaults.
    ///
    /// `KEYQL_BATCH_SIZE` overrides the batch size; `KEYQL_DISABLE_FIELD_CACHE=1`
    /// turns the field cache off.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("KEYQL_BATCH_SIZE") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.plan_batch_size = n;
            }
        }
        if let Ok(v) = std::env::var("KEYQL_DISABLE_FIELD_CACHE") {
            if v == "1" {
                cfg.enable_field_cache = false;
            }
        }
        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if self.plan_batch_size == 0 {
            return Err(KeyqlError::storage("plan_batch_size must be > 0"));
        }
        Ok(())
    }
}

static GLOBAL: OnceLock<EngineConfig> = OnceLock::new();

/// Install a config before any query runs. Returns false if one was
/// already resolved (first writer wins).
pub fn init(cfg: EngineConfig) -> bool {
    GLOBAL.set(cfg).is_ok()
}

/// The process-wide config, resolved from the environment on first use.
pub fn global() -> &'static EngineConfig {
    GLOBAL.get_or_init(EngineConfig::from_env)
}

/// Shorthand for `global().plan_batch_size`.
pub fn plan_batch_size() -> usize {
    global().plan_batch_size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.plan_batch_size, 32);
        assert!(cfg.enable_field_cache);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let cfg = EngineConfig {
            plan_batch_size: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
