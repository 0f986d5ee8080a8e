//! Engine configuration.
//!
//! Defaults suit interactive use. [`EngineConfig::from_env`] overlays the
//! following environment variables:
//!
//! | Variable | Field | Format |
//! |----------|-------|--------|
//! | `HOTLOAD_STEP_BUDGET` | `step_budget` | integer; `0` disables metering |
//! | `HOTLOAD_MAX_CALL_DEPTH` | `max_call_depth` | integer |
//! | `HOTLOAD_DEFAULT_OPTIONS` | `default_options` | comma-separated |
//! | `HOTLOAD_LOG_SOURCE` | `log_source` | `1`/`true`/`yes`/`on` |

use hotload_types::env_utils::{env_bool_or, env_list, env_var};
use serde::{Deserialize, Serialize};

use crate::vm::{ExecutionLimits, DEFAULT_MAX_CALL_DEPTH, DEFAULT_STEP_BUDGET};

pub const ENV_STEP_BUDGET: &str = "HOTLOAD_STEP_BUDGET";
pub const ENV_MAX_CALL_DEPTH: &str = "HOTLOAD_MAX_CALL_DEPTH";
pub const ENV_DEFAULT_OPTIONS: &str = "HOTLOAD_DEFAULT_OPTIONS";
pub const ENV_LOG_SOURCE: &str = "HOTLOAD_LOG_SOURCE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Options prepended to every compilation the engine starts.
    pub default_options: Vec<String>,

    /// Instructions one invocation may execute (default: 10 million).
    /// `None` disables metering.
    pub step_budget: Option<u64>,

    /// Maximum nesting of operation calls (default: 256). Script frames live
    /// on the heap, so a large limit costs memory, not native stack.
    pub max_call_depth: usize,

    /// Log source text at `trace` level before compiling (default: true).
    pub log_source: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_options: Vec::new(),
            step_budget: Some(DEFAULT_STEP_BUDGET),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            log_source: true,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with any `HOTLOAD_*` variables that are set and
    /// parse.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(budget) = env_var::<u64>(ENV_STEP_BUDGET) {
            self.step_budget = (budget > 0).then_some(budget);
        }
        if let Some(depth) = env_var::<usize>(ENV_MAX_CALL_DEPTH) {
            self.max_call_depth = depth;
        }
        if let Some(options) = env_list(ENV_DEFAULT_OPTIONS) {
            self.default_options = options;
        }
        self.log_source = env_bool_or(ENV_LOG_SOURCE, self.log_source);
        self
    }

    /// Builder method: set the step budget (`None` disables metering).
    pub fn with_step_budget(mut self, budget: Option<u64>) -> Self {
        self.step_budget = budget;
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_default_options(mut self, options: Vec<String>) -> Self {
        self.default_options = options;
        self
    }

    pub fn with_log_source(mut self, enabled: bool) -> Self {
        self.log_source = enabled;
        self
    }

    pub fn limits(&self) -> ExecutionLimits {
        ExecutionLimits {
            step_budget: self.step_budget,
            max_call_depth: self.max_call_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.step_budget, Some(DEFAULT_STEP_BUDGET));
        assert_eq!(config.limits(), ExecutionLimits::default());
        assert!(config.default_options.is_empty());
    }

    #[test]
    fn test_json_roundtrip_and_partial() {
        let config = EngineConfig::new()
            .with_step_budget(None)
            .with_default_options(vec!["--deny-warnings".to_string()]);
        let json = serde_json::to_string(&config).expect("serialize");
        let back: EngineConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, config);

        // Missing fields fall back to defaults.
        let partial: EngineConfig = serde_json::from_str(r#"{"max_call_depth": 8}"#).expect("partial");
        assert_eq!(partial.max_call_depth, 8);
        assert_eq!(partial.step_budget, Some(DEFAULT_STEP_BUDGET));
    }

    #[test]
    fn test_env_overlay() {
        std::env::set_var(ENV_STEP_BUDGET, "0");
        std::env::set_var(ENV_MAX_CALL_DEPTH, "32");
        std::env::set_var(ENV_DEFAULT_OPTIONS, "--deny-warnings, --classpath,/opt/lib");
        std::env::set_var(ENV_LOG_SOURCE, "no");

        let config = EngineConfig::from_env();
        assert_eq!(config.step_budget, None);
        assert_eq!(config.max_call_depth, 32);
        assert_eq!(
            config.default_options,
            vec!["--deny-warnings", "--classpath", "/opt/lib"]
        );
        assert!(!config.log_source);

        for key in [ENV_STEP_BUDGET, ENV_MAX_CALL_DEPTH, ENV_DEFAULT_OPTIONS, ENV_LOG_SOURCE] {
            std::env::remove_var(key);
        }
    }
}
