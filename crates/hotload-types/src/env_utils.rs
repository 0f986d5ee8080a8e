//! Environment variable parsing utilities.
//!
//! Type-safe helpers used by the engine configuration overlay, replacing the
//! repeated `std::env::var(..).ok().and_then(|v| v.parse().ok())` pattern.
//!
//! # Example
//!
//! ```
//! use hotload_types::env_utils::{env_var, env_var_or};
//!
//! let budget: u64 = env_var_or("HOTLOAD_STEP_BUDGET", 1_000_000);
//! let depth: Option<usize> = env_var("HOTLOAD_MAX_CALL_DEPTH");
//! ```

use std::str::FromStr;

/// Parse an environment variable into a type that implements `FromStr`.
///
/// Returns `None` if the variable is not set or cannot be parsed.
pub fn env_var<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Parse an environment variable with a default value.
pub fn env_var_or<T: FromStr>(key: &str, default: T) -> T {
    env_var(key).unwrap_or(default)
}

/// Read a boolean flag. `1`, `true`, `yes`, `on` (any case) are true; any
/// other value is false; an unset variable yields `default`.
pub fn env_bool_or(key: &str, default: bool) -> bool {
    match std::env::var(key).ok() {
        Some(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

/// Parse a comma-separated environment variable into a vector, skipping
/// empty entries. Returns `None` if the variable is not set.
///
/// ```
/// use hotload_types::env_utils::env_list;
///
/// // HOTLOAD_DEFAULT_OPTIONS="--deny-warnings, --classpath,/opt/libs"
/// let options: Option<Vec<String>> = env_list("HOTLOAD_DEFAULT_OPTIONS");
/// ```
pub fn env_list(key: &str) -> Option<Vec<String>> {
    std::env::var(key).ok().map(|v| {
        v.split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect()
    })
}
