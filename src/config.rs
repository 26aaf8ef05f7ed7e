//! Optimizer configuration.
//!
//! Thresholds default to fixed constants and can be overridden through
//! `HAZE_*` environment variables, which is how the embedding host tunes
//! the JIT without recompiling it.

use std::env;

/// Size thresholds governing promise inlining.
#[derive(Debug, Clone)]
pub struct Config {
    /// Closure instruction count above which promise inlining is restricted
    /// to small promise bodies, bounding code growth on large closures.
    pub promise_inliner_max_size: usize,

    /// Promise bodies below this instruction count are inlined even into
    /// closures over the size limit.
    pub small_promise_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            promise_inliner_max_size: 3000,
            small_promise_size: 10,
        }
    }
}

impl Config {
    /// Build a configuration from the environment, falling back to the
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        if let Some(n) = read_env("HAZE_PROMISE_INLINER_MAX_SIZE") {
            config.promise_inliner_max_size = n;
        }
        if let Some(n) = read_env("HAZE_SMALL_PROMISE_SIZE") {
            config.small_promise_size = n;
        }
        config
    }
}

fn read_env(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}
