//! Process-wide tunables, read from `SKYGENT_*` environment variables.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkygentConfig {
    /// Minimum interval between upstream requests (`SKYGENT_BSKY_RATE_LIMIT`).
    pub bsky_rate_limit: Duration,
    /// Base backoff for retried upstream calls (`SKYGENT_BSKY_RETRY_BASE`).
    pub bsky_retry_base: Duration,
    /// Max retries for transient upstream errors (`SKYGENT_BSKY_RETRY_MAX`).
    pub bsky_retry_max: u32,
    /// Fan-out width for `Predicate::eval_batch` (C3).
    pub filter_concurrency: usize,
    /// Rows replayed per derivation checkpoint flush (C9).
    pub derive_batch_size: usize,
    /// Messages buffered per jetstream batch window (C8).
    pub sync_batch_size: usize,
    /// Time window for a jetstream batch (C8).
    pub sync_batch_window: Duration,
}

impl Default for SkygentConfig {
    fn default() -> Self {
        Self {
            bsky_rate_limit: Duration::from_millis(250),
            bsky_retry_base: Duration::from_millis(250),
            bsky_retry_max: 5,
            filter_concurrency: 16,
            derive_batch_size: 256,
            sync_batch_size: 100,
            sync_batch_window: Duration::from_secs(1),
        }
    }
}

impl SkygentConfig {
    /// Reads overrides from the environment, falling back to defaults for
    /// anything unset or unparsable (unparsable values are logged by the
    /// caller, not here — this module has no I/O beyond `env::var`).
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_millis("SKYGENT_BSKY_RATE_LIMIT") {
            config.bsky_rate_limit = v;
        }
        if let Some(v) = env_millis("SKYGENT_BSKY_RETRY_BASE") {
            config.bsky_retry_base = v;
        }
        if let Some(v) = env_parse::<u32>("SKYGENT_BSKY_RETRY_MAX") {
            config.bsky_retry_max = v;
        }
        if let Some(v) = env_parse::<usize>("SKYGENT_FILTER_CONCURRENCY") {
            config.filter_concurrency = v;
        }
        if let Some(v) = env_parse::<usize>("SKYGENT_DERIVE_BATCH_SIZE") {
            config.derive_batch_size = v;
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = SkygentConfig::default();
        assert_eq!(config.bsky_rate_limit, Duration::from_millis(250));
        assert_eq!(config.bsky_retry_base, Duration::from_millis(250));
        assert_eq!(config.bsky_retry_max, 5);
    }
}
