use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use super::operation::ConfigurationError;
use super::retry::{Backoff, RetryPolicy};

/// Property keys recognised by [`ProcessorConfig::from_properties`].
pub mod keys {
    pub const RETRY_COUNT: &str = "api-processor.retry-count";
    pub const RETRY_DELAY_START: &str = "api-processor.retry-delay-start";
    pub const RETRY_BACKOFF: &str = "api-processor.retry-backoff";
    pub const CACHE_EXPIRE: &str = "api-processor.cache-expire";
    pub const CACHE_CAPACITY: &str = "api-processor.cache-capacity";
}

/// Process-wide processor configuration.
///
/// Controls execution retries and the metadata cache. All durations are in
/// milliseconds, matching the property surface.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorConfig {
    /// Retries after the first failed execution attempt. 0 means one attempt.
    pub retry_count: u32,
    /// Delay before the first retry.
    pub retry_delay_start_ms: u64,
    pub retry_backoff: Backoff,
    /// Idle time after which a cached descriptor or verdict is recomputed.
    pub cache_expire_ms: u64,
    /// Maximum entries per metadata cache kind.
    pub cache_capacity: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            retry_count: 0,
            retry_delay_start_ms: 5_000,
            retry_backoff: Backoff::Fixed,
            cache_expire_ms: 360_000,
            cache_capacity: 10_000,
        }
    }
}

impl ProcessorConfig {
    /// Reads every key from `properties`, falling back to the process
    /// environment and then to the default.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidProperty`] for unparsable values.
    pub fn from_properties(properties: &HashMap<String, String>) -> Result<Self, ConfigurationError> {
        Self::load(|key| {
            properties
                .get(key)
                .cloned()
                .or_else(|| std::env::var(key).ok())
        })
    }

    fn load(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigurationError> {
        let defaults = Self::default();
        let retry_backoff = match lookup(keys::RETRY_BACKOFF) {
            None => defaults.retry_backoff,
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "fixed" => Backoff::Fixed,
                "exponential" => Backoff::exponential(),
                _ => {
                    return Err(invalid(
                        keys::RETRY_BACKOFF,
                        &raw,
                        "expected 'fixed' or 'exponential'",
                    ))
                }
            },
        };
        Ok(Self {
            retry_count: parse(&lookup, keys::RETRY_COUNT, defaults.retry_count)?,
            retry_delay_start_ms: parse(
                &lookup,
                keys::RETRY_DELAY_START,
                defaults.retry_delay_start_ms,
            )?,
            retry_backoff,
            cache_expire_ms: parse(&lookup, keys::CACHE_EXPIRE, defaults.cache_expire_ms)?,
            cache_capacity: parse(&lookup, keys::CACHE_CAPACITY, defaults.cache_capacity)?,
        })
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry_count,
            initial_delay: Duration::from_millis(self.retry_delay_start_ms),
            backoff: self.retry_backoff,
        }
    }

    #[must_use]
    pub fn cache_expire(&self) -> Duration {
        Duration::from_millis(self.cache_expire_ms)
    }
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigurationError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(key, &raw, &e.to_string())),
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidProperty {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
