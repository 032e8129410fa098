//! Policies loaded from configuration files.
//!
//! Available with the `serde` feature. Durations are written in
//! milliseconds.
//!
//! ```rust
//! use undertow::config::PolicyConfig;
//! use undertow::backoff::Backoff;
//! use std::time::Duration;
//!
//! let json = r#"{
//!     "backoff": { "kind": "exponential", "base_ms": 100 },
//!     "retry_count": 5,
//!     "max_delay_ms": 1000
//! }"#;
//!
//! let config: PolicyConfig = serde_json::from_str(json).unwrap();
//! let policy = config.into_policy();
//!
//! assert_eq!(policy.retry_count(), 5);
//! assert_eq!(policy.backoff().delay(2), Duration::from_millis(400));
//! assert_eq!(policy.backoff().delay(6), Duration::from_secs(1));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::{self, Backoff, Capped};
use crate::retry::Policy;

const DEFAULT_RETRY_COUNT: u64 = 3;

fn default_retry_count() -> u64 {
    DEFAULT_RETRY_COUNT
}

/// A backoff strategy as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffConfig {
    /// See [`backoff::plain`].
    Plain {
        /// Fixed delay.
        delay_ms: u64,
    },
    /// See [`backoff::arithmetic`].
    Arithmetic {
        /// Delay before the first retry.
        initial_ms: u64,
        /// Added per attempt.
        delta_ms: u64,
    },
    /// See [`backoff::fibonacci`].
    Fibonacci {
        /// Unit of the sequence.
        base_ms: u64,
    },
    /// See [`backoff::exponential`].
    Exponential {
        /// Delay before the first retry.
        base_ms: u64,
    },
}

impl Backoff for BackoffConfig {
    fn delay(&self, attempt: u64) -> Duration {
        match *self {
            BackoffConfig::Plain { delay_ms } => backoff::plain(ms(delay_ms)).delay(attempt),
            BackoffConfig::Arithmetic {
                initial_ms,
                delta_ms,
            } => backoff::arithmetic(ms(initial_ms), ms(delta_ms)).delay(attempt),
            BackoffConfig::Fibonacci { base_ms } => backoff::fibonacci(ms(base_ms)).delay(attempt),
            BackoffConfig::Exponential { base_ms } => {
                backoff::exponential(ms(base_ms)).delay(attempt)
            }
        }
    }
}

/// A retry policy as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// The strategy.
    pub backoff: BackoffConfig,
    /// Retries after the first attempt. Defaults to 3.
    #[serde(default = "default_retry_count")]
    pub retry_count: u64,
    /// Upper bound for every delay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
}

impl PolicyConfig {
    /// Build the policy.
    pub fn into_policy(self) -> Policy<ConfiguredBackoff> {
        let max = self.max_delay_ms.map_or(Duration::MAX, ms);
        Policy::new(
            ConfiguredBackoff {
                inner: backoff::capped(self.backoff, max),
            },
            self.retry_count,
        )
    }
}

impl From<PolicyConfig> for Policy<ConfiguredBackoff> {
    fn from(config: PolicyConfig) -> Self {
        config.into_policy()
    }
}

/// The strategy of a configured policy, with its optional cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfiguredBackoff {
    // uncapped configurations use Duration::MAX
    inner: Capped<BackoffConfig>,
}

impl ConfiguredBackoff {
    /// The configured strategy.
    pub fn strategy(&self) -> BackoffConfig {
        *self.inner.inner()
    }

    /// The cap, if any.
    pub fn cap(&self) -> Option<Duration> {
        Some(self.inner.max()).filter(|max| *max != Duration::MAX)
    }
}

impl Backoff for ConfiguredBackoff {
    fn delay(&self, attempt: u64) -> Duration {
        self.inner.delay(attempt)
    }
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<PolicyConfig, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[test]
    fn test_each_kind_matches_its_strategy() {
        let cases: [(&str, [u64; 4]); 4] = [
            (r#"{"kind":"plain","delay_ms":250}"#, [250, 250, 250, 250]),
            (
                r#"{"kind":"arithmetic","initial_ms":100,"delta_ms":50}"#,
                [100, 150, 200, 250],
            ),
            (r#"{"kind":"fibonacci","base_ms":10}"#, [10, 10, 20, 30]),
            (r#"{"kind":"exponential","base_ms":10}"#, [10, 20, 40, 80]),
        ];

        for (json, expected) in cases {
            let strategy: BackoffConfig = serde_json::from_str(json).unwrap();
            let delays: Vec<u64> = (0..4).map(|n| strategy.delay(n).as_millis() as u64).collect();
            assert_eq!(delays, expected.to_vec(), "{}", json);
        }
    }

    #[test]
    fn test_defaults() {
        let config = parse(r#"{"backoff":{"kind":"plain","delay_ms":1}}"#).unwrap();

        assert_eq!(config.retry_count, 3);
        assert_eq!(config.max_delay_ms, None);
        let policy = config.into_policy();
        assert_eq!(policy.backoff().cap(), None);
        assert_eq!(policy.backoff().strategy(), BackoffConfig::Plain { delay_ms: 1 });
    }

    #[test]
    fn test_cap_applies() {
        let policy = parse(
            r#"{"backoff":{"kind":"exponential","base_ms":1000},"retry_count":8,"max_delay_ms":5000}"#,
        )
        .unwrap()
        .into_policy();

        assert_eq!(policy.backoff().delay(2), Duration::from_secs(4));
        assert_eq!(policy.backoff().delay(3), Duration::from_secs(5));
        assert_eq!(policy.backoff().delay(60), Duration::from_secs(5));
        assert_eq!(policy.backoff().cap(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_uncapped_strategy_saturates() {
        let policy = parse(r#"{"backoff":{"kind":"exponential","base_ms":1000}}"#)
            .unwrap()
            .into_policy();

        assert_eq!(policy.backoff().delay(40), Duration::from_secs(1 << 40));
        assert_eq!(policy.backoff().delay(u64::MAX), Duration::MAX);
    }

    #[test]
    fn test_rejects_unknown_kind_and_fields() {
        assert!(parse(r#"{"backoff":{"kind":"random","base_ms":1}}"#).is_err());
        assert!(parse(r#"{"backoff":{"kind":"plain","delay_ms":1},"jitter":true}"#).is_err());
        assert!(parse(r#"{"retry_count":1}"#).is_err());
    }

    #[test]
    fn test_serializes_back() {
        let config = PolicyConfig {
            backoff: BackoffConfig::Fibonacci { base_ms: 5 },
            retry_count: 2,
            max_delay_ms: None,
        };

        let json = serde_json::to_string(&config).unwrap();

        assert_eq!(
            json,
            r#"{"backoff":{"kind":"fibonacci","base_ms":5},"retry_count":2}"#
        );
        assert_eq!(parse(&json).unwrap(), config);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_policy_drives_the_loop() {
        use crate::context::Context;
        use crate::outcome::Outcome;

        let policy: Policy<ConfiguredBackoff> =
            parse(r#"{"backoff":{"kind":"plain","delay_ms":300},"retry_count":2}"#)
                .unwrap()
                .into();
        let start = tokio::time::Instant::now();

        let result = policy
            .retry_context(&Context::new(), |_ctx: Context| async {
                Outcome::<String>::proceed()
            })
            .await;

        assert!(result.unwrap_err().is_exhausted());
        assert_eq!(start.elapsed(), Duration::from_millis(600));
    }
}
