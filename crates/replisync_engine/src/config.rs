//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use rand::Rng;
use replisync_protocol::ResolutionStrategy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for sync cycles.
///
/// The resolution strategy is kept as the raw setting so that a host can
/// load the whole config from JSON; it is validated by
/// [`resolution_strategy`](Self::resolution_strategy) when a channel starts
/// and again at the start of every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Resolution strategy name: `client-wins`, `server-wins` or `merge`.
    pub strategy: String,
    /// Retry policy for opening the store and connecting the transport.
    pub connect_retry: RetryConfig,
    /// Retry policy for loading local and fetching remote state.
    pub fetch_retry: RetryConfig,
    /// Retry policy for persisting. Only used by stores with idempotent writes.
    pub persist_retry: RetryConfig,
    /// Retry policy for pushing.
    pub push_retry: RetryConfig,
    /// Time limit for a single gateway call. Saves are never timed out.
    pub timeout: Option<Duration>,
}

impl SyncConfig {
    /// Creates a configuration with the given strategy and default retries.
    pub fn new(strategy: ResolutionStrategy) -> Self {
        Self {
            strategy: strategy.as_str().to_string(),
            connect_retry: RetryConfig::default(),
            fetch_retry: RetryConfig::default(),
            persist_retry: RetryConfig::default(),
            push_retry: RetryConfig::default(),
            timeout: Some(Duration::from_secs(30)),
        }
    }

    /// Sets the strategy from a raw setting, without validating it.
    pub fn with_strategy_setting(mut self, setting: impl Into<String>) -> Self {
        self.strategy = setting.into();
        self
    }

    /// Sets the same retry policy for every phase.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.connect_retry = retry.clone();
        self.fetch_retry = retry.clone();
        self.persist_retry = retry.clone();
        self.push_retry = retry;
        self
    }

    /// Sets the push retry policy.
    pub fn with_push_retry(mut self, retry: RetryConfig) -> Self {
        self.push_retry = retry;
        self
    }

    /// Sets the persist retry policy.
    pub fn with_persist_retry(mut self, retry: RetryConfig) -> Self {
        self.persist_retry = retry;
        self
    }

    /// Sets the fetch retry policy.
    pub fn with_fetch_retry(mut self, retry: RetryConfig) -> Self {
        self.fetch_retry = retry;
        self
    }

    /// Sets the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Removes the per-call timeout.
    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Validates and returns the configured strategy.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] for an unknown strategy name.
    pub fn resolution_strategy(&self) -> SyncResult<ResolutionStrategy> {
        self.strategy
            .parse()
            .map_err(|e: replisync_protocol::ProtocolError| SyncError::Config(e.to_string()))
    }

    /// Validates the whole configuration and returns the strategy.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] for an unknown strategy, an unusable
    /// retry policy or a zero timeout.
    pub fn validate(&self) -> SyncResult<ResolutionStrategy> {
        let strategy = self.resolution_strategy()?;
        for (phase, retry) in [
            ("connect_retry", &self.connect_retry),
            ("fetch_retry", &self.fetch_retry),
            ("persist_retry", &self.persist_retry),
            ("push_retry", &self.push_retry),
        ] {
            retry
                .validate()
                .map_err(|reason| SyncError::Config(format!("{}: {}", phase, reason)))?;
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(SyncError::Config("timeout must be greater than zero".into()));
        }
        Ok(strategy)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(ResolutionStrategy::default())
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Checks that the policy can produce a delay for every retry.
    ///
    /// # Errors
    ///
    /// Returns a description of the first unusable field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".into());
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(format!(
                "backoff_multiplier must be finite and at least 1, got {}",
                self.backoff_multiplier
            ));
        }
        Ok(())
    }

    /// Calculates the delay before retry number `retry` (1-indexed).
    ///
    /// Retry 0 is the first attempt and has no delay. The result never
    /// exceeds `max_delay` plus jitter.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        let delay_secs = if self.add_jitter && delay_secs > 0.0 {
            delay_secs + delay_secs * rand::thread_rng().gen_range(0.0..0.25)
        } else {
            delay_secs
        };
        Duration::try_from_secs_f64(delay_secs).unwrap_or(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Configuration for a [`SyncChannel`](crate::SyncChannel).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Number of requests that can wait in the queue.
    pub queue_capacity: usize,
    /// Number of set ids that can run a cycle at the same time.
    pub max_concurrent_sets: usize,
    /// Number of completed correlation ids remembered for deduplication.
    pub dedupe_window: usize,
}

impl ChannelConfig {
    /// Sets the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Sets the number of concurrently running sets.
    pub fn with_max_concurrent_sets(mut self, max: usize) -> Self {
        self.max_concurrent_sets = max.max(1);
        self
    }

    /// Sets the deduplication window.
    pub fn with_dedupe_window(mut self, window: usize) -> Self {
        self.dedupe_window = window.max(1);
        self
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            max_concurrent_sets: 4,
            dedupe_window: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new(ResolutionStrategy::ClientWins)
            .with_push_retry(RetryConfig::new(5))
            .with_timeout(Duration::from_secs(60));

        assert_eq!(config.strategy, "client-wins");
        assert_eq!(config.push_retry.max_attempts, 5);
        assert_eq!(config.fetch_retry.max_attempts, 3);
        assert_eq!(config.timeout, Some(Duration::from_secs(60)));
        assert_eq!(
            config.resolution_strategy().unwrap(),
            ResolutionStrategy::ClientWins
        );
    }

    #[test]
    fn invalid_strategy_is_config_error() {
        let config = SyncConfig::default().with_strategy_setting("newest-wins");
        let err = config.resolution_strategy().unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn config_from_json() {
        let config: SyncConfig =
            serde_json::from_str(r#"{ "strategy": "server-wins", "timeout": null }"#).unwrap();
        assert_eq!(
            config.resolution_strategy().unwrap(),
            ResolutionStrategy::ServerWins
        );
        assert_eq!(config.timeout, None);
        assert_eq!(config.push_retry, RetryConfig::default());
    }

    #[test]
    fn retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.delay_for_attempt(1), Duration::ZERO);
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        let delay1 = config.delay_for_attempt(1);
        assert!(delay1 >= Duration::from_millis(100));
        assert!(delay1 <= Duration::from_millis(125));

        let delay2 = config.delay_for_attempt(2);
        assert!(delay2 >= Duration::from_millis(200));
        assert!(delay2 <= Duration::from_millis(250));
    }

    #[test]
    fn retry_delay_without_jitter_is_exact() {
        let config = RetryConfig::default().with_jitter(false);
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(4));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0);

        let delay = config.delay_for_attempt(5);
        assert!(delay <= Duration::from_millis(6250));
    }

    #[test]
    fn negative_multiplier_is_config_error() {
        let config: SyncConfig = serde_json::from_str(
            r#"{ "strategy": "merge", "push_retry": { "backoff_multiplier": -2.0 } }"#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, SyncError::Config(ref msg) if msg.starts_with("push_retry")));

        let config = SyncConfig::default().with_retry(RetryConfig::default().with_backoff_multiplier(f64::NAN));
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_attempts_and_zero_timeout_are_rejected() {
        let mut config = SyncConfig::default();
        config.fetch_retry.max_attempts = 0;
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));

        let config = SyncConfig::default().with_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));

        assert_eq!(SyncConfig::default().validate().unwrap(), ResolutionStrategy::Merge);
    }

    #[test]
    fn unvalidated_delay_never_panics() {
        let negative = RetryConfig::default().with_backoff_multiplier(-2.0);
        assert_eq!(negative.delay_for_attempt(2), negative.max_delay);

        let huge = RetryConfig::new(5)
            .with_initial_delay(Duration::from_secs(u64::MAX))
            .with_max_delay(Duration::MAX);
        assert_eq!(huge.delay_for_attempt(3), Duration::MAX);
    }

    #[test]
    fn channel_config_clamps_to_one() {
        let config = ChannelConfig::default()
            .with_queue_capacity(0)
            .with_max_concurrent_sets(0);
        assert_eq!(config.queue_capacity, 1);
        assert_eq!(config.max_concurrent_sets, 1);
    }
}
