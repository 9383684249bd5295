//! Configuration for the client.

use rand::Rng;
use std::time::Duration;

/// Configuration for the patch log, mutation layer and sync engine.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Delay between update polls in [`SyncEngine::run`](crate::SyncEngine::run).
    pub poll_interval: Duration,
    /// Maximum number of revisions requested per update fetch.
    pub fetch_limit: u64,
    /// Retry configuration for transport failures.
    pub retry: RetryConfig,
    /// Upper bound on a remote mutation while a speculative patch is shown.
    ///
    /// `None` waits indefinitely. When set, an expired call rolls back its
    /// speculative patch and fails with [`RemoteError::Timeout`](crate::RemoteError::Timeout).
    pub speculative_timeout: Option<Duration>,
    /// Buffer size of the session event channel.
    pub session_capacity: usize,
}

impl ClientConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            fetch_limit: 100,
            retry: RetryConfig::default(),
            speculative_timeout: None,
            session_capacity: 16,
        }
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the fetch limit. Zero is treated as one.
    pub fn with_fetch_limit(mut self, limit: u64) -> Self {
        self.fetch_limit = limit.max(1);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Bounds remote mutations that carry a speculative patch.
    pub fn with_speculative_timeout(mut self, timeout: Duration) -> Self {
        self.speculative_timeout = Some(timeout);
        self
    }

    /// Delay before retry `attempt` within one sync tick: the backoff, never
    /// longer than the poll interval.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.retry.delay_for_attempt(attempt).min(self.poll_interval)
    }

    /// Sets the session event buffer size.
    pub fn with_session_capacity(mut self, capacity: usize) -> Self {
        self.session_capacity = capacity.max(1);
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Fraction of a backoff delay added as random jitter.
const JITTER_FRACTION: f64 = 0.25;

/// Backoff inside one sync tick.
///
/// [`SyncEngine::sync_with_retry`](crate::SyncEngine::sync_with_retry) retries
/// only retryable transport failures. When the attempts run out the cycle
/// fails, and [`SyncEngine::run`](crate::SyncEngine::run) starts over on its
/// next poll, so a delay never needs to exceed the poll interval (see
/// [`ClientConfig::retry_delay`]).
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts per tick, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on a single delay before jitter.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,
    /// Jitter as a fraction of the delay; zero disables it.
    pub jitter: f64,
}

impl RetryConfig {
    /// Creates a configuration with `max_attempts` per tick.
    ///
    /// Delays start at 50ms and double up to the default poll interval.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: JITTER_FRACTION,
        }
    }

    /// One attempt per tick; failures wait for the next poll.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Sets the delay before the first retry.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the upper bound on a single delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the growth factor. Values below one are treated as one.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    /// Turns the default jitter on or off. Tests turn it off for exact delays.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter = if enabled { JITTER_FRACTION } else { 0.0 };
        self
    }

    /// Delay before attempt `attempt` (0 is the first call and never waits).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let grown = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = grown.min(self.max_delay.as_secs_f64());

        let factor = if self.jitter > 0.0 {
            1.0 + self.jitter * rand::thread_rng().gen::<f64>()
        } else {
            1.0
        };
        Duration::from_secs_f64(capped * factor)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}
