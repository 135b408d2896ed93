//! Backoff policies shared by the retryer and the webhook middleware.
//!
//! A [`RetryConfig`] describes a policy; [`RetryConfig::backoff`] turns it
//! into a stateful [`Backoff`] that yields successive delays. Actual waiting
//! goes through a [`Sleeper`] so tests can observe delays without spending
//! wall-clock time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};

// =============================================================================
// Policy
// =============================================================================

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitingAlgorithm {
    /// Retry immediately.
    None,
    /// Start at half a second and multiply after every wait.
    #[default]
    Exponential,
    /// 1, 1, 2, 3, 5, 8 … seconds.
    Fibonacci,
}

/// Retry policy: how many attempts, and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total number of attempts, the first one included.
    pub max_attempts: u32,
    /// Delay progression.
    pub waiting_algorithm: WaitingAlgorithm,
    /// Growth factor of the exponential algorithm.
    pub multiplier: f64,
    /// Relative spread of each sleep, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            waiting_algorithm: WaitingAlgorithm::Exponential,
            multiplier: 1.5,
            jitter: 0.5,
        }
    }
}

impl RetryConfig {
    /// Creates a fresh backoff for this policy.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.waiting_algorithm, self.multiplier, self.jitter)
    }

    /// Returns this policy with `overrides` applied on top.
    pub fn merged(&self, overrides: &RetryOverrides) -> Self {
        Self {
            max_attempts: overrides.max_attempts.unwrap_or(self.max_attempts),
            waiting_algorithm: overrides
                .waiting_algorithm
                .unwrap_or(self.waiting_algorithm),
            multiplier: overrides.multiplier.unwrap_or(self.multiplier),
            jitter: overrides.jitter.unwrap_or(self.jitter),
        }
    }
}

/// Per-message-type changes to a [`RetryConfig`]. Unset fields inherit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOverrides {
    pub max_attempts: Option<u32>,
    pub waiting_algorithm: Option<WaitingAlgorithm>,
    pub multiplier: Option<f64>,
    pub jitter: Option<f64>,
}

/// A global policy plus per-message-type overrides.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    defaults: RetryConfig,
    intents: HashMap<String, RetryOverrides>,
}

impl RetryPolicy {
    pub fn new(defaults: RetryConfig) -> Self {
        Self {
            defaults,
            intents: HashMap::new(),
        }
    }

    /// Overrides the policy for one message type.
    pub fn with_intent(mut self, message_type: impl Into<String>, overrides: RetryOverrides) -> Self {
        self.intents.insert(message_type.into(), overrides);
        self
    }

    /// The effective policy for `message_type`.
    pub fn for_type(&self, message_type: &str) -> RetryConfig {
        match self.intents.get(message_type) {
            Some(overrides) => self.defaults.merged(overrides),
            None => self.defaults.clone(),
        }
    }

    pub fn defaults(&self) -> &RetryConfig {
        &self.defaults
    }
}

// =============================================================================
// Backoff state
// =============================================================================

const EXPONENTIAL_BASE_SECS: f64 = 0.5;

#[derive(Debug, Clone, Copy)]
enum State {
    None,
    Exponential { current: f64, multiplier: f64 },
    Fibonacci { current: f64, next: f64 },
}

/// Yields the successive delays of one retry sequence.
#[derive(Debug, Clone)]
pub struct Backoff {
    algorithm: WaitingAlgorithm,
    multiplier: f64,
    jitter: f64,
    state: State,
}

impl Backoff {
    /// A NaN or negative `multiplier` falls back to 1; `jitter` is clamped
    /// to `[0, 1]`, NaN meaning none.
    pub fn new(algorithm: WaitingAlgorithm, multiplier: f64, jitter: f64) -> Self {
        let multiplier = if multiplier.is_nan() || multiplier < 0.0 {
            1.0
        } else {
            multiplier
        };
        let jitter = if jitter.is_nan() {
            0.0
        } else {
            jitter.clamp(0.0, 1.0)
        };
        let mut backoff = Self {
            algorithm,
            multiplier,
            jitter,
            state: State::None,
        };
        backoff.reset();
        backoff
    }

    /// A backoff that never waits.
    pub fn none() -> Self {
        Self::new(WaitingAlgorithm::None, 1.0, 0.0)
    }

    /// Returns to the first delay of the sequence.
    pub fn reset(&mut self) {
        self.state = match self.algorithm {
            WaitingAlgorithm::None => State::None,
            WaitingAlgorithm::Exponential => State::Exponential {
                current: EXPONENTIAL_BASE_SECS,
                multiplier: self.multiplier,
            },
            WaitingAlgorithm::Fibonacci => State::Fibonacci {
                current: 1.0,
                next: 1.0,
            },
        };
    }

    /// Returns the next (jittered) delay and advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let base = match &mut self.state {
            State::None => return Duration::ZERO,
            State::Exponential {
                current,
                multiplier,
            } => {
                let delay = *current;
                *current *= *multiplier;
                delay
            }
            State::Fibonacci { current, next } => {
                let delay = *current;
                (*current, *next) = (*next, *current + *next);
                delay
            }
        };
        // Saturates once the sequence outgrows `Duration`.
        Duration::try_from_secs_f64(apply_jitter(base, self.jitter)).unwrap_or(Duration::MAX)
    }
}

/// Draws uniformly from `[delay·(1−jitter), delay·(1+jitter)]`.
fn apply_jitter(delay: f64, jitter: f64) -> f64 {
    if jitter <= 0.0 || !delay.is_finite() {
        return delay;
    }
    let low = delay * (1.0 - jitter);
    let high = delay * (1.0 + jitter);
    rand::thread_rng().gen_range(low..=high)
}

// =============================================================================
// Sleepers
// =============================================================================

/// Waits for a duration.
#[async_trait]
pub trait Sleeper: Send + Sync + 'static {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Records requested delays and returns immediately.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    calls: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay requested so far, in order.
    pub fn calls(&self) -> Vec<Duration> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.calls.lock().push(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(backoff: &mut Backoff, n: usize) -> Vec<f64> {
        (0..n).map(|_| backoff.next_delay().as_secs_f64()).collect()
    }

    #[test]
    fn test_fibonacci_sequence() {
        let mut backoff = Backoff::new(WaitingAlgorithm::Fibonacci, 1.0, 0.0);
        assert_eq!(secs(&mut backoff, 6), vec![1.0, 1.0, 2.0, 3.0, 5.0, 8.0]);

        backoff.reset();
        assert_eq!(secs(&mut backoff, 2), vec![1.0, 1.0]);
    }

    #[test]
    fn test_exponential_sequence() {
        let mut backoff = Backoff::new(WaitingAlgorithm::Exponential, 2.0, 0.0);
        assert_eq!(secs(&mut backoff, 4), vec![0.5, 1.0, 2.0, 4.0]);
    }

    #[test]
    fn test_none_never_waits() {
        let mut backoff = Backoff::none();
        assert_eq!(backoff.next_delay(), Duration::ZERO);
        assert_eq!(backoff.next_delay(), Duration::ZERO);
    }

    #[test]
    fn test_jitter_bounds() {
        let mut backoff = Backoff::new(WaitingAlgorithm::Exponential, 1.0, 0.5);
        for _ in 0..100 {
            let d = backoff.next_delay().as_secs_f64();
            assert!((0.25..=0.75).contains(&d), "delay {d} out of range");
        }
    }

    #[test]
    fn test_invalid_factors_are_sanitized() {
        let mut backoff = Backoff::new(WaitingAlgorithm::Exponential, -2.0, f64::NAN);
        assert_eq!(secs(&mut backoff, 3), vec![0.5, 0.5, 0.5]);

        let mut backoff = Backoff::new(WaitingAlgorithm::Exponential, f64::NAN, 3.0);
        for _ in 0..20 {
            let d = backoff.next_delay().as_secs_f64();
            assert!((0.0..=1.0).contains(&d), "delay {d} out of range");
        }
    }

    #[test]
    fn test_delay_saturates() {
        let mut backoff = Backoff::new(WaitingAlgorithm::Exponential, 1e300, 0.5);
        backoff.next_delay();
        assert_eq!(backoff.next_delay(), Duration::MAX);
        assert_eq!(backoff.next_delay(), Duration::MAX);
    }

    #[test]
    fn test_overrides() {
        let policy = RetryPolicy::new(RetryConfig::default()).with_intent(
            "charge",
            RetryOverrides {
                max_attempts: Some(5),
                waiting_algorithm: Some(WaitingAlgorithm::None),
                ..Default::default()
            },
        );

        let charge = policy.for_type("charge");
        assert_eq!(charge.max_attempts, 5);
        assert_eq!(charge.waiting_algorithm, WaitingAlgorithm::None);
        assert_eq!(charge.multiplier, 1.5);

        assert_eq!(policy.for_type("other"), RetryConfig::default());
    }

    #[tokio::test]
    async fn test_recording_sleeper() {
        let sleeper = RecordingSleeper::new();
        sleeper.sleep(Duration::from_millis(10)).await;
        sleeper.sleep(Duration::from_millis(20)).await;
        assert_eq!(
            sleeper.calls(),
            vec![Duration::from_millis(10), Duration::from_millis(20)]
        );
    }
}
