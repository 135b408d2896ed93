//! Bounded retries around the downstream chain.
//!
//! An attempt fails when the rest of the chain returns an error or when it
//! grew the envelope's count of `error` stamps. Each failure is recorded as a
//! `retried` stamp. Once attempts run out the last error is returned; if no
//! attempt ever errored (only soft failures) the dispatch succeeds.

use std::sync::Arc;

use async_trait::async_trait;
use missive_core::{
    DispatchError, DispatchResult, Envelope, Middleware, Next, RetriedBody, stamps,
};
use tracing::{debug, warn};

use crate::backoff::{RetryConfig, RetryOverrides, RetryPolicy, Sleeper, TokioSleeper};

/// Retries the downstream chain with backoff.
pub struct Retryer {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl Default for Retryer {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl Retryer {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            policy: RetryPolicy::new(config),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Uses a complete policy, overrides included.
    pub fn from_policy(policy: RetryPolicy) -> Self {
        Self {
            policy,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Overrides the policy for one message type.
    pub fn with_intent(mut self, message_type: impl Into<String>, overrides: RetryOverrides) -> Self {
        self.policy = self.policy.with_intent(message_type, overrides);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }
}

#[async_trait]
impl Middleware for Retryer {
    async fn handle(&self, envelope: Arc<Envelope>, next: Next<'_>) -> DispatchResult<()> {
        let config = self.policy.for_type(envelope.message_type());
        let max_attempts = config.max_attempts.max(1);
        let mut backoff = config.backoff();
        let mut last_error: Option<DispatchError> = None;

        for attempt in 1..=max_attempts {
            let errors_before = envelope.count_stamps(stamps::ERROR);
            let error_message = match next.run(Arc::clone(&envelope)).await {
                Ok(()) => {
                    let new_errors = envelope.count_stamps(stamps::ERROR) - errors_before;
                    if new_errors == 0 {
                        return Ok(());
                    }
                    format!("New error stamp count: {new_errors}")
                }
                Err(e) => {
                    let message = e.to_string();
                    last_error = Some(e);
                    message
                }
            };

            debug!(attempt, max_attempts, error = %error_message, "Attempt failed");
            envelope.add_stamp_with(
                stamps::RETRIED,
                &RetriedBody {
                    attempt,
                    error_message,
                },
            );

            if attempt < max_attempts {
                self.sleeper.sleep(backoff.next_delay()).await;
            }
        }

        warn!(
            message_type = %envelope.message_type(),
            max_attempts,
            "Retry attempts exhausted"
        );
        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
