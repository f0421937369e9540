// src/resilience/retry.rs

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::AdmissionError;
use crate::resilience::{CircuitBreaker, ExponentialBackoff, RetryConfig};

/// Why a retried operation finally gave up
#[derive(Error, Debug)]
pub enum RetryError<E> {
    #[error("circuit breaker '{name}' is open, retry after {retry_after:?}")]
    BreakerOpen {
        name: String,
        retry_after: Duration,
        attempts: u32,
    },

    #[error("gave up after {attempts} attempts: {error}")]
    Exhausted { attempts: u32, error: E },

    #[error("non-retryable failure on attempt {attempts}: {error}")]
    Permanent { attempts: u32, error: E },

    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

impl<E> RetryError<E> {
    /// Calls actually made to the operation
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::BreakerOpen { attempts, .. }
            | RetryError::Exhausted { attempts, .. }
            | RetryError::Permanent { attempts, .. }
            | RetryError::Cancelled { attempts } => *attempts,
        }
    }

    /// The operation's last error, if it produced one
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Exhausted { error, .. } | RetryError::Permanent { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl<E: fmt::Display> From<RetryError<E>> for AdmissionError {
    fn from(err: RetryError<E>) -> Self {
        match err {
            RetryError::BreakerOpen {
                name, retry_after, ..
            } => AdmissionError::BreakerOpen { name, retry_after },
            RetryError::Exhausted { attempts, error } | RetryError::Permanent { attempts, error } => {
                AdmissionError::RetryExhausted {
                    attempts,
                    last_error: error.to_string(),
                }
            }
            RetryError::Cancelled { attempts } => AdmissionError::Cancelled { attempts },
        }
    }
}

type Retryable<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Retry settings plus the rule deciding which failures are worth retrying
pub struct RetryPolicy<E> {
    config: RetryConfig,
    retryable: Retryable<E>,
}

impl<E> RetryPolicy<E> {
    /// Policy that retries every failure
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            retryable: Arc::new(|_| true),
        }
    }

    pub fn with_retryable<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn is_retryable(&self, error: &E) -> bool {
        (self.retryable)(error)
    }
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            retryable: Arc::clone(&self.retryable),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Runs fallible async operations with exponential backoff.
///
/// Backoff sleeps end early when the cancellation token fires or the
/// deadline passes; an attempt already in flight is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RetryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// Stop retrying once `deadline` passes
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `operation` until it succeeds, fails permanently or runs out of attempts.
    ///
    /// With a breaker, every attempt must be admitted by it and reports its
    /// outcome back.
    pub async fn run<T, E, F, Fut>(
        &self,
        mut operation: F,
        policy: &RetryPolicy<E>,
        breaker: Option<&CircuitBreaker>,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let mut backoff = ExponentialBackoff::new(policy.config().clone());
        let mut attempt: u32 = 1;

        loop {
            if let Some(breaker) = breaker {
                if let Err(AdmissionError::BreakerOpen { name, retry_after }) = breaker.try_acquire() {
                    debug!(breaker = %name, ?retry_after, "Attempt rejected by open breaker");
                    return Err(RetryError::BreakerOpen {
                        name,
                        retry_after,
                        attempts: attempt - 1,
                    });
                }
            }

            match operation().await {
                Ok(value) => {
                    if let Some(breaker) = breaker {
                        breaker.record_success();
                    }
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if let Some(breaker) = breaker {
                        breaker.record_failure();
                    }

                    if !policy.is_retryable(&error) {
                        debug!(attempt, %error, "Failure is not retryable");
                        return Err(RetryError::Permanent {
                            attempts: attempt,
                            error,
                        });
                    }

                    let Some(delay) = backoff.next_backoff() else {
                        warn!(attempts = attempt, %error, "Retry attempts exhausted");
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            error,
                        });
                    };

                    debug!(attempt, ?delay, %error, "Attempt failed, backing off");
                    if !self.pause(delay).await {
                        debug!(attempt, "Retry cancelled during backoff");
                        return Err(RetryError::Cancelled { attempts: attempt });
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Sleep for `delay`; false when cancelled or past the deadline first
    async fn pause(&self, delay: Duration) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let deadline = async {
            match self.deadline {
                Some(deadline) => time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = deadline => false,
            _ = time::sleep(delay) => true,
        }
    }
}
