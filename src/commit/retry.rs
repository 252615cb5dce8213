use super::observer::CommitObserver;
use super::step::AttemptResult;
use crate::core::{CommitAction, RemoteError};
use log::debug;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Fixed delay between attempts unless configured otherwise.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1_000);

/// Retry configuration for one commit step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before giving up. `None` retries until the process is stopped.
    pub max_attempts: Option<u32>,
    /// Fixed wait between attempts.
    pub delay: Duration,
    /// Also wait after the successful attempt.
    pub delay_after_success: bool,
    /// Wall-clock budget. The loop gives up instead of starting a wait that would cross it.
    pub max_elapsed: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            delay: DEFAULT_RETRY_DELAY,
            delay_after_success: true,
            max_elapsed: None,
        }
    }
}

impl RetryPolicy {
    /// Retry forever with the default delay.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            ..Self::default()
        }
    }

    /// One attempt, no waiting.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: Some(1),
            delay_after_success: false,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_delay_after_success(mut self, enabled: bool) -> Self {
        self.delay_after_success = enabled;
        self
    }

    pub fn with_max_elapsed(mut self, budget: Duration) -> Self {
        self.max_elapsed = Some(budget);
        self
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_attempts.is_none() && self.max_elapsed.is_none()
    }

    fn attempts_exhausted(&self, attempt: u32) -> bool {
        self.max_attempts
            .is_some_and(|max_attempts| attempt >= max_attempts.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Fatal,
}

/// Decides whether a remote error is worth another attempt.
#[derive(Clone)]
pub struct ErrorClassifier {
    name: &'static str,
    classify: Arc<dyn Fn(&RemoteError) -> ErrorClass + Send + Sync>,
}

impl ErrorClassifier {
    /// Every remote error is retryable.
    pub fn retry_all() -> Self {
        Self {
            name: "retry_all",
            classify: Arc::new(|_| ErrorClass::Retryable),
        }
    }

    /// Malformed responses and 4xx rejections are fatal; everything else is retried.
    pub fn strict() -> Self {
        Self {
            name: "strict",
            classify: Arc::new(|err| match err {
                RemoteError::MalformedResponse(_) => ErrorClass::Fatal,
                RemoteError::Rejected { status, .. } if (400..500).contains(status) => {
                    ErrorClass::Fatal
                }
                _ => ErrorClass::Retryable,
            }),
        }
    }

    pub fn classify(&self, err: &RemoteError) -> ErrorClass {
        (self.classify)(err)
    }

    /// Maps a remote error into the matching attempt result.
    pub fn to_attempt(&self, err: RemoteError) -> AttemptResult {
        match self.classify(&err) {
            ErrorClass::Retryable => AttemptResult::RetryableFailure(err.to_string()),
            ErrorClass::Fatal => AttemptResult::FatalFailure(err.to_string()),
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::retry_all()
    }
}

impl fmt::Debug for ErrorClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ErrorClassifier").field(&self.name).finish()
    }
}

/// Terminal result of a retry loop: never a `RetryableFailure`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOutcome {
    pub result: AttemptResult,
    pub attempts: u32,
}

/// Drives one step to a terminal result under a [`RetryPolicy`].
pub struct RetryLoop<'a> {
    action: CommitAction,
    policy: &'a RetryPolicy,
    observer: &'a dyn CommitObserver,
}

impl<'a> RetryLoop<'a> {
    pub fn new(
        action: CommitAction,
        policy: &'a RetryPolicy,
        observer: &'a dyn CommitObserver,
    ) -> Self {
        Self {
            action,
            policy,
            observer,
        }
    }

    /// Calls `attempt` with the 1-based attempt number until it succeeds,
    /// fails fatally, or the policy gives up.
    pub async fn drive<F, Fut>(&self, mut attempt: F) -> RetryOutcome
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = AttemptResult>,
    {
        let started = Instant::now();
        let mut attempt_no = 0u32;

        loop {
            attempt_no += 1;
            let result = attempt(attempt_no).await;
            self.observer.on_attempt(self.action, attempt_no, &result);

            let reason = match result {
                AttemptResult::Success(receipt) => {
                    if self.policy.delay_after_success {
                        tokio::time::sleep(self.policy.delay).await;
                    }
                    return RetryOutcome {
                        result: AttemptResult::Success(receipt),
                        attempts: attempt_no,
                    };
                }
                AttemptResult::FatalFailure(reason) => {
                    return RetryOutcome {
                        result: AttemptResult::FatalFailure(reason),
                        attempts: attempt_no,
                    };
                }
                AttemptResult::RetryableFailure(reason) => reason,
            };

            if self.policy.attempts_exhausted(attempt_no) {
                return RetryOutcome {
                    result: AttemptResult::FatalFailure(reason),
                    attempts: attempt_no,
                };
            }

            if let Some(budget) = self.policy.max_elapsed {
                if started.elapsed() + self.policy.delay > budget {
                    return RetryOutcome {
                        result: AttemptResult::FatalFailure(format!(
                            "retry budget of {}ms exhausted: {}",
                            budget.as_millis(),
                            reason
                        )),
                        attempts: attempt_no,
                    };
                }
            }

            debug!(
                "{} attempt {} scheduled in {}ms",
                self.action,
                attempt_no + 1,
                self.policy.delay.as_millis()
            );
            tokio::time::sleep(self.policy.delay).await;
        }
    }
}
