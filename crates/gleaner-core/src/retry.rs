//! Fetch-with-retry over any [`Transport`].
//!
//! # Attempt States
//!
//! ```text
//! INIT --> REQUESTING --[2xx]--------------------------> SUCCESS
//!              ^   |
//!              |   +--[429]------> RATE_LIMITED --[cooldown]--+
//!              |   +--[401/403]--> BLOCKED ------[rotate]-----+
//!              |   +--[other / network]--> FAILED --[backoff]-+
//!              |                                              |
//!              +----------------[budget left]-----------------+
//!                                                             |
//!                                  EXHAUSTED <--[no budget]---+
//! ```
//!
//! At most `max_retries + 1` transport calls are made per logical fetch.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::delay::DelayPolicy;
use crate::error::AppError;
use crate::models::{RequestDescriptor, Response};
use crate::monitor::ScrapeMonitor;
use crate::rotator::CredentialRotator;
use crate::traits::{Fetcher, Transport};

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// State of a single logical fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Init,
    Requesting,
    Success,
    RateLimited,
    Blocked,
    Failed,
    Exhausted,
}

impl FetchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FetchState::Success | FetchState::Exhausted)
    }
}

impl fmt::Display for FetchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FetchState::Init => "init",
            FetchState::Requesting => "requesting",
            FetchState::Success => "success",
            FetchState::RateLimited => "rate-limited",
            FetchState::Blocked => "blocked",
            FetchState::Failed => "failed",
            FetchState::Exhausted => "exhausted",
        };
        f.write_str(s)
    }
}

/// How a response status is treated by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    RateLimited,
    Blocked,
    /// Retry after exponential backoff.
    Retry,
    /// Give up immediately, without spending more budget.
    Fatal,
}

/// Maps an HTTP status to an [`Outcome`].
pub type Classifier = fn(u16) -> Outcome;

/// Default classification: 2xx success, 429 rate limit, 401/403 block,
/// everything else retried with backoff.
pub fn classify_status(status: u16) -> Outcome {
    match status {
        200..=299 => Outcome::Success,
        429 => Outcome::RateLimited,
        401 | 403 => Outcome::Blocked,
        _ => Outcome::Retry,
    }
}

/// Bookkeeping for one logical fetch; dropped when it ends.
#[derive(Debug, Default)]
struct RetryState {
    attempt: u32,
    last_error: Option<AppError>,
}

/// A [`Fetcher`] that wraps a [`Transport`] with jitter, credential
/// rotation and retry.
///
/// Clones share the rotator, the monitor and the cancellation token.
#[derive(Clone)]
pub struct RetryingFetcher<T> {
    transport: T,
    rotator: CredentialRotator,
    delays: DelayPolicy,
    max_retries: u32,
    classifier: Classifier,
    monitor: Option<ScrapeMonitor>,
    cancel: CancellationToken,
}

impl<T: Transport> RetryingFetcher<T> {
    pub fn new(transport: T, rotator: CredentialRotator, delays: DelayPolicy) -> Self {
        Self {
            transport,
            rotator,
            delays,
            max_retries: DEFAULT_MAX_RETRIES,
            classifier: classify_status,
            monitor: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_monitor(mut self, monitor: ScrapeMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Stop starting new attempts once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn rotator(&self) -> &CredentialRotator {
        &self.rotator
    }

    /// Sleep for `duration` unless cancelled first.
    async fn pause(&self, duration: Duration) -> Result<(), AppError> {
        if self.cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            () = tokio::time::sleep(duration) => Ok(()),
            () = self.cancel.cancelled() => Err(AppError::Cancelled),
        }
    }

    fn record(&self, success: bool, started: Instant) {
        if let Some(monitor) = &self.monitor {
            monitor.record_attempt(success, started.elapsed());
        }
    }

    /// Run one attempt and turn its outcome into the next state.
    async fn attempt(
        &self,
        request: &RequestDescriptor,
    ) -> Result<Response, (FetchState, AppError)> {
        let credential = self.rotator.next_credential();
        tracing::debug!(
            url = %request.url(),
            proxy = ?credential.proxy,
            state = %FetchState::Requesting,
            "Sending request"
        );

        let started = Instant::now();
        let result = self.transport.send(request, &credential).await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.record(false, started);
                return Err(if e.is_retryable() {
                    (FetchState::Failed, e)
                } else {
                    (FetchState::Exhausted, e)
                });
            }
        };

        let status = response.status;
        let outcome = (self.classifier)(status);
        self.record(outcome == Outcome::Success, started);
        match outcome {
            Outcome::Success => Ok(response),
            Outcome::RateLimited => Err((FetchState::RateLimited, AppError::RateLimited)),
            Outcome::Blocked => Err((FetchState::Blocked, AppError::Blocked { status })),
            Outcome::Retry => Err((
                FetchState::Failed,
                AppError::HttpStatus {
                    status,
                    url: response.url,
                },
            )),
            Outcome::Fatal => Err((
                FetchState::Exhausted,
                AppError::HttpStatus {
                    status,
                    url: response.url,
                },
            )),
        }
    }
}

impl<T: Transport> Fetcher for RetryingFetcher<T> {
    async fn fetch(&self, request: &RequestDescriptor) -> Result<Response, AppError> {
        let mut state = RetryState::default();
        tracing::debug!(url = %request.url(), state = %FetchState::Init, "Fetch started");

        loop {
            self.pause(self.delays.jitter()).await?;

            let (next, error) = match self.attempt(request).await {
                Ok(response) => {
                    tracing::debug!(
                        url = %request.url(),
                        status = response.status,
                        attempt = state.attempt + 1,
                        state = %FetchState::Success,
                        "Fetch succeeded"
                    );
                    return Ok(response);
                }
                Err(pair) => pair,
            };

            // Non-retryable transport errors end the call as-is.
            if next == FetchState::Exhausted {
                tracing::warn!(url = %request.url(), error = %error, "Fetch failed permanently");
                return Err(error);
            }

            if state.attempt >= self.max_retries {
                let attempts = state.attempt + 1;
                tracing::warn!(
                    url = %request.url(),
                    attempts,
                    error = %error,
                    state = %FetchState::Exhausted,
                    "Retry budget exhausted"
                );
                return Err(AppError::RetryExhausted {
                    attempts,
                    last: Box::new(error),
                });
            }

            let wait = match next {
                FetchState::RateLimited => self.delays.rate_limit_cooldown,
                FetchState::Blocked => {
                    let proxy = self.rotator.rotate_proxy();
                    tracing::warn!(url = %request.url(), ?proxy, "Blocked; rotating credential");
                    Duration::ZERO
                }
                _ => self.delays.backoff(state.attempt),
            };

            tracing::warn!(
                url = %request.url(),
                attempt = state.attempt + 1,
                max_attempts = self.max_retries + 1,
                state = %next,
                wait_ms = wait.as_millis() as u64,
                error = %error,
                "Request failed, retrying"
            );

            state.last_error = Some(error);
            if let Err(cancelled) = self.pause(wait).await {
                tracing::debug!(last_error = ?state.last_error, "Cancelled while waiting to retry");
                return Err(cancelled);
            }
            state.attempt += 1;
        }
    }
}
