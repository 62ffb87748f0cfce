//! Bounded retry over a fixed delay schedule.
//!
//! Provides:
//! - A fixed delay list (no jitter, no growth)
//! - A generic retry loop with a retry predicate
//! - A [`Transport`] decorator that retries transient failures

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::transport::{OutgoingCall, RawOutcome, Transport, TransportError};

/// Statuses worth another attempt: the server may answer differently soon.
const TRANSIENT_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Configuration for backoff retry.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Maximum number of attempts (including the first one).
    pub max_attempts: u32,
    /// Delay before each retry. The last entry repeats if attempts outnumber it.
    pub delays: Vec<Duration>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(5),
            ],
        }
    }
}

impl BackoffConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the delay schedule.
    pub fn with_delays(mut self, delays: Vec<Duration>) -> Self {
        self.delays = delays;
        self
    }

    /// Delay after the given failed attempt (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delays
            .get(attempt as usize)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

/// Statistics about a retry loop.
#[derive(Debug, Clone, Default)]
pub struct BackoffStats {
    /// Number of attempts made.
    pub attempts: u32,
    /// Total delay accumulated.
    pub total_delay: Duration,
    /// Whether the operation ultimately succeeded.
    pub success: bool,
    /// Last error message if failed.
    pub last_error: Option<String>,
}

/// Retry an async operation over the configured delay schedule.
///
/// Returns the final result together with loop statistics.
pub async fn retry_async<F, Fut, T, E>(
    config: &BackoffConfig,
    mut operation: F,
    should_retry: impl Fn(&E) -> bool,
) -> (Result<T, E>, BackoffStats)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut stats = BackoffStats::default();
    let mut attempt = 0u32;

    loop {
        stats.attempts = attempt + 1;

        let error = match operation().await {
            Ok(value) => {
                stats.success = true;
                if attempt > 0 {
                    debug!("Operation succeeded after {} attempts", attempt + 1);
                }
                return (Ok(value), stats);
            }
            Err(e) => e,
        };

        stats.last_error = Some(error.to_string());

        if !should_retry(&error) {
            debug!("Error is not retryable: {}", error);
            return (Err(error), stats);
        }

        if attempt + 1 >= config.max_attempts.max(1) {
            warn!(
                "All {} retry attempts exhausted. Last error: {}",
                config.max_attempts, error
            );
            return (Err(error), stats);
        }

        let delay = config.delay_for(attempt);
        stats.total_delay += delay;
        warn!(
            "Attempt {}/{} failed: {}. Retrying in {:?}",
            attempt + 1,
            config.max_attempts,
            error,
            delay
        );

        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// A dispatch result that deserves another attempt.
struct TransientFailure(RawOutcome);

impl std::fmt::Display for TransientFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Ok(response) => write!(f, "HTTP {}", response.status),
            Err(e) => write!(f, "{}", e),
        }
    }
}

fn is_transient(raw: &RawOutcome) -> bool {
    match raw {
        Ok(response) => TRANSIENT_STATUSES.contains(&response.status),
        Err(TransportError::Cancelled) => false,
        Err(err) => !err.is_local(),
    }
}

/// Transport decorator that retries transient failures with fixed delays.
///
/// After the last attempt the final result is handed back unchanged, so a
/// transient status still reaches the classifier as a response.
#[derive(Debug, Clone)]
pub struct BackoffRetry<T> {
    inner: T,
    config: BackoffConfig,
}

impl<T: Transport> BackoffRetry<T> {
    pub fn new(inner: T, config: BackoffConfig) -> Self {
        Self { inner, config }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}

#[async_trait]
impl<T: Transport> Transport for BackoffRetry<T> {
    async fn send(&self, call: &OutgoingCall) -> RawOutcome {
        let (result, stats) = retry_async(
            &self.config,
            move || async move {
                let raw = self.inner.send(call).await;
                if is_transient(&raw) {
                    Err(TransientFailure(raw))
                } else {
                    Ok(raw)
                }
            },
            |_: &TransientFailure| true,
        )
        .await;

        if stats.attempts > 1 {
            debug!(
                "{} {} finished after {} attempts ({:?} waiting)",
                call.descriptor.method(),
                call.url,
                stats.attempts,
                stats.total_delay
            );
        }

        match result {
            Ok(raw) | Err(TransientFailure(raw)) => raw,
        }
    }
}
