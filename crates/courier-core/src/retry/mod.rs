//! Retry policies that wrap a [`Transport`](crate::transport::Transport).
//!
//! Two independent policies live here:
//! - [`RetryScheduler`] waits for connectivity to return after a
//!   transport-level failure, then replays the call exactly once.
//! - [`BackoffRetry`] retries transient failures over a fixed delay list.

mod backoff;
mod scheduler;

pub use backoff::{retry_async, BackoffConfig, BackoffRetry, BackoffStats};
pub use scheduler::{
    with_connectivity_retry, ConnectivityRetry, RetryScheduler, RetryStats, RetryStatus,
};
