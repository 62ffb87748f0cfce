//! Connectivity-triggered single replay.
//!
//! When a dispatch fails without any HTTP response, the scheduler subscribes
//! to the connectivity monitor, asks it to re-check, and races the first
//! `Online` event against a bounded timer. Whichever resolves first wins;
//! the loser is dropped.
//! Connectivity returning triggers exactly one replay, however many times it
//! flaps afterwards.

use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::classify::classify_kind;
use crate::connectivity::{ConnectivityMonitor, ConnectivityState, ConnectivitySubscription};
use crate::transport::{OutgoingCall, RawOutcome, TimeoutPhase, Transport, TransportError};

/// Where a retry episode currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStatus {
    Idle,
    AwaitingConnectivity,
    Replaying,
    Exhausted,
}

impl std::fmt::Display for RetryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryStatus::Idle => write!(f, "idle"),
            RetryStatus::AwaitingConnectivity => write!(f, "awaiting connectivity"),
            RetryStatus::Replaying => write!(f, "replaying"),
            RetryStatus::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Counters across every episode a scheduler has run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryStats {
    /// Retryable failures that entered the connectivity wait.
    pub episodes: u64,
    /// Replays issued after connectivity returned.
    pub replays: u64,
    /// Waits that hit the timeout.
    pub exhausted: u64,
    /// Waits abandoned by the caller.
    pub cancelled: u64,
}

#[derive(Debug, Default)]
struct Counters {
    episodes: AtomicU64,
    replays: AtomicU64,
    exhausted: AtomicU64,
    cancelled: AtomicU64,
}

/// State of one in-flight retry episode.
///
/// Dropping it while still awaiting connectivity means the caller abandoned
/// the request, which is counted as a cancellation.
struct Episode<'a> {
    counters: &'a Counters,
    status: RetryStatus,
}

impl<'a> Episode<'a> {
    fn new(counters: &'a Counters) -> Self {
        Self {
            counters,
            status: RetryStatus::Idle,
        }
    }

    fn transition(&mut self, next: RetryStatus) {
        debug!("Retry status {} -> {}", self.status, next);
        self.status = next;
    }
}

impl Drop for Episode<'_> {
    fn drop(&mut self) {
        if self.status == RetryStatus::AwaitingConnectivity {
            self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
            debug!("Retry abandoned while awaiting connectivity");
        }
    }
}

/// Replays a failed dispatch once connectivity returns.
pub struct RetryScheduler {
    monitor: Arc<dyn ConnectivityMonitor>,
    wait_timeout: Duration,
    counters: Counters,
}

impl std::fmt::Debug for RetryScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryScheduler")
            .field("wait_timeout", &self.wait_timeout)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl RetryScheduler {
    /// Create a scheduler that waits at most `wait_timeout` for connectivity.
    pub fn new(monitor: Arc<dyn ConnectivityMonitor>, wait_timeout: Duration) -> Self {
        Self {
            monitor,
            wait_timeout,
            counters: Counters::default(),
        }
    }

    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    pub fn stats(&self) -> RetryStats {
        RetryStats {
            episodes: self.counters.episodes.load(Ordering::Relaxed),
            replays: self.counters.replays.load(Ordering::Relaxed),
            exhausted: self.counters.exhausted.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
        }
    }

    /// Run `dispatch`, replaying it at most once if it fails retryably.
    ///
    /// A failure is retryable only when no HTTP response exists. If
    /// connectivity does not come back within the wait timeout the result is
    /// a connectivity-wait timeout.
    pub async fn run<F, Fut>(&self, mut dispatch: F) -> RawOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RawOutcome>,
    {
        let first = dispatch().await;
        if !is_replayable(&first) {
            return first;
        }

        let mut episode = Episode::new(&self.counters);
        self.counters.episodes.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = &first {
            info!(
                "Dispatch failed ({}), waiting up to {:?} for connectivity",
                e, self.wait_timeout
            );
        }

        episode.transition(RetryStatus::AwaitingConnectivity);
        let subscription = self.monitor.subscribe();
        let restored = tokio::select! {
            _ = wait_for_online(subscription) => true,
            _ = self.monitor.recheck() => true,
            _ = tokio::time::sleep(self.wait_timeout) => false,
        };

        if !restored {
            episode.transition(RetryStatus::Exhausted);
            self.counters.exhausted.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Connectivity did not return within {:?}, giving up",
                self.wait_timeout
            );
            return Err(TransportError::Timeout(TimeoutPhase::ConnectivityWait));
        }

        episode.transition(RetryStatus::Replaying);
        self.counters.replays.fetch_add(1, Ordering::Relaxed);
        info!("Connectivity restored, replaying request");
        dispatch().await
    }
}

/// Whether `raw` failed without any HTTP response for a reason connectivity
/// returning could fix.
fn is_replayable(raw: &RawOutcome) -> bool {
    match raw {
        Err(err) if err.is_local() => false,
        other => classify_kind(other).is_retryable(),
    }
}

/// Resolve on the first `Online` event, consuming the subscription.
///
/// The subscription is dropped on return, so later flaps are never seen. If
/// the monitor goes away the wait never resolves and the timer decides.
async fn wait_for_online(mut subscription: ConnectivitySubscription) {
    loop {
        match subscription.next().await {
            Some(ConnectivityState::Online) => return,
            Some(ConnectivityState::Offline) => continue,
            None => std::future::pending::<()>().await,
        }
    }
}

/// Transport decorator that routes every dispatch through a [`RetryScheduler`].
#[derive(Debug, Clone)]
pub struct ConnectivityRetry<T> {
    inner: T,
    scheduler: Arc<RetryScheduler>,
}

impl<T> ConnectivityRetry<T> {
    pub fn scheduler(&self) -> &Arc<RetryScheduler> {
        &self.scheduler
    }
}

/// Wrap `transport` so retryable failures wait for connectivity and replay once.
pub fn with_connectivity_retry<T: Transport>(
    transport: T,
    scheduler: Arc<RetryScheduler>,
) -> ConnectivityRetry<T> {
    ConnectivityRetry {
        inner: transport,
        scheduler,
    }
}

#[async_trait]
impl<T: Transport> Transport for ConnectivityRetry<T> {
    async fn send(&self, call: &OutgoingCall) -> RawOutcome {
        let inner = &self.inner;
        self.scheduler.run(move || inner.send(call)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::ManualConnectivity;
    use crate::testing::{call, ScriptedTransport};
    use crate::transport::RawResponse;

    fn setup(
        replies: Vec<RawOutcome>,
    ) -> (
        Arc<ScriptedTransport>,
        Arc<ManualConnectivity>,
        ConnectivityRetry<Arc<ScriptedTransport>>,
    ) {
        let inner = ScriptedTransport::new(replies);
        let monitor = Arc::new(ManualConnectivity::online());
        let scheduler = Arc::new(RetryScheduler::new(
            monitor.clone(),
            Duration::from_secs(30),
        ));
        let transport = with_connectivity_retry(inner.clone(), scheduler);
        (inner, monitor, transport)
    }

    async fn until_subscribed(monitor: &ManualConnectivity) {
        while monitor.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_http_error_is_never_retried() {
        let (inner, monitor, transport) = setup(vec![Ok(RawResponse::new(500, ""))]);

        let raw = transport.send(&call("http://localhost/x")).await;
        assert_eq!(raw.unwrap().status, 500);
        assert_eq!(inner.calls(), 1);
        assert_eq!(monitor.subscriber_count(), 0);
        assert_eq!(transport.scheduler().stats().episodes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_without_replay() {
        let (inner, monitor, transport) =
            setup(vec![Err(TransportError::Timeout(TimeoutPhase::Connect))]);

        let start = tokio::time::Instant::now();
        let raw = transport.send(&call("http://localhost/x")).await;

        assert_eq!(
            raw,
            Err(TransportError::Timeout(TimeoutPhase::ConnectivityWait))
        );
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert_eq!(inner.calls(), 1);
        assert_eq!(monitor.subscriber_count(), 0);

        let stats = transport.scheduler().stats();
        assert_eq!(stats.episodes, 1);
        assert_eq!(stats.exhausted, 1);
        assert_eq!(stats.replays, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flapping_connectivity_replays_once() {
        let (inner, monitor, transport) =
            setup(vec![Err(TransportError::Connect("unreachable".into()))]);
        let transport = Arc::new(transport);

        let task = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.send(&call("http://localhost/x")).await })
        };

        until_subscribed(&monitor).await;
        monitor.set(ConnectivityState::Offline);
        monitor.set(ConnectivityState::Online);
        monitor.set(ConnectivityState::Offline);
        monitor.set(ConnectivityState::Online);

        let raw = task.await.unwrap();
        assert_eq!(raw.unwrap().status, 200);
        assert_eq!(inner.calls(), 2);
        assert_eq!(monitor.subscriber_count(), 0);
        assert_eq!(transport.scheduler().stats().replays, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_events_keep_waiting() {
        let (inner, monitor, transport) = setup(vec![Err(TransportError::NoConnectivity)]);
        let transport = Arc::new(transport);

        let task = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.send(&call("http://localhost/x")).await })
        };

        until_subscribed(&monitor).await;
        monitor.set(ConnectivityState::Offline);
        monitor.set(ConnectivityState::Offline);

        let raw = task.await.unwrap();
        assert_eq!(
            raw,
            Err(TransportError::Timeout(TimeoutPhase::ConnectivityWait))
        );
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_failure_is_final() {
        let (inner, monitor, transport) = setup(vec![
            Err(TransportError::Connect("unreachable".into())),
            Err(TransportError::Connect("still unreachable".into())),
        ]);
        let transport = Arc::new(transport);

        let task = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.send(&call("http://localhost/x")).await })
        };

        until_subscribed(&monitor).await;
        monitor.set(ConnectivityState::Online);

        let raw = task.await.unwrap();
        assert_eq!(
            raw,
            Err(TransportError::Connect("still unreachable".into()))
        );
        assert_eq!(inner.calls(), 2);
        assert_eq!(monitor.subscriber_count(), 0);
    }

    /// Monitor that confirms connectivity on its own after `delay`.
    struct Rechecking {
        delay: Duration,
        rechecks: std::sync::atomic::AtomicU32,
        events: tokio::sync::broadcast::Sender<ConnectivityState>,
    }

    #[async_trait]
    impl ConnectivityMonitor for Rechecking {
        async fn is_connected(&self) -> bool {
            true
        }

        fn subscribe(&self) -> ConnectivitySubscription {
            ConnectivitySubscription::new(self.events.subscribe())
        }

        async fn recheck(&self) {
            self.rechecks.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recheck_confirming_online_triggers_replay() {
        let inner = ScriptedTransport::new(vec![Err(TransportError::Connect("reset".into()))]);
        let monitor = Arc::new(Rechecking {
            delay: Duration::from_secs(5),
            rechecks: Default::default(),
            events: tokio::sync::broadcast::channel(1).0,
        });
        let scheduler = Arc::new(RetryScheduler::new(monitor.clone(), Duration::from_secs(30)));
        let transport = with_connectivity_retry(inner.clone(), scheduler);

        let start = tokio::time::Instant::now();
        let raw = transport.send(&call("http://localhost/x")).await;

        assert_eq!(raw.unwrap().status, 200);
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(30));
        assert_eq!(inner.calls(), 2);
        assert_eq!(monitor.rechecks.load(Ordering::SeqCst), 1);
        assert_eq!(transport.scheduler().stats().replays, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_failure_is_never_retried() {
        let (inner, monitor, transport) =
            setup(vec![Err(TransportError::Local("invalid header name".into()))]);

        let raw = transport.send(&call("http://localhost/x")).await;
        assert_eq!(raw, Err(TransportError::Local("invalid header name".into())));
        assert_eq!(inner.calls(), 1);
        assert_eq!(monitor.subscriber_count(), 0);
        assert_eq!(transport.scheduler().stats().episodes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_wait_releases_subscription() {
        let (inner, monitor, transport) =
            setup(vec![Err(TransportError::Connect("unreachable".into()))]);
        let transport = Arc::new(transport);

        let task = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.send(&call("http://localhost/x")).await })
        };

        until_subscribed(&monitor).await;
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        assert_eq!(monitor.subscriber_count(), 0);
        monitor.set(ConnectivityState::Online);
        tokio::task::yield_now().await;
        assert_eq!(inner.calls(), 1);
        assert_eq!(transport.scheduler().stats().cancelled, 1);
    }
}
