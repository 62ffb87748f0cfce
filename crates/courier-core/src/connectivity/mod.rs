//! Connectivity sensing.
//!
//! A [`ConnectivityMonitor`] answers "are we connected right now" and lets
//! callers subscribe to transitions. It never retries anything itself.

mod manual;
mod probe;

pub use manual::ManualConnectivity;
pub use probe::{ConnectivityConfig, ConnectivityStatus, ProbeConnectivity};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Network connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectivityState {
    /// Network is not available.
    Offline,
    /// Network is available.
    Online,
}

impl std::fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectivityState::Offline => write!(f, "offline"),
            ConnectivityState::Online => write!(f, "online"),
        }
    }
}

/// Receiving end of a monitor's transition stream.
///
/// Events arrive in emission order. Dropping the subscription unsubscribes.
#[derive(Debug)]
pub struct ConnectivitySubscription {
    rx: broadcast::Receiver<ConnectivityState>,
}

impl ConnectivitySubscription {
    pub(crate) fn new(rx: broadcast::Receiver<ConnectivityState>) -> Self {
        Self { rx }
    }

    /// Next transition, or `None` once the monitor is gone.
    ///
    /// If this subscriber fell behind, the oldest missed events are skipped
    /// and delivery resumes with the oldest retained one.
    pub async fn next(&mut self) -> Option<ConnectivityState> {
        loop {
            match self.rx.recv().await {
                Ok(state) => return Some(state),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Connectivity subscriber lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Point-in-time probe plus a subscribable stream of transitions.
#[async_trait]
pub trait ConnectivityMonitor: Send + Sync {
    /// Whether the device is connected right now. May run a short probe.
    async fn is_connected(&self) -> bool;

    /// Subscribe to transitions emitted after this call.
    fn subscribe(&self) -> ConnectivitySubscription;

    /// Actively re-check until connectivity is confirmed.
    ///
    /// Driven by a caller waiting for `Online` after a failed dispatch, for
    /// as long as it waits. Monitors that can probe broadcast the
    /// transitions they observe and resolve once online. Monitors fed from
    /// outside never resolve and rely on their pushed events.
    async fn recheck(&self) {
        std::future::pending::<()>().await
    }
}

#[async_trait]
impl<M: ConnectivityMonitor + ?Sized> ConnectivityMonitor for Arc<M> {
    async fn is_connected(&self) -> bool {
        (**self).is_connected().await
    }

    fn subscribe(&self) -> ConnectivitySubscription {
        (**self).subscribe()
    }

    async fn recheck(&self) {
        (**self).recheck().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscription_delivers_in_order() {
        let (tx, rx) = broadcast::channel(8);
        let mut sub = ConnectivitySubscription::new(rx);

        tx.send(ConnectivityState::Offline).unwrap();
        tx.send(ConnectivityState::Online).unwrap();
        drop(tx);

        assert_eq!(sub.next().await, Some(ConnectivityState::Offline));
        assert_eq!(sub.next().await, Some(ConnectivityState::Online));
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn test_subscription_survives_lag() {
        let (tx, rx) = broadcast::channel(2);
        let mut sub = ConnectivitySubscription::new(rx);

        tx.send(ConnectivityState::Offline).unwrap();
        tx.send(ConnectivityState::Offline).unwrap();
        tx.send(ConnectivityState::Online).unwrap();

        assert_eq!(sub.next().await, Some(ConnectivityState::Offline));
        assert_eq!(sub.next().await, Some(ConnectivityState::Online));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectivityState::Online.to_string(), "online");
        assert_eq!(ConnectivityState::Offline.to_string(), "offline");
    }
}
