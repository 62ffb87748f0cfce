//! Host-driven connectivity monitor.
//!
//! Embedding applications forward the platform's reachability callbacks into
//! [`ManualConnectivity::set`]. Tests drive it the same way.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

use super::{ConnectivityMonitor, ConnectivityState, ConnectivitySubscription};
use crate::config::NetworkConfig;

/// Connectivity monitor whose state is pushed in from outside.
#[derive(Debug)]
pub struct ManualConnectivity {
    online: AtomicBool,
    events: broadcast::Sender<ConnectivityState>,
}

impl ManualConnectivity {
    pub fn new(initial: ConnectivityState) -> Self {
        let (events, _) = broadcast::channel(NetworkConfig::CONNECTIVITY_EVENT_BUFFER);
        Self {
            online: AtomicBool::new(initial == ConnectivityState::Online),
            events,
        }
    }

    pub fn online() -> Self {
        Self::new(ConnectivityState::Online)
    }

    pub fn offline() -> Self {
        Self::new(ConnectivityState::Offline)
    }

    /// Record a platform event. Every call is broadcast, even a repeat.
    pub fn set(&self, state: ConnectivityState) {
        self.online
            .store(state == ConnectivityState::Online, Ordering::SeqCst);
        // No subscribers is fine: nobody is waiting.
        let delivered = self.events.send(state).unwrap_or(0);
        debug!("Connectivity set to {} ({} subscribers)", state, delivered);
    }

    pub fn state(&self) -> ConnectivityState {
        if self.online.load(Ordering::SeqCst) {
            ConnectivityState::Online
        } else {
            ConnectivityState::Offline
        }
    }

    /// Live subscriptions. Zero once every waiter has finished or been cancelled.
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}

impl Default for ManualConnectivity {
    fn default() -> Self {
        Self::online()
    }
}

#[async_trait]
impl ConnectivityMonitor for ManualConnectivity {
    async fn is_connected(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> ConnectivitySubscription {
        ConnectivitySubscription::new(self.events.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_updates_probe() {
        let monitor = ManualConnectivity::offline();
        assert!(!monitor.is_connected().await);
        monitor.set(ConnectivityState::Online);
        assert!(monitor.is_connected().await);
        assert_eq!(monitor.state(), ConnectivityState::Online);
    }

    #[tokio::test]
    async fn test_subscribers_see_every_event() {
        let monitor = ManualConnectivity::online();
        let mut sub = monitor.subscribe();
        assert_eq!(monitor.subscriber_count(), 1);

        monitor.set(ConnectivityState::Online);
        monitor.set(ConnectivityState::Online);
        assert_eq!(sub.next().await, Some(ConnectivityState::Online));
        assert_eq!(sub.next().await, Some(ConnectivityState::Online));

        drop(sub);
        assert_eq!(monitor.subscriber_count(), 0);
    }

    #[test]
    fn test_set_without_subscribers() {
        let monitor = ManualConnectivity::default();
        monitor.set(ConnectivityState::Offline);
        assert_eq!(monitor.state(), ConnectivityState::Offline);
    }
}
