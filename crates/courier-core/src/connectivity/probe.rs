//! Connectivity monitor backed by HTTP probes.
//!
//! Provides:
//! - Point-in-time checks by probing known endpoints
//! - Atomic tracking of the last observed state
//! - Optional background monitoring that broadcasts transitions
//! - On-demand re-probing while a failed request waits for connectivity

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use super::{ConnectivityMonitor, ConnectivityState, ConnectivitySubscription};
use crate::config::NetworkConfig;
use crate::error::{CourierError, Result};

/// Configuration for connectivity probing.
#[derive(Debug, Clone)]
pub struct ConnectivityConfig {
    /// URLs to probe (in order of preference).
    pub probe_urls: Vec<String>,
    /// Timeout for a single probe.
    pub probe_timeout: Duration,
    /// How often to re-check while offline.
    pub offline_recheck_interval: Duration,
    /// How often to verify while online.
    pub online_verify_interval: Duration,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_urls: vec![
                "https://www.google.com/generate_204".to_string(),
                "https://cloudflare.com/cdn-cgi/trace".to_string(),
            ],
            probe_timeout: NetworkConfig::PROBE_TIMEOUT,
            offline_recheck_interval: NetworkConfig::OFFLINE_RECHECK_INTERVAL,
            online_verify_interval: NetworkConfig::ONLINE_VERIFY_INTERVAL,
        }
    }
}

const UNKNOWN: u8 = 0;
const ONLINE: u8 = 1;
const OFFLINE: u8 = 2;

/// Atomic wrapper for the last observed state (`None` before the first probe).
struct AtomicConnectivityState(AtomicU8);

impl AtomicConnectivityState {
    fn new() -> Self {
        Self(AtomicU8::new(UNKNOWN))
    }

    fn load(&self) -> Option<ConnectivityState> {
        match self.0.load(Ordering::SeqCst) {
            ONLINE => Some(ConnectivityState::Online),
            OFFLINE => Some(ConnectivityState::Offline),
            _ => None,
        }
    }

    /// Forget the last observation, so the next probe is reported as a change.
    fn clear(&self) {
        self.0.store(UNKNOWN, Ordering::SeqCst);
    }

    /// Store `state` and return the previous one.
    fn swap(&self, state: ConnectivityState) -> Option<ConnectivityState> {
        let raw = match state {
            ConnectivityState::Online => ONLINE,
            ConnectivityState::Offline => OFFLINE,
        };
        match self.0.swap(raw, Ordering::SeqCst) {
            ONLINE => Some(ConnectivityState::Online),
            OFFLINE => Some(ConnectivityState::Offline),
            _ => None,
        }
    }
}

/// Connectivity monitor that probes HTTP endpoints.
pub struct ProbeConnectivity {
    client: reqwest::Client,
    config: ConnectivityConfig,
    state: AtomicConnectivityState,
    events: broadcast::Sender<ConnectivityState>,
    last_check: RwLock<Option<Instant>>,
    last_offline: RwLock<Option<Instant>>,
    monitoring_active: AtomicBool,
}

impl ProbeConnectivity {
    /// Create a monitor with the default probe endpoints.
    pub fn new() -> Result<Self> {
        Self::with_config(ConnectivityConfig::default())
    }

    /// Create a monitor with custom configuration.
    pub fn with_config(config: ConnectivityConfig) -> Result<Self> {
        if config.probe_urls.is_empty() {
            return Err(CourierError::Config {
                message: "at least one probe URL is required".to_string(),
            });
        }

        let client = reqwest::Client::builder()
            .timeout(config.probe_timeout)
            .build()
            .map_err(|e| CourierError::ClientBuild {
                message: format!("Failed to create probe client: {}", e),
                source: Some(e),
            })?;

        let (events, _) = broadcast::channel(NetworkConfig::CONNECTIVITY_EVENT_BUFFER);
        Ok(Self {
            client,
            config,
            state: AtomicConnectivityState::new(),
            events,
            last_check: RwLock::new(None),
            last_offline: RwLock::new(None),
            monitoring_active: AtomicBool::new(false),
        })
    }

    /// Last observed state, without probing.
    pub fn last_known(&self) -> Option<ConnectivityState> {
        self.state.load()
    }

    /// Probe the configured endpoints and record the result.
    ///
    /// A change from the previous observation is broadcast to subscribers.
    pub async fn check_connectivity(&self) -> ConnectivityState {
        let mut detected = ConnectivityState::Offline;
        for url in &self.config.probe_urls {
            if self.probe_url(url).await {
                detected = ConnectivityState::Online;
                break;
            }
            debug!("Probe failed for {}", url);
        }

        *self.last_check.write().await = Some(Instant::now());
        if detected == ConnectivityState::Offline {
            *self.last_offline.write().await = Some(Instant::now());
        }

        let previous = self.state.swap(detected);
        if previous != Some(detected) {
            match detected {
                ConnectivityState::Online if previous.is_some() => {
                    info!("Network connectivity restored")
                }
                ConnectivityState::Offline => {
                    warn!("Network connectivity lost - all probe URLs failed")
                }
                ConnectivityState::Online => debug!("Network connectivity detected"),
            }
            let _ = self.events.send(detected);
        }

        detected
    }

    /// Probe a URL with a HEAD request.
    ///
    /// Success, redirects and 403 (rate limiting) all prove the network works.
    async fn probe_url(&self, url: &str) -> bool {
        match self.client.head(url).send().await {
            Ok(resp) => {
                let status = resp.status();
                status.is_success() || status.is_redirection() || status.as_u16() == 403
            }
            Err(e) => {
                debug!("Probe request failed: {}", e);
                false
            }
        }
    }

    /// Start background monitoring.
    ///
    /// Spawns a task that re-probes on an interval, short while offline and
    /// long while online.
    pub fn start_monitoring(self: &Arc<Self>) {
        if self.monitoring_active.swap(true, Ordering::SeqCst) {
            debug!("Background connectivity monitoring already active");
            return;
        }

        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            info!("Starting background connectivity monitoring");

            while monitor.monitoring_active.load(Ordering::SeqCst) {
                let interval = match monitor.last_known() {
                    Some(ConnectivityState::Online) => monitor.config.online_verify_interval,
                    _ => monitor.config.offline_recheck_interval,
                };

                tokio::time::sleep(interval).await;

                if !monitor.monitoring_active.load(Ordering::SeqCst) {
                    break;
                }

                monitor.check_connectivity().await;
            }

            info!("Background connectivity monitoring stopped");
        });
    }

    /// Stop background monitoring after the current interval.
    pub fn stop_monitoring(&self) {
        self.monitoring_active.store(false, Ordering::SeqCst);
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring_active.load(Ordering::SeqCst)
    }

    /// Connectivity status summary.
    pub async fn status(&self) -> ConnectivityStatus {
        ConnectivityStatus {
            state: self.last_known(),
            last_check: self.last_check.read().await.map(|t| t.elapsed()),
            last_offline: self.last_offline.read().await.map(|t| t.elapsed()),
            monitoring_active: self.is_monitoring(),
        }
    }
}

#[async_trait]
impl ConnectivityMonitor for ProbeConnectivity {
    async fn is_connected(&self) -> bool {
        self.check_connectivity().await == ConnectivityState::Online
    }

    fn subscribe(&self) -> ConnectivitySubscription {
        ConnectivitySubscription::new(self.events.subscribe())
    }

    /// Re-probe at the offline interval until a probe succeeds.
    ///
    /// A failed dispatch contradicts the last observation, so it is cleared
    /// first. The successful probe then always broadcasts `Online`.
    async fn recheck(&self) {
        self.state.clear();
        loop {
            tokio::time::sleep(self.config.offline_recheck_interval).await;
            if self.check_connectivity().await == ConnectivityState::Online {
                return;
            }
        }
    }
}

/// Connectivity status summary.
#[derive(Debug, Clone)]
pub struct ConnectivityStatus {
    pub state: Option<ConnectivityState>,
    pub last_check: Option<Duration>,
    pub last_offline: Option<Duration>,
    pub monitoring_active: bool,
}
