//! The request orchestrator.
//!
//! [`NetworkClient`] owns the transport stack, the shared settings and the
//! connectivity monitor. Every request goes through the same steps:
//!
//! 1. Pre-flight connectivity check (offline short-circuits with no dispatch)
//! 2. Dispatch with headers read from the shared table at send time
//! 3. Connectivity retry for failures without an HTTP response
//! 4. Classification into a [`ResponseOutcome`]
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_core::{decode, NetworkClient, RequestDescriptor};
//!
//! let client = NetworkClient::builder().build()?;
//! let descriptor = RequestDescriptor::get("https://api.example.com/users/1")?;
//! let outcome = client.request(descriptor, decode::json::<User>()).await;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::classify::classify;
use crate::config::{parse_base_url, resolve_url, ClientConfig};
use crate::connectivity::{ConnectivityMonitor, ProbeConnectivity};
use crate::decode::DecodeError;
use crate::error::{CourierError, Result};
use crate::outcome::ResponseOutcome;
use crate::request::RequestDescriptor;
use crate::retry::{
    with_connectivity_retry, BackoffConfig, BackoffRetry, RetryScheduler, RetryStats,
};
use crate::settings::ClientSettings;
use crate::transport::{HttpTransport, OutgoingCall, Transport, TransportError};
use crate::trust::{CertificateSource, TrustStatus};

/// Builder for [`NetworkClient`].
///
/// Anything left unset falls back to a default: a probing connectivity
/// monitor, fresh settings, and a reqwest transport built from the config.
#[derive(Default)]
pub struct NetworkClientBuilder {
    config: ClientConfig,
    settings: Option<Arc<ClientSettings>>,
    connectivity: Option<Arc<dyn ConnectivityMonitor>>,
    transport: Option<Arc<dyn Transport>>,
    certificates: Option<Box<dyn CertificateSource>>,
    backoff: Option<BackoffConfig>,
}

impl NetworkClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeouts, base URL and user agent.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing settings object (headers, messages, hook).
    pub fn settings(mut self, settings: Arc<ClientSettings>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Use this connectivity monitor instead of probing.
    pub fn connectivity(mut self, monitor: Arc<dyn ConnectivityMonitor>) -> Self {
        self.connectivity = Some(monitor);
        self
    }

    /// Replace the reqwest transport. Certificates are ignored in that case.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Install certificates from `source` as the trust store.
    pub fn certificates(mut self, source: impl CertificateSource + 'static) -> Self {
        self.certificates = Some(Box::new(source));
        self
    }

    /// Also retry transient failures with fixed delays, below the
    /// connectivity retry.
    pub fn backoff(mut self, config: BackoffConfig) -> Self {
        self.backoff = Some(config);
        self
    }

    /// Build the client.
    ///
    /// Fails only on invalid configuration or if no HTTP client can be built
    /// at all. A broken trust store is logged and skipped.
    pub fn build(self) -> Result<NetworkClient> {
        let base_url = match &self.config.base_url {
            Some(base) => Some(parse_base_url(base).map_err(|e| CourierError::Config {
                message: format!("invalid base URL {}: {}", base, e),
            })?),
            None => None,
        };

        let settings = self.settings.unwrap_or_default();
        let connectivity: Arc<dyn ConnectivityMonitor> = match self.connectivity {
            Some(monitor) => monitor,
            None => Arc::new(ProbeConnectivity::new()?),
        };

        let (base, trust_status): (Arc<dyn Transport>, TrustStatus) = match self.transport {
            Some(transport) => {
                if self.certificates.is_some() {
                    debug!("Custom transport supplied, ignoring configured certificates");
                }
                (transport, TrustStatus::NotConfigured)
            }
            None => {
                let (http, status) =
                    HttpTransport::with_trust_store(&self.config, self.certificates.as_deref())?;
                (Arc::new(http), status)
            }
        };

        let base: Arc<dyn Transport> = match self.backoff {
            Some(config) => Arc::new(BackoffRetry::new(base, config)),
            None => base,
        };

        let scheduler = Arc::new(RetryScheduler::new(
            connectivity.clone(),
            self.config.retry_wait_timeout,
        ));
        let transport: Arc<dyn Transport> =
            Arc::new(with_connectivity_retry(base, scheduler.clone()));

        info!(
            "Network client ready (connect {:?}, receive {:?}, retry wait {:?})",
            self.config.connect_timeout, self.config.receive_timeout, self.config.retry_wait_timeout
        );

        Ok(NetworkClient {
            transport,
            base_url,
            connectivity,
            scheduler,
            settings,
            config: self.config,
            trust_status,
        })
    }
}

/// Entry point for every request.
pub struct NetworkClient {
    transport: Arc<dyn Transport>,
    base_url: Option<url::Url>,
    connectivity: Arc<dyn ConnectivityMonitor>,
    scheduler: Arc<RetryScheduler>,
    settings: Arc<ClientSettings>,
    config: ClientConfig,
    trust_status: TrustStatus,
}

impl std::fmt::Debug for NetworkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkClient")
            .field("config", &self.config)
            .field("settings", &self.settings)
            .field("trust_status", &self.trust_status)
            .field("retry_stats", &self.scheduler.stats())
            .finish_non_exhaustive()
    }
}

impl NetworkClient {
    pub fn builder() -> NetworkClientBuilder {
        NetworkClientBuilder::new()
    }

    /// Client with default settings and a probing connectivity monitor.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// Send `descriptor` and classify the result.
    ///
    /// Never fails: every failure is a case of the returned outcome.
    pub async fn request<T, D>(
        &self,
        descriptor: impl Into<Arc<RequestDescriptor>>,
        decode: D,
    ) -> ResponseOutcome<T>
    where
        D: Fn(&[u8]) -> std::result::Result<T, DecodeError>,
    {
        self.execute(descriptor.into(), decode, None).await
    }

    /// Like [`request`](Self::request), abandoning the request when `cancel` fires.
    ///
    /// Cancellation drops the in-flight dispatch, the connectivity wait and
    /// its timer, and yields `NetworkError { Cancelled }`.
    pub async fn request_with_cancel<T, D>(
        &self,
        descriptor: impl Into<Arc<RequestDescriptor>>,
        decode: D,
        cancel: &CancellationToken,
    ) -> ResponseOutcome<T>
    where
        D: Fn(&[u8]) -> std::result::Result<T, DecodeError>,
    {
        self.execute(descriptor.into(), decode, Some(cancel)).await
    }

    async fn execute<T, D>(
        &self,
        descriptor: Arc<RequestDescriptor>,
        decode: D,
        cancel: Option<&CancellationToken>,
    ) -> ResponseOutcome<T>
    where
        D: Fn(&[u8]) -> std::result::Result<T, DecodeError>,
    {
        let method = descriptor.method();
        let catalog = || self.settings.messages().current();

        let url = match resolve_url(self.base_url.as_ref(), descriptor.url()) {
            Ok(url) => url,
            Err(e) => {
                warn!("{} {} cannot be resolved: {}", method, descriptor.url(), e);
                let reason = format!("cannot resolve {}: {}", descriptor.url(), e);
                return classify(&Err(TransportError::Local(reason)), decode, &catalog());
            }
        };

        if cancel.is_some_and(CancellationToken::is_cancelled) {
            debug!("{} {} cancelled before dispatch", method, url);
            return classify(&Err(TransportError::Cancelled), decode, &catalog());
        }

        if !self.connectivity.is_connected().await {
            debug!("{} {} skipped: no connectivity", method, url);
            return ResponseOutcome::NoConnectivity;
        }

        let call = OutgoingCall::new(descriptor, url, self.settings.headers().clone());
        let raw = match cancel {
            None => self.transport.send(&call).await,
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        debug!("{} {} cancelled", method, call.url);
                        Err(TransportError::Cancelled)
                    }
                    raw = self.transport.send(&call) => raw,
                }
            }
        };

        let outcome = classify(&raw, decode, &catalog());
        if let ResponseOutcome::Unauthorized { .. } = outcome {
            info!("{} {} unauthorized", method, call.url);
            self.settings.notify_unauthenticated();
        }
        debug!("{} {} -> {:?}", method, call.url, outcome.kind());
        outcome
    }

    pub fn settings(&self) -> &Arc<ClientSettings> {
        &self.settings
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn connectivity(&self) -> &Arc<dyn ConnectivityMonitor> {
        &self.connectivity
    }

    /// Outcome of trust store installation at build time.
    pub fn trust_status(&self) -> &TrustStatus {
        &self.trust_status
    }

    pub fn retry_stats(&self) -> RetryStats {
        self.scheduler.stats()
    }

    /// Merge headers into the shared table, returning the merged result.
    pub fn update_headers(&self, partial: HashMap<String, String>) -> HashMap<String, String> {
        self.settings.update_headers(partial)
    }

    pub fn remove_header(&self, name: &str) -> Option<String> {
        self.settings.remove_header(name)
    }

    pub fn reset_headers(&self) {
        self.settings.reset_headers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::{ConnectivityState, ManualConnectivity};
    use crate::decode;
    use crate::outcome::{NetworkErrorReason, OutcomeKind};
    use crate::testing::ScriptedTransport;
    use crate::transport::{RawResponse, TimeoutPhase};
    use serde::Deserialize;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Debug, Deserialize, PartialEq)]
    struct User {
        id: u32,
        name: String,
    }

    fn client(
        transport: Arc<ScriptedTransport>,
        monitor: Arc<ManualConnectivity>,
    ) -> NetworkClient {
        NetworkClient::builder()
            .config(ClientConfig::new().with_base_url("https://api.example.com"))
            .connectivity(monitor)
            .transport(transport)
            .build()
            .unwrap()
    }

    fn get(url: &str) -> RequestDescriptor {
        RequestDescriptor::get(url).unwrap()
    }

    async fn until_subscribed(monitor: &ManualConnectivity) {
        while monitor.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_decodes_success() {
        let transport =
            ScriptedTransport::new(vec![Ok(RawResponse::new(200, r#"{"id":1,"name":"Ana"}"#))]);
        let client = client(transport.clone(), Arc::new(ManualConnectivity::online()));

        let outcome = client.request(get("/users/1"), decode::json::<User>()).await;
        assert_eq!(
            outcome,
            ResponseOutcome::Success {
                status: 200,
                data: User {
                    id: 1,
                    name: "Ana".into()
                }
            }
        );
        assert_eq!(transport.seen()[0].url, "https://api.example.com/users/1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_preflight_skips_dispatch() {
        let transport = ScriptedTransport::new(vec![]);
        let client = client(transport.clone(), Arc::new(ManualConnectivity::offline()));

        let outcome = client.request(get("/users/1"), decode::discard()).await;
        assert_eq!(outcome, ResponseOutcome::NoConnectivity);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_invokes_hook_once() {
        let transport = ScriptedTransport::new(vec![Ok(RawResponse::new(401, ""))]);
        let client = client(transport.clone(), Arc::new(ManualConnectivity::online()));
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        client.settings().set_unauthenticated_hook(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let outcome = client.request(get("/me"), decode::discard()).await;
        assert_eq!(outcome, ResponseOutcome::Unauthorized { status: 401 });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_is_immediate() {
        let transport = ScriptedTransport::new(vec![Ok(RawResponse::new(
            500,
            r#"{"message":"boom"}"#,
        ))]);
        let monitor = Arc::new(ManualConnectivity::online());
        let client = client(transport.clone(), monitor.clone());

        let start = tokio::time::Instant::now();
        let outcome = client.request(get("/x"), decode::discard()).await;

        assert_eq!(
            outcome,
            ResponseOutcome::ServerError {
                status: 500,
                messages: vec!["boom".into()]
            }
        );
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(transport.calls(), 1);
        assert_eq!(client.retry_stats().episodes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_exhausts_without_replay() {
        let transport =
            ScriptedTransport::new(vec![Err(TransportError::Timeout(TimeoutPhase::Connect))]);
        let monitor = Arc::new(ManualConnectivity::online());
        let client = client(transport.clone(), monitor.clone());

        let outcome = client.request(get("/x"), decode::discard()).await;
        assert_eq!(
            outcome,
            ResponseOutcome::NetworkError {
                reason: NetworkErrorReason::Timeout
            }
        );
        assert_eq!(transport.calls(), 1);
        assert_eq!(monitor.subscriber_count(), 0);
        assert_eq!(client.retry_stats().exhausted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_reads_latest_headers() {
        let transport =
            ScriptedTransport::new(vec![Err(TransportError::Connect("unreachable".into()))]);
        let monitor = Arc::new(ManualConnectivity::online());
        let client = Arc::new(client(transport.clone(), monitor.clone()));
        client.update_headers(HashMap::from([(
            "authorization".to_string(),
            "Bearer old".to_string(),
        )]));

        let task = {
            let client = client.clone();
            tokio::spawn(async move { client.request(get("/x"), decode::discard()).await })
        };

        until_subscribed(&monitor).await;
        client.update_headers(HashMap::from([(
            "authorization".to_string(),
            "Bearer new".to_string(),
        )]));
        monitor.set(ConnectivityState::Online);

        assert_eq!(task.await.unwrap().kind(), OutcomeKind::Success);
        let seen = transport.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].headers["authorization"], "Bearer old");
        assert_eq!(seen[1].headers["authorization"], "Bearer new");
        assert_eq!(seen[1].headers["accept"], "application/json");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_wait_releases_subscription() {
        let transport =
            ScriptedTransport::new(vec![Err(TransportError::Connect("unreachable".into()))]);
        let monitor = Arc::new(ManualConnectivity::online());
        let client = Arc::new(client(transport.clone(), monitor.clone()));
        let token = CancellationToken::new();

        let task = {
            let client = client.clone();
            let token = token.clone();
            tokio::spawn(async move {
                client
                    .request_with_cancel(get("/x"), decode::discard(), &token)
                    .await
            })
        };

        until_subscribed(&monitor).await;
        token.cancel();

        assert_eq!(
            task.await.unwrap(),
            ResponseOutcome::NetworkError {
                reason: NetworkErrorReason::Cancelled
            }
        );
        assert_eq!(monitor.subscriber_count(), 0);

        monitor.set(ConnectivityState::Online);
        tokio::task::yield_now().await;
        assert_eq!(transport.calls(), 1);
        assert_eq!(client.retry_stats().cancelled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_in_flight_dispatch() {
        let transport = ScriptedTransport::hanging();
        let client = client(transport.clone(), Arc::new(ManualConnectivity::online()));
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                token.cancel();
            })
        };

        let outcome = client
            .request_with_cancel(get("/slow"), decode::discard(), &token)
            .await;
        canceller.await.unwrap();

        assert_eq!(outcome.kind(), OutcomeKind::NetworkError(NetworkErrorReason::Cancelled));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled_token_skips_dispatch() {
        let transport = ScriptedTransport::new(vec![]);
        let client = client(transport.clone(), Arc::new(ManualConnectivity::online()));
        let token = CancellationToken::new();
        token.cancel();

        let outcome = client
            .request_with_cancel(get("/x"), decode::discard(), &token)
            .await;
        assert_eq!(outcome.kind(), OutcomeKind::NetworkError(NetworkErrorReason::Cancelled));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relative_url_without_base_fails_without_dispatch() {
        let transport = ScriptedTransport::new(vec![]);
        let monitor = Arc::new(ManualConnectivity::online());
        let client = NetworkClient::builder()
            .connectivity(monitor.clone())
            .transport(transport.clone())
            .build()
            .unwrap();

        let start = tokio::time::Instant::now();
        let outcome = client.request(get("/users/1"), decode::discard()).await;

        assert_eq!(
            outcome,
            ResponseOutcome::NetworkError {
                reason: NetworkErrorReason::Transport
            }
        );
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(transport.calls(), 0);
        assert_eq!(client.retry_stats().episodes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_failure_is_final() {
        let transport = ScriptedTransport::new(vec![Err(TransportError::Local(
            "invalid header name".into(),
        ))]);
        let monitor = Arc::new(ManualConnectivity::online());
        let client = client(transport.clone(), monitor.clone());

        let start = tokio::time::Instant::now();
        let outcome = client.request(get("/x"), decode::discard()).await;

        assert_eq!(outcome.kind(), OutcomeKind::NetworkError(NetworkErrorReason::Transport));
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(transport.calls(), 1);
        assert_eq!(monitor.subscriber_count(), 0);
        assert_eq!(client.retry_stats().episodes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_base_path_is_kept() {
        let transport = ScriptedTransport::new(vec![]);
        let client = NetworkClient::builder()
            .config(ClientConfig::new().with_base_url("https://api.example.com/v2"))
            .connectivity(Arc::new(ManualConnectivity::online()))
            .transport(transport.clone())
            .build()
            .unwrap();

        client.request(get("/users/1"), decode::discard()).await;
        client.request(get("HTTPS://cdn.example.com/a.png"), decode::discard()).await;

        let seen = transport.seen();
        assert_eq!(seen[0].url, "https://api.example.com/v2/users/1");
        assert_eq!(seen[1].url, "https://cdn.example.com/a.png");
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let result = NetworkClient::builder()
            .config(ClientConfig::new().with_base_url("not a url"))
            .connectivity(Arc::new(ManualConnectivity::online()))
            .build();
        assert!(matches!(result, Err(CourierError::Config { .. })));
    }

    #[test]
    fn test_header_mutation_delegates() {
        let client = client(
            ScriptedTransport::new(vec![]),
            Arc::new(ManualConnectivity::online()),
        );
        let merged = client.update_headers(HashMap::from([("x-a".to_string(), "1".to_string())]));
        assert_eq!(merged["x-a"], "1");
        assert_eq!(client.remove_header("x-a").as_deref(), Some("1"));
        client.reset_headers();
        assert_eq!(
            client.settings().headers().snapshot().get("accept").map(String::as_str),
            Some("application/json")
        );
    }
}
