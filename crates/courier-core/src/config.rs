//! Centralized configuration for courier.
//!
//! Constants live on [`NetworkConfig`]; per-client settings live on
//! [`ClientConfig`], which starts from those constants.

use std::time::Duration;
use url::Url;

/// Network-related defaults.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(30);
    pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
    pub const OFFLINE_RECHECK_INTERVAL: Duration = Duration::from_secs(5);
    pub const ONLINE_VERIFY_INTERVAL: Duration = Duration::from_secs(60);
    pub const UPLOAD_CHUNK_SIZE: usize = 16 * 1024;
    pub const DOWNLOAD_TEMP_SUFFIX: &'static str = ".part";
    pub const CONNECTIVITY_EVENT_BUFFER: usize = 16;
    pub const USER_AGENT: &'static str = concat!("courier/", env!("CARGO_PKG_VERSION"));
}

/// Per-client transport configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL joined with relative request URLs.
    pub base_url: Option<String>,
    /// Ceiling for establishing a connection.
    pub connect_timeout: Duration,
    /// Ceiling for receiving the response once connected.
    pub receive_timeout: Duration,
    /// How long a failed request waits for connectivity before giving up.
    pub retry_wait_timeout: Duration,
    /// User agent string.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            connect_timeout: NetworkConfig::CONNECT_TIMEOUT,
            receive_timeout: NetworkConfig::RECEIVE_TIMEOUT,
            // Same ceiling as the receive timeout unless overridden.
            retry_wait_timeout: NetworkConfig::RECEIVE_TIMEOUT,
            user_agent: NetworkConfig::USER_AGENT.to_string(),
        }
    }
}

impl ClientConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base URL for relative request URLs.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the receive timeout.
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Set the bounded wait for connectivity after a retryable failure.
    pub fn with_retry_wait_timeout(mut self, timeout: Duration) -> Self {
        self.retry_wait_timeout = timeout;
        self
    }

    /// Set the user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Parse a base URL, making sure its path ends in `/` so relative request
/// URLs extend it instead of replacing its last segment.
pub(crate) fn parse_base_url(raw: &str) -> Result<Url, url::ParseError> {
    let mut base = Url::parse(raw)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base)
}

/// Resolve a request URL against `base`.
///
/// Absolute URLs pass through. Relative ones are joined under the base path,
/// with or without a leading `/`. A relative URL without a base is an error.
pub(crate) fn resolve_url(base: Option<&Url>, url: &str) -> Result<Url, url::ParseError> {
    match Url::parse(url) {
        Err(url::ParseError::RelativeUrlWithoutBase) => match base {
            Some(base) => base.join(url.trim_start_matches('/')),
            None => Err(url::ParseError::RelativeUrlWithoutBase),
        },
        parsed => parsed,
    }
}
