//! Transport seam between the client and the wire.
//!
//! A [`Transport`] turns an [`OutgoingCall`] into a [`RawOutcome`]: either a
//! response of any status, or a [`TransportError`] when no response object
//! exists. Classification happens later, in one place.

mod download;
mod http;

pub use http::HttpTransport;

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::request::RequestDescriptor;
use crate::settings::HeaderTable;

/// Phase in which a timeout elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    Connect,
    Send,
    Receive,
    /// Connectivity did not return within the retry wait.
    ConnectivityWait,
}

impl std::fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutPhase::Connect => write!(f, "connect"),
            TimeoutPhase::Send => write!(f, "send"),
            TimeoutPhase::Receive => write!(f, "receive"),
            TimeoutPhase::ConnectivityWait => write!(f, "connectivity wait"),
        }
    }
}

/// Failure with no response object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("no connectivity at dispatch time")]
    NoConnectivity,

    #[error("{0} timeout")]
    Timeout(TimeoutPhase),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Other(String),

    /// The request could not be built or its result could not be stored.
    /// Waiting for connectivity cannot fix it.
    #[error("invalid request: {0}")]
    Local(String),

    #[error("request cancelled")]
    Cancelled,
}

impl TransportError {
    /// Failures that happened on this side of the wire, before dispatch or
    /// after the response arrived.
    pub fn is_local(&self) -> bool {
        matches!(self, TransportError::Local(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            TransportError::Local(err.to_string())
        } else if err.is_timeout() {
            let phase = if err.is_connect() {
                TimeoutPhase::Connect
            } else if err.is_body() || err.is_decode() {
                TimeoutPhase::Receive
            } else if err.is_request() {
                TimeoutPhase::Send
            } else {
                TimeoutPhase::Receive
            };
            TransportError::Timeout(phase)
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

/// A response of any status, fully read.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawResponse {
    /// `0` means the transport produced no real status line.
    pub status: u16,
    pub headers: HashMap<String, String>,
    /// Empty for successful downloads; the body went to `saved_to`.
    pub body: Bytes,
    pub saved_to: Option<PathBuf>,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
            ..Self::default()
        }
    }
}

/// What a transport hands back for one dispatch.
pub type RawOutcome = Result<RawResponse, TransportError>;

/// One dispatch of a descriptor.
///
/// Holds the header table handle rather than a header copy, so every dispatch
/// (including a replay) reads the latest headers.
#[derive(Debug, Clone)]
pub struct OutgoingCall {
    pub descriptor: Arc<RequestDescriptor>,
    /// Descriptor URL resolved against the base URL.
    pub url: String,
    headers: HeaderTable,
}

impl OutgoingCall {
    pub fn new(
        descriptor: Arc<RequestDescriptor>,
        url: impl Into<String>,
        headers: HeaderTable,
    ) -> Self {
        Self {
            descriptor,
            url: url.into(),
            headers,
        }
    }

    /// Headers as committed right now.
    pub fn current_headers(&self) -> Arc<HashMap<String, String>> {
        self.headers.snapshot()
    }
}

/// Executes calls on the wire.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, call: &OutgoingCall) -> RawOutcome;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, call: &OutgoingCall) -> RawOutcome {
        (**self).send(call).await
    }
}
