//! Courier Core - resilient HTTP request layer.
//!
//! Every request goes through one entry point, [`NetworkClient::request`],
//! and ends in exactly one case of [`ResponseOutcome`]. Failures without an
//! HTTP response wait for connectivity to return and are replayed once;
//! everything else is classified immediately.
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_core::{decode, ClientConfig, NetworkClient, RequestDescriptor, ResponseOutcome};
//!
//! #[tokio::main]
//! async fn main() -> courier_core::Result<()> {
//!     let config = ClientConfig::new().with_base_url("https://api.example.com");
//!     let client = NetworkClient::new(config)?;
//!
//!     let descriptor = RequestDescriptor::get("/users/1")?;
//!     match client.request(descriptor, decode::json::<serde_json::Value>()).await {
//!         ResponseOutcome::Success { data, .. } => println!("{}", data),
//!         other => println!("{:?}", other.user_message(&client.settings().messages().current())),
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod classify;
pub mod config;
pub mod connectivity;
pub mod decode;
pub mod error;
pub mod outcome;
pub mod request;
pub mod retry;
pub mod settings;
pub mod transport;
pub mod trust;

mod client;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use classify::{classify, classify_kind};
pub use client::{NetworkClient, NetworkClientBuilder};
pub use config::{ClientConfig, NetworkConfig};
pub use connectivity::{
    ConnectivityConfig, ConnectivityMonitor, ConnectivityState, ConnectivityStatus,
    ConnectivitySubscription, ManualConnectivity, ProbeConnectivity,
};
pub use decode::DecodeError;
pub use error::{CourierError, Result};
pub use outcome::{NetworkErrorReason, OutcomeKind, ResponseOutcome};
pub use request::{
    BodyEncoding, BodyPayload, FormField, FormValue, Method, ProgressCallback, RequestDescriptor,
    RequestDescriptorBuilder,
};
pub use retry::{
    with_connectivity_retry, BackoffConfig, BackoffRetry, ConnectivityRetry, RetryScheduler,
    RetryStats, RetryStatus,
};
pub use settings::{ClientSettings, HeaderTable, MessageCatalog, Messages, UnauthenticatedHook};
pub use transport::{
    HttpTransport, OutgoingCall, RawOutcome, RawResponse, TimeoutPhase, Transport, TransportError,
};
pub use trust::{CertificateSource, FileCertificates, InlineCertificates, TrustStatus};
