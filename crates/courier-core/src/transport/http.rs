//! reqwest-backed transport.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::header::{self, HeaderMap};
use reqwest::{Client, ClientBuilder, RequestBuilder};
use std::collections::HashMap;
use tracing::{debug, warn};

use super::{download, OutgoingCall, RawOutcome, RawResponse, Transport, TransportError};
use crate::config::{ClientConfig, NetworkConfig};
use crate::error::{CourierError, Result};
use crate::request::{BodyEncoding, BodyPayload, FormValue, Method, ProgressCallback};
use crate::trust::{install_trust_store, CertificateSource, TrustStatus};

/// Transport that executes calls with a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

fn base_builder(config: &ClientConfig) -> ClientBuilder {
    Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.connect_timeout + config.receive_timeout)
        .user_agent(&config.user_agent)
}

impl HttpTransport {
    /// Build a transport with the platform trust roots.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = base_builder(config)
            .build()
            .map_err(|e| CourierError::ClientBuild {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(e),
            })?;
        Ok(Self { client })
    }

    /// Build a transport with certificates from `source` installed.
    ///
    /// If the pinned client cannot be built, falls back to an unpinned one.
    pub fn with_trust_store(
        config: &ClientConfig,
        source: Option<&dyn CertificateSource>,
    ) -> Result<(Self, TrustStatus)> {
        let (builder, status) = install_trust_store(base_builder(config), source);
        match builder.build() {
            Ok(client) => Ok((Self { client }, status)),
            Err(e) if matches!(status, TrustStatus::Installed { .. }) => {
                warn!("Pinned client failed to build, continuing without pinning: {}", e);
                let transport = Self::new(config)?;
                Ok((
                    transport,
                    TrustStatus::Skipped {
                        reason: e.to_string(),
                    },
                ))
            }
            Err(e) => Err(CourierError::ClientBuild {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(e),
            }),
        }
    }

    /// Wrap an already configured reqwest client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Build the request. Also returns the multipart payload size, which is
    /// reported as send progress once the request is on the wire.
    fn prepare(
        &self,
        call: &OutgoingCall,
    ) -> std::result::Result<(RequestBuilder, Option<u64>), TransportError> {
        let descriptor = &call.descriptor;
        let method = match descriptor.method() {
            Method::Get | Method::Download => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut request = self.client.request(method, &call.url);
        if !descriptor.query().is_empty() {
            request = request.query(descriptor.query());
        }

        let multipart =
            descriptor.body().is_some() && descriptor.encoding() == BodyEncoding::Multipart;
        let headers = call.current_headers();
        let mut has_content_type = false;
        for (name, value) in headers.iter() {
            if name.eq_ignore_ascii_case(header::CONTENT_TYPE.as_str()) {
                // multipart sets its own boundary
                if multipart {
                    continue;
                }
                has_content_type = true;
            }
            request = request.header(name.as_str(), value.as_str());
        }

        let Some(body) = descriptor.body() else {
            return Ok((request, None));
        };

        match descriptor.encoding() {
            BodyEncoding::Json => {
                let bytes = body
                    .to_json_bytes()
                    .map_err(|e| TransportError::Local(format!("failed to encode body: {e}")))?;
                if !has_content_type {
                    request = request.header(header::CONTENT_TYPE, "application/json");
                }
                let request = match descriptor.on_send_progress() {
                    Some(callback) if !bytes.is_empty() => request
                        .header(header::CONTENT_LENGTH, bytes.len())
                        .body(reqwest::Body::wrap_stream(progress_stream(
                            bytes,
                            callback.clone(),
                        ))),
                    _ => request.body(bytes),
                };
                Ok((request, None))
            }
            BodyEncoding::Multipart => {
                let (form, total) = multipart_form(body)?;
                if let Some(callback) = descriptor.on_send_progress() {
                    callback(0, Some(total));
                }
                Ok((request.multipart(form), Some(total)))
            }
        }
    }
}

/// Chunk `bytes` into a stream that reports each chunk as it is pulled.
fn progress_stream(
    bytes: Bytes,
    callback: ProgressCallback,
) -> impl futures::Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send + 'static {
    let total = bytes.len() as u64;
    let chunks: Vec<Bytes> = (0..bytes.len())
        .step_by(NetworkConfig::UPLOAD_CHUNK_SIZE)
        .map(|start| {
            let end = (start + NetworkConfig::UPLOAD_CHUNK_SIZE).min(bytes.len());
            bytes.slice(start..end)
        })
        .collect();

    let mut sent = 0u64;
    futures::stream::iter(chunks.into_iter().map(move |chunk| {
        sent += chunk.len() as u64;
        callback(sent, Some(total));
        Ok::<Bytes, std::io::Error>(chunk)
    }))
}

fn multipart_form(
    body: &BodyPayload,
) -> std::result::Result<(reqwest::multipart::Form, u64), TransportError> {
    let mut form = reqwest::multipart::Form::new();
    let mut total = 0u64;
    for field in body.to_form_fields() {
        match field.value {
            FormValue::Text(text) => {
                total += text.len() as u64;
                form = form.text(field.name, text);
            }
            FormValue::File {
                file_name,
                bytes,
                mime,
            } => {
                total += bytes.len() as u64;
                let mut part = reqwest::multipart::Part::bytes(bytes.to_vec()).file_name(file_name);
                if let Some(mime) = mime {
                    part = part
                        .mime_str(&mime)
                        .map_err(|e| TransportError::Local(format!("invalid mime {mime}: {e}")))?;
                }
                form = form.part(field.name, part);
            }
        }
    }
    Ok((form, total))
}

pub(super) fn collect_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

async fn read_body(
    response: reqwest::Response,
    progress: Option<&ProgressCallback>,
) -> RawOutcome {
    let status = response.status().as_u16();
    let headers = collect_headers(response.headers());

    let body = match progress {
        None => response.bytes().await.map_err(TransportError::from)?,
        Some(callback) => {
            let total = response.content_length();
            let mut buffer = BytesMut::new();
            let mut received = 0u64;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(TransportError::from)?;
                received += chunk.len() as u64;
                buffer.extend_from_slice(&chunk);
                callback(received, total);
            }
            buffer.freeze()
        }
    };

    Ok(RawResponse {
        status,
        headers,
        body,
        saved_to: None,
    })
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, call: &OutgoingCall) -> RawOutcome {
        let descriptor = &call.descriptor;
        let (request, multipart_total) = self.prepare(call)?;

        debug!("{} {}", descriptor.method(), call.url);
        let response = request.send().await.map_err(|e| {
            debug!("{} {} failed: {}", descriptor.method(), call.url, e);
            TransportError::from(e)
        })?;
        debug!("{} {} -> {}", descriptor.method(), call.url, response.status());

        if let (Some(total), Some(callback)) = (multipart_total, descriptor.on_send_progress()) {
            callback(total, Some(total));
        }

        match (descriptor.method(), descriptor.save_path()) {
            (Method::Download, Some(path)) if response.status().is_success() => {
                download::stream_to_file(response, path, descriptor.on_receive_progress()).await
            }
            _ => read_body(response, descriptor.on_receive_progress()).await,
        }
    }
}
