//! Courier CLI - send one request through the courier request layer.
//!
//! Prints the classified outcome as JSON on stdout and exits non-zero for
//! anything other than success.

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use courier_core::{
    BackoffConfig, BodyEncoding, BodyPayload, CancellationToken, ClientConfig, ConnectivityConfig,
    ConnectivityMonitor, FileCertificates, FormField, ManualConnectivity, Method, NetworkClient,
    ProbeConnectivity, RequestDescriptor, ResponseOutcome,
};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(about = "Send an HTTP request with connectivity-aware retry")]
struct Args {
    /// HTTP method: GET, POST, PUT, PATCH, DELETE or DOWNLOAD
    method: String,

    /// Absolute URL, or a path joined with --base-url
    url: String,

    /// Base URL for relative request URLs
    #[arg(long)]
    base_url: Option<String>,

    /// Header as name:value (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Query parameter as key=value (repeatable)
    #[arg(short = 'q', long = "query")]
    query: Vec<String>,

    /// JSON request body
    #[arg(long, conflicts_with = "form")]
    json: Option<String>,

    /// Multipart field as key=value, or key=@path to attach a file (repeatable)
    #[arg(long)]
    form: Vec<String>,

    /// Destination file for DOWNLOAD
    #[arg(long)]
    save: Option<PathBuf>,

    /// PEM bundle or DER certificate to trust
    #[arg(long)]
    ca_cert: Option<PathBuf>,

    /// Connect and receive timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// How long to wait for connectivity after a network failure, in seconds
    #[arg(long)]
    retry_wait: Option<u64>,

    /// URL to probe for connectivity (repeatable). Defaults to well-known
    /// public endpoints.
    #[arg(long = "probe", conflicts_with = "assume_online")]
    probes: Vec<String>,

    /// Skip connectivity probing and treat the network as up. Failed
    /// requests then wait out --retry-wait without a replay.
    #[arg(long)]
    assume_online: bool,

    /// Also retry transient failures (408, 429, 5xx, transport) with fixed delays
    #[arg(long)]
    backoff: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn split_pair<'a>(raw: &'a str, separator: char, what: &str) -> Result<(&'a str, &'a str)> {
    raw.split_once(separator)
        .map(|(k, v)| (k.trim(), v.trim()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| anyhow!("invalid {} '{}', expected key{}value", what, raw, separator))
}

fn form_fields(raw: &[String]) -> Result<Vec<FormField>> {
    raw.iter()
        .map(|entry| {
            let (name, value) = split_pair(entry, '=', "form field")?;
            match value.strip_prefix('@') {
                Some(path) => {
                    let path = PathBuf::from(path);
                    let bytes = std::fs::read(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    let file_name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "file".to_string());
                    Ok(FormField::file(name, file_name, bytes))
                }
                None => Ok(FormField::text(name, value)),
            }
        })
        .collect()
}

fn build_descriptor(args: &Args) -> Result<RequestDescriptor> {
    let method: Method = args.method.parse()?;
    let mut builder = RequestDescriptor::builder(method, args.url.as_str());

    for entry in &args.query {
        let (key, value) = split_pair(entry, '=', "query parameter")?;
        builder = builder.query(key, value);
    }

    if let Some(json) = &args.json {
        let value: Value = serde_json::from_str(json).context("--json is not valid JSON")?;
        builder = builder.json(value);
    } else if !args.form.is_empty() {
        builder = builder
            .body(BodyPayload::Form(form_fields(&args.form)?))
            .encoding(BodyEncoding::Multipart);
    }

    if let Some(path) = &args.save {
        builder = builder.save_path(path.clone());
    }

    if args.debug {
        builder = builder
            .on_send_progress(|sent, total| debug!("sent {} of {:?} bytes", sent, total))
            .on_receive_progress(|received, total| {
                debug!("received {} of {:?} bytes", received, total)
            });
    }

    Ok(builder.build()?)
}

fn build_client(args: &Args) -> Result<NetworkClient> {
    let mut config = ClientConfig::new();
    if let Some(base) = &args.base_url {
        config = config.with_base_url(base.as_str());
    }
    if let Some(secs) = args.timeout {
        config = config
            .with_connect_timeout(Duration::from_secs(secs))
            .with_receive_timeout(Duration::from_secs(secs))
            .with_retry_wait_timeout(Duration::from_secs(secs));
    }
    if let Some(secs) = args.retry_wait {
        config = config.with_retry_wait_timeout(Duration::from_secs(secs));
    }

    let connectivity: Arc<dyn ConnectivityMonitor> = if args.assume_online {
        Arc::new(ManualConnectivity::online())
    } else if args.probes.is_empty() {
        Arc::new(ProbeConnectivity::new()?)
    } else {
        Arc::new(ProbeConnectivity::with_config(ConnectivityConfig {
            probe_urls: args.probes.clone(),
            ..ConnectivityConfig::default()
        })?)
    };

    let mut builder = NetworkClient::builder().config(config).connectivity(connectivity);
    if let Some(path) = &args.ca_cert {
        if !path.exists() {
            bail!("certificate file {} does not exist", path.display());
        }
        builder = builder.certificates(FileCertificates::new(path.clone()));
    }
    if args.backoff {
        builder = builder.backoff(BackoffConfig::default());
    }

    let client = builder.build()?;

    let mut headers = HashMap::new();
    for entry in &args.headers {
        let (name, value) = split_pair(entry, ':', "header")?;
        headers.insert(name.to_lowercase(), value.to_string());
    }
    if !headers.is_empty() {
        client.update_headers(headers);
    }

    Ok(client)
}

/// JSON if the body parses, text otherwise, `null` when empty.
fn decode_any(body: &[u8]) -> std::result::Result<Value, courier_core::DecodeError> {
    if body.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned())))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::WARN };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let descriptor = build_descriptor(&args)?;
    let client = build_client(&args)?;
    debug!("Trust store: {:?}", client.trust_status());

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, cancelling request");
                cancel.cancel();
            }
        });
    }

    let outcome: ResponseOutcome<Value> = client
        .request_with_cancel(descriptor, decode_any, &cancel)
        .await;

    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if outcome.is_success() {
        return Ok(ExitCode::SUCCESS);
    }
    if let Some(message) = outcome.user_message(&client.settings().messages().current()) {
        eprintln!("{}", message);
    }
    Ok(ExitCode::FAILURE)
}
