//! Streaming a response body to disk for `DOWNLOAD` requests.
//!
//! The body is written to `<save_path>.part` and renamed into place only once
//! the stream completes, so an interrupted download never leaves a truncated
//! file at the destination.

use bytes::Bytes;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{RawOutcome, RawResponse, TransportError};
use crate::config::NetworkConfig;
use crate::request::ProgressCallback;

/// Average throughput since the first recorded chunk.
#[derive(Debug)]
struct SpeedTracker {
    start_time: Instant,
    total_bytes: u64,
}

impl SpeedTracker {
    fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_bytes: 0,
        }
    }

    fn record(&mut self, bytes: u64) {
        self.total_bytes += bytes;
    }

    fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    fn speed(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.total_bytes as f64 / elapsed
        } else {
            0.0
        }
    }
}

fn temp_path_for(destination: &Path) -> PathBuf {
    PathBuf::from(format!(
        "{}{}",
        destination.display(),
        NetworkConfig::DOWNLOAD_TEMP_SUFFIX
    ))
}

/// Disk failures are local: the response arrived, so waiting for
/// connectivity and replaying would not help.
fn io_failure(action: &str, path: &Path, err: std::io::Error) -> TransportError {
    TransportError::Local(format!("{} {}: {}", action, path.display(), err))
}

/// Stream `response` into `destination`, reporting progress per chunk.
pub(crate) async fn stream_to_file(
    response: reqwest::Response,
    destination: &Path,
    progress: Option<&ProgressCallback>,
) -> RawOutcome {
    let status = response.status().as_u16();
    let headers = super::http::collect_headers(response.headers());
    let total_bytes = response.content_length();

    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_failure("Failed to create directory", parent, e))?;
        }
    }

    let temp_path = temp_path_for(destination);
    let result = write_stream(response, &temp_path, total_bytes, progress).await;

    match result {
        Ok(tracker) => {
            if let Err(e) = tokio::fs::rename(&temp_path, destination).await {
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(io_failure("Failed to move download to", destination, e));
            }
            info!(
                "Downloaded {} bytes to {} in {:?} ({:.0} B/s)",
                tracker.total_bytes,
                destination.display(),
                tracker.elapsed(),
                tracker.speed()
            );
            Ok(RawResponse {
                status,
                headers,
                body: Bytes::new(),
                saved_to: Some(destination.to_path_buf()),
            })
        }
        Err(e) => {
            debug!("Download to {} failed, removing temp file", destination.display());
            let _ = tokio::fs::remove_file(&temp_path).await;
            Err(e)
        }
    }
}

async fn write_stream(
    response: reqwest::Response,
    temp_path: &Path,
    total_bytes: Option<u64>,
    progress: Option<&ProgressCallback>,
) -> Result<SpeedTracker, TransportError> {
    let mut file = tokio::fs::File::create(temp_path)
        .await
        .map_err(|e| io_failure("Failed to create", temp_path, e))?;

    let mut tracker = SpeedTracker::new();
    let mut stream = response.bytes_stream();

    if let Some(callback) = progress {
        callback(0, total_bytes);
    }

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(TransportError::from)?;
        file.write_all(&chunk)
            .await
            .map_err(|e| io_failure("Failed to write", temp_path, e))?;
        tracker.record(chunk.len() as u64);
        if let Some(callback) = progress {
            callback(tracker.total_bytes, total_bytes);
        }
    }

    file.flush()
        .await
        .map_err(|e| io_failure("Failed to flush", temp_path, e))?;

    Ok(tracker)
}
