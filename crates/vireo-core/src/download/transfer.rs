//! Chunked HTTP transfer with resume, retry, and cooperative pause/cancel.
//!
//! Bytes stream to a temp file next to the target; the final file appears
//! only through an atomic same-directory rename, so observers see either
//! the full artifact or nothing.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::{Client, StatusCode};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::task::{temp_path_for, DownloadSpec};
use crate::cancel::CancellationToken;
use crate::config::{CivitaiConfig, DownloadConfig, HubConfig};
use crate::error::{Result, VireoError};
use crate::network::{self, host_of, RetryConfig};

/// Minimum interval between progress emissions (4 per second).
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// How a transfer ended, short of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferOutcome {
    /// Target file is in place; payload is the final size in bytes.
    Completed(u64),
    /// Pause requested; temp file preserved for resume.
    Paused,
    /// Cancellation requested; temp file removed.
    Cancelled,
}

/// Authorization header derivation from the download host.
#[derive(Debug, Clone, Default)]
pub struct AuthRules {
    hub_host: Option<String>,
    hub_token: Option<String>,
    civitai_host: Option<String>,
    civitai_key: Option<String>,
}

impl AuthRules {
    pub fn from_config(hub: &HubConfig, civitai: &CivitaiConfig) -> Self {
        Self {
            hub_host: host_of(&hub.base_url),
            hub_token: hub.token.clone(),
            civitai_host: host_of(&civitai.base_url),
            civitai_key: civitai.api_key.clone(),
        }
    }

    /// Authorization header value for a URL, if its host matches a
    /// configured catalog with credentials.
    pub fn authorization_for(&self, url: &str) -> Option<String> {
        let host = host_of(url)?;
        if let (Some(hub_host), Some(token)) = (&self.hub_host, &self.hub_token) {
            if host_matches(&host, hub_host) {
                return Some(format!("Bearer {}", token));
            }
        }
        if let (Some(civitai_host), Some(key)) = (&self.civitai_host, &self.civitai_key) {
            if host_matches(&host, civitai_host) {
                return Some(format!("Bearer {}", key));
            }
        }
        None
    }
}

fn host_matches(host: &str, configured: &str) -> bool {
    host == configured || host.ends_with(&format!(".{}", configured))
}

enum AttemptEnd {
    Done,
    Paused,
    Cancelled,
}

/// Run one download task to completion, retrying transient failures with
/// exponential backoff.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn run_task(
    client: &Client,
    spec: &DownloadSpec,
    cfg: &DownloadConfig,
    auth: &AuthRules,
    cancel_flag: &AtomicBool,
    pause_flag: &AtomicBool,
    global_cancel: &CancellationToken,
    mut on_progress: impl FnMut(u64, Option<u64>, f64),
) -> Result<TransferOutcome> {
    // A finished artifact of the right size needs no transfer.
    if let Some(expected) = spec.expected_size {
        if let Ok(meta) = tokio::fs::metadata(&spec.target_path).await {
            if meta.len() == expected {
                info!(
                    "{} already present with matching size, skipping transfer",
                    spec.target_path.display()
                );
                return Ok(TransferOutcome::Completed(expected));
            }
        }
    }

    if let Some(parent) = spec.target_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| VireoError::io_with_path(e, parent))?;
    }

    let temp_path = temp_path_for(&spec.target_path);
    let retry = RetryConfig::new()
        .with_base_delay(Duration::from_secs(1))
        .with_max_attempts(cfg.retries + 1);

    let mut last_error: Option<VireoError> = None;

    for attempt in 0..retry.max_attempts {
        if cancel_flag.load(Ordering::SeqCst) || global_cancel.is_cancelled() {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Ok(TransferOutcome::Cancelled);
        }
        if pause_flag.load(Ordering::SeqCst) {
            return Ok(TransferOutcome::Paused);
        }

        // Resume from the temp file only when the remote honors ranges.
        let mut resume_from = tokio::fs::metadata(&temp_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if resume_from > 0 && !supports_ranges(client, &spec.source_url, auth).await {
            warn!(
                "{} does not support ranged requests, restarting from zero",
                spec.source_url
            );
            resume_from = 0;
        }

        if attempt > 0 {
            debug!(
                "Attempt {}/{} for {} (resuming from byte {})",
                attempt + 1,
                retry.max_attempts,
                spec.source_url,
                resume_from
            );
        }

        let attempt_result = tokio::time::timeout(
            Duration::from_secs(cfg.per_task_timeout_s),
            attempt_once(
                client,
                spec,
                &temp_path,
                resume_from,
                cfg.chunk_bytes,
                auth,
                cancel_flag,
                pause_flag,
                global_cancel,
                &mut on_progress,
            ),
        )
        .await
        .unwrap_or_else(|_| {
            Err(VireoError::Timeout(Duration::from_secs(
                cfg.per_task_timeout_s,
            )))
        });

        match attempt_result {
            Ok(AttemptEnd::Done) => {
                let final_size = tokio::fs::metadata(&temp_path)
                    .await
                    .map(|m| m.len())
                    .unwrap_or(0);

                if let Some(expected) = spec.expected_size {
                    if final_size != expected {
                        let _ = tokio::fs::remove_file(&temp_path).await;
                        return Err(VireoError::IntegrityFailure {
                            expected,
                            actual: final_size,
                        });
                    }
                }

                tokio::fs::rename(&temp_path, &spec.target_path)
                    .await
                    .map_err(|e| VireoError::io_with_path(e, &spec.target_path))?;

                info!(
                    "Downloaded {} bytes to {}",
                    final_size,
                    spec.target_path.display()
                );
                return Ok(TransferOutcome::Completed(final_size));
            }
            Ok(AttemptEnd::Paused) => return Ok(TransferOutcome::Paused),
            Ok(AttemptEnd::Cancelled) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Ok(TransferOutcome::Cancelled);
            }
            Err(e) if e.is_retryable() && attempt + 1 < retry.max_attempts => {
                let delay = retry.calculate_delay(attempt);
                warn!(
                    "Transfer attempt {}/{} for {} failed: {}. Retrying in {:?}",
                    attempt + 1,
                    retry.max_attempts,
                    spec.source_url,
                    e,
                    delay
                );
                last_error = Some(e);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| VireoError::DownloadFailed {
        url: spec.source_url.clone(),
        message: "all retry attempts exhausted".to_string(),
    }))
}

/// Probe whether the remote honors ranged requests.
async fn supports_ranges(client: &Client, url: &str, auth: &AuthRules) -> bool {
    let mut request = client.head(url);
    if let Some(value) = auth.authorization_for(url) {
        request = request.header("Authorization", value);
    }
    match request.send().await {
        Ok(response) => response
            .headers()
            .get("accept-ranges")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("bytes"))
            .unwrap_or(false),
        Err(e) => {
            debug!("HEAD probe failed for {}: {}", url, e);
            false
        }
    }
}

/// One streaming attempt into the temp file.
#[allow(clippy::too_many_arguments)]
async fn attempt_once(
    client: &Client,
    spec: &DownloadSpec,
    temp_path: &Path,
    resume_from: u64,
    chunk_bytes: usize,
    auth: &AuthRules,
    cancel_flag: &AtomicBool,
    pause_flag: &AtomicBool,
    global_cancel: &CancellationToken,
    on_progress: &mut impl FnMut(u64, Option<u64>, f64),
) -> Result<AttemptEnd> {
    let mut request = client.get(&spec.source_url);
    if let Some(value) = auth.authorization_for(&spec.source_url) {
        request = request.header("Authorization", value);
    }
    if resume_from > 0 {
        request = request.header("Range", format!("bytes={}-", resume_from));
        info!("Resuming {} from byte {}", spec.source_url, resume_from);
    }

    let response = request.send().await.map_err(|e| VireoError::Network {
        message: format!("Download request failed: {}", e),
        cause: Some(e.to_string()),
    })?;

    let status = response.status();
    classify_status(status, &spec.source_url)?;

    // A 200 despite a Range header means the server restarted the body.
    let resuming = resume_from > 0 && status == StatusCode::PARTIAL_CONTENT;

    let total_bytes = if resuming {
        content_range_total(&response)
            .or(spec.expected_size)
            .or_else(|| response.content_length().map(|len| resume_from + len))
    } else {
        response.content_length().or(spec.expected_size)
    };

    let file = if resuming {
        tokio::fs::OpenOptions::new()
            .append(true)
            .open(temp_path)
            .await
            .map_err(|e| VireoError::io_with_path(e, temp_path))?
    } else {
        tokio::fs::File::create(temp_path)
            .await
            .map_err(|e| VireoError::io_with_path(e, temp_path))?
    };
    let mut file = tokio::io::BufWriter::with_capacity(chunk_bytes.max(8192), file);

    let mut transferred: u64 = if resuming { resume_from } else { 0 };
    let session_start = transferred;
    let started = Instant::now();
    let mut last_emit: Option<Instant> = None;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        if cancel_flag.load(Ordering::SeqCst) || global_cancel.is_cancelled() {
            let _ = file.flush().await;
            return Ok(AttemptEnd::Cancelled);
        }
        if pause_flag.load(Ordering::SeqCst) {
            file.flush()
                .await
                .map_err(|e| VireoError::io_with_path(e, temp_path))?;
            return Ok(AttemptEnd::Paused);
        }

        let chunk = chunk.map_err(|e| VireoError::Network {
            message: format!("Download stream error: {}", e),
            cause: Some(e.to_string()),
        })?;

        file.write_all(&chunk)
            .await
            .map_err(|e| VireoError::io_with_path(e, temp_path))?;
        transferred += chunk.len() as u64;

        if last_emit.map_or(true, |t| t.elapsed() >= PROGRESS_INTERVAL) {
            let rate = session_rate(transferred - session_start, started);
            on_progress(transferred, total_bytes, rate);
            last_emit = Some(Instant::now());
        }
    }

    file.flush()
        .await
        .map_err(|e| VireoError::io_with_path(e, temp_path))?;
    drop(file);

    let rate = session_rate(transferred - session_start, started);
    on_progress(transferred, total_bytes, rate);

    // An undersized body is a connection that died mid-stream.
    if let Some(total) = total_bytes {
        if transferred < total {
            return Err(VireoError::Network {
                message: format!("Incomplete body: got {} of {} bytes", transferred, total),
                cause: None,
            });
        }
    }

    Ok(AttemptEnd::Done)
}

/// Map an HTTP status to the error taxonomy; success and 206 pass through.
fn classify_status(status: StatusCode, url: &str) -> Result<()> {
    if status.is_success() || status == StatusCode::PARTIAL_CONTENT {
        return Ok(());
    }
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return Err(VireoError::AuthRequired {
            service: host_of(url).unwrap_or_else(|| url.to_string()),
        });
    }
    if network::is_retryable_status(status) {
        return Err(VireoError::Network {
            message: format!("HTTP {}", status),
            cause: None,
        });
    }
    Err(VireoError::DownloadFailed {
        url: url.to_string(),
        message: format!("HTTP {}", status),
    })
}

/// Total size from a `Content-Range: bytes start-end/total` header.
fn content_range_total(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get("content-range")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.rsplit('/').next())
        .and_then(|total| total.parse().ok())
}

fn session_rate(bytes: u64, started: Instant) -> f64 {
    let elapsed = started.elapsed().as_secs_f64();
    if elapsed > 0.0 {
        bytes as f64 / elapsed
    } else {
        0.0
    }
}
