//! Resumable HTTP transport with retry and progress tracking.
//!
//! One call to [`fetch`] downloads one remote resource to one local path.
//! Interrupted transfers resume from the current on-disk size via a
//! `Range` request; a `416 Range Not Satisfiable` response means the file
//! is already complete. Recoverable failures (connection, timeout,
//! truncated stream, 5xx) are retried with exponential backoff; other
//! HTTP statuses are terminal.

use futures::StreamExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Maximum transfer attempts before surfacing a terminal error.
pub const MAX_ATTEMPTS: u32 = 3;

/// Base delay before the first retry; doubles per attempt (1s, 2s, 4s).
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Connection timeout: time to establish the TCP connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Read timeout: maximum wait for data between chunks.
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Transfer failures. All are terminal to the caller once retries
/// exhaust; the partial file is left on disk for the caller to keep or
/// clean up.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timed out waiting for data")]
    Timeout,

    #[error("HTTP {0}")]
    HttpStatus(u16),

    #[error("Stream truncated: {0}")]
    TruncatedStream(String),

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// Whether another attempt may succeed. 4xx statuses (other than the
    /// 416 handled inline) never will; 5xx and network faults might.
    fn is_retryable(&self) -> bool {
        match self {
            TransferError::ConnectionFailed(_)
            | TransferError::Timeout
            | TransferError::TruncatedStream(_) => true,
            TransferError::HttpStatus(code) => *code >= 500,
            TransferError::Cancelled | TransferError::Io(_) => false,
        }
    }
}

/// Cooperative cancellation flag, checked at chunk boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Progress callback: `(percent, bytes_downloaded, total_bytes)`.
///
/// Invoked after each chunk. `total_bytes` is 0 for unknown-length
/// transfers, in which case `percent` is 0 as well.
pub type ProgressFn = Box<dyn Fn(f64, u64, u64) + Send + Sync>;

/// HTTP client shared across all transfers in a session.
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> Result<Self, TransferError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("dlcforge/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .build()
            .map_err(|e| TransferError::ConnectionFailed(e.to_string()))?;

        Ok(Self { client })
    }
}

/// Delay before retry number `attempt` (1-based): 1s, 2s, 4s, ...
fn retry_delay(attempt: u32) -> Duration {
    RETRY_BASE_DELAY * (1u32 << (attempt - 1).min(4))
}

fn classify_request_error(e: reqwest::Error) -> TransferError {
    if e.is_timeout() {
        TransferError::Timeout
    } else {
        TransferError::ConnectionFailed(e.to_string())
    }
}

/// Download `url` to `destination`.
///
/// With `allow_resume`, an existing file at `destination` is extended
/// from its current size. Retries always resume from the on-disk size
/// regardless of the initial flag, so no downloaded bytes are lost.
/// Returns the final on-disk size in bytes. The destination is never
/// deleted on failure.
pub async fn fetch(
    client: &HttpClient,
    url: &str,
    destination: &Path,
    allow_resume: bool,
    cancel: &CancelFlag,
    progress: Option<&ProgressFn>,
) -> Result<u64, TransferError> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut attempt = 1u32;
    loop {
        let resume = allow_resume || attempt > 1;
        match fetch_once(client, url, destination, resume, cancel, progress).await {
            Ok(size) => return Ok(size),
            Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                let delay = retry_delay(attempt);
                warn!(
                    "Transfer attempt {}/{} failed for {}, retrying in {:?}: {}",
                    attempt, MAX_ATTEMPTS, url, delay, e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// One transfer attempt. Resumes from the on-disk size when `resume` is
/// set and a partial file exists.
async fn fetch_once(
    client: &HttpClient,
    url: &str,
    destination: &Path,
    resume: bool,
    cancel: &CancelFlag,
    progress: Option<&ProgressFn>,
) -> Result<u64, TransferError> {
    if cancel.is_cancelled() {
        return Err(TransferError::Cancelled);
    }

    let mut offset = if resume {
        match tokio::fs::metadata(destination).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        }
    } else {
        0
    };

    let mut request = client.client.get(url);
    if offset > 0 {
        request = request.header(reqwest::header::RANGE, format!("bytes={}-", offset));
    }

    let response = request.send().await.map_err(classify_request_error)?;
    let status = response.status();

    if offset > 0 && status == reqwest::StatusCode::RANGE_NOT_SATISFIABLE {
        // The file is already complete.
        debug!("Origin reports range not satisfiable at {}, done", offset);
        if let Some(cb) = progress {
            cb(100.0, offset, offset);
        }
        return Ok(offset);
    }

    if !status.is_success() {
        return Err(TransferError::HttpStatus(status.as_u16()));
    }

    let append = offset > 0 && status == reqwest::StatusCode::PARTIAL_CONTENT;
    if offset > 0 && !append {
        // Origin ignored the range request; start over.
        warn!("Origin ignored resume request for {}, restarting", url);
        offset = 0;
    }

    let total_bytes = response
        .content_length()
        .map(|len| len + offset)
        .unwrap_or(0);

    let mut file = if append {
        OpenOptions::new().append(true).open(destination).await?
    } else {
        File::create(destination).await?
    };

    let mut downloaded = offset;
    let mut stream = response.bytes_stream();

    while let Some(chunk_result) = stream.next().await {
        if cancel.is_cancelled() {
            file.flush().await?;
            return Err(TransferError::Cancelled);
        }

        let chunk = chunk_result.map_err(|e| {
            if e.is_timeout() {
                TransferError::Timeout
            } else {
                TransferError::TruncatedStream(e.to_string())
            }
        })?;

        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;

        if let Some(cb) = progress {
            let percent = if total_bytes > 0 {
                (downloaded as f64 / total_bytes as f64) * 100.0
            } else {
                0.0
            };
            cb(percent, downloaded, total_bytes);
        }
    }

    file.flush().await?;

    if total_bytes > 0 && downloaded < total_bytes {
        return Err(TransferError::TruncatedStream(format!(
            "got {} of {} bytes",
            downloaded, total_bytes
        )));
    }

    Ok(downloaded)
}
