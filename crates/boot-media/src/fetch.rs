//! Streaming artifact downloads with bounded retries.
//!
//! Each attempt streams the response body straight to a temporary file and
//! has its own timeout; transient transport errors retry with Fibonacci
//! backoff while HTTP 4xx responses are permanent. Cancellation aborts the
//! attempt and the retry sleep.

use crate::backoff::FibonacciBackoff;
use crate::error::MediaError;
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Retry budget for one artifact download.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per download before the field is marked Failed
    pub attempts: u32,
    /// First backoff step in seconds
    pub min_backoff_secs: u64,
    /// Backoff cap in seconds
    pub max_backoff_secs: u64,
    /// Per-attempt wall-clock ceiling
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            min_backoff_secs: 1,
            max_backoff_secs: 30,
            attempt_timeout: Duration::from_secs(60),
        }
    }
}

enum AttemptError {
    /// Worth another attempt (connect failure, 5xx, mid-stream error, timeout)
    Retryable(String),
    /// Not worth retrying (4xx, filesystem error, cancellation)
    Permanent(MediaError),
}

/// Downloads artifacts over HTTP(S).
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn new(policy: RetryPolicy) -> Result<Self, MediaError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, policy })
    }

    /// Downloads `url` into `dest`, reporting cumulative progress as
    /// `(bytes_so_far, content_length)`.
    ///
    /// Retries transient failures up to the policy's attempt budget. The
    /// destination file may hold partial bytes on failure; callers place it
    /// at a final path only on success.
    pub async fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
        mut on_progress: impl FnMut(u64, Option<u64>) + Send,
    ) -> Result<u64, MediaError> {
        let mut backoff = FibonacciBackoff::new(self.policy.min_backoff_secs, self.policy.max_backoff_secs);
        let mut last_error = String::new();
        for attempt in 1..=self.policy.attempts {
            if cancel.is_cancelled() {
                return Err(MediaError::Cancelled);
            }
            match self.try_fetch(url, dest, cancel, &mut on_progress).await {
                Ok(written) => return Ok(written),
                Err(AttemptError::Permanent(e)) => return Err(e),
                Err(AttemptError::Retryable(message)) => {
                    warn!("attempt {}/{} for {} failed: {}", attempt, self.policy.attempts, url, message);
                    last_error = message;
                    if attempt < self.policy.attempts {
                        let delay = backoff.next_backoff();
                        debug!("retrying {} in {:?}", url, delay);
                        tokio::select! {
                            () = cancel.cancelled() => return Err(MediaError::Cancelled),
                            () = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }
        Err(MediaError::Transport {
            url: url.to_string(),
            attempts: self.policy.attempts,
            message: last_error,
        })
    }

    async fn try_fetch(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
        on_progress: &mut (impl FnMut(u64, Option<u64>) + Send),
    ) -> Result<u64, AttemptError> {
        let attempt = async {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| AttemptError::Retryable(e.to_string()))?;
            let status = response.status();
            if status.is_client_error() {
                return Err(AttemptError::Permanent(MediaError::HttpStatus {
                    url: url.to_string(),
                    status: status.as_u16(),
                }));
            }
            if !status.is_success() {
                return Err(AttemptError::Retryable(format!("HTTP {status}")));
            }
            let total = response.content_length();

            let mut file = tokio::fs::File::create(dest)
                .await
                .map_err(|e| AttemptError::Permanent(MediaError::Io(e)))?;
            let mut stream = response.bytes_stream();
            let mut written = 0u64;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| AttemptError::Retryable(e.to_string()))?;
                file.write_all(&chunk)
                    .await
                    .map_err(|e| AttemptError::Permanent(MediaError::Io(e)))?;
                written += chunk.len() as u64;
                on_progress(written, total);
            }
            file.flush()
                .await
                .map_err(|e| AttemptError::Permanent(MediaError::Io(e)))?;
            Ok(written)
        };

        tokio::select! {
            () = cancel.cancelled() => Err(AttemptError::Permanent(MediaError::Cancelled)),
            outcome = tokio::time::timeout(self.policy.attempt_timeout, attempt) => match outcome {
                Ok(result) => result,
                Err(_) => Err(AttemptError::Retryable("attempt timed out".to_string())),
            },
        }
    }
}
