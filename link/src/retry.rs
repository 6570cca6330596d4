//! Classification-driven retry of single protocol requests.
//!
//! Every request the client issues goes through [`RetryPolicy::send`]. A
//! response is classified per attempt in this order:
//!
//! 1. transport failure: retryable
//! 2. HTTP 200: success
//! 3. HTTP 404 when the call site ignores it: empty success
//! 4. structured `{"error": {...}}` body: retryable if its code is a known
//!    transient condition, otherwise terminal
//! 5. 500/502/503 without a structured error, when the call site retries
//!    server errors: retryable
//! 6. anything else: terminal [`QuarryLinkError::HttpStatus`]

use crate::error::{QuarryLinkError, Result};
use crate::models::ErrorEnvelope;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};
use log::{debug, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Server error codes reporting a transient condition worth retrying
/// (warehouse still provisioning, node briefly unavailable).
pub const RETRYABLE_ERROR_CODES: &[i64] = &[3901, 3902, 3903, 4013];

/// Whether a structured server error code is transient.
pub fn is_retryable_code(code: i64) -> bool {
    RETRYABLE_ERROR_CODES.contains(&code)
}

const JITTER_MIN: f64 = 0.7;
const JITTER_MAX: f64 = 1.0;

/// Backoff configuration.
///
/// # Example
///
/// ```rust
/// use quarry_link::RetryConfig;
///
/// let config = RetryConfig::default()
///     .with_max_attempts(3)
///     .with_initial_interval_ms(200);
/// assert_eq!(config.max_attempts, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts including the first one
    /// Default: 5
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Sleep before the second attempt
    /// Default: 1000ms
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    /// Growth factor between consecutive sleeps
    /// Default: 4.0
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Upper bound of a single sleep
    /// Default: 30000ms
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_interval_ms() -> u64 {
    1000
}

fn default_multiplier() -> f64 {
    4.0
}

fn default_max_interval_ms() -> u64 {
    30000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_interval_ms: default_initial_interval_ms(),
            multiplier: default_multiplier(),
            max_interval_ms: default_max_interval_ms(),
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_initial_interval_ms(mut self, ms: u64) -> Self {
        self.initial_interval_ms = ms;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_interval_ms(mut self, ms: u64) -> Self {
        self.max_interval_ms = ms;
        self
    }

    /// Un-jittered sleep before `attempt` (1-based). The first attempt is immediate.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = self.multiplier.powi(attempt as i32 - 2);
        let ms = (self.initial_interval_ms as f64 * exp).min(self.max_interval_ms as f64);
        Duration::from_secs_f64(ms.max(0.0) / 1000.0)
    }

    /// Sleep before `attempt`, scaled by a jitter factor clamped to `[0.7, 1.0]`.
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        self.base_delay(attempt)
            .mul_f64(jitter.clamp(JITTER_MIN, JITTER_MAX))
    }
}

/// Per-call-site classification switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryOptions {
    /// Treat 404 as an empty success (capability-probing endpoints only)
    pub ignore_not_found: bool,

    /// Treat 500/502/503 without a structured error as retryable
    pub retry_server_errors: bool,
}

impl RetryOptions {
    /// Submission and page advance.
    pub const QUERY: RetryOptions = RetryOptions {
        ignore_not_found: false,
        retry_server_errors: true,
    };

    /// Discovery and capability probes.
    pub const PROBE: RetryOptions = RetryOptions {
        ignore_not_found: true,
        retry_server_errors: true,
    };
}

enum Verdict {
    Done(HttpResponse),
    Retry { reason: String, status: Option<u16> },
    Fail(QuarryLinkError),
}

/// Sends requests with classification-driven retries and exponential backoff.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Send `request`, retrying per `options` until success, a terminal
    /// error, exhaustion, or cancellation of `cancel`.
    ///
    /// A cancellation observed while sleeping or waiting for a response aborts
    /// the whole loop with [`QuarryLinkError::Cancelled`].
    pub async fn send(
        &self,
        transport: &dyn HttpTransport,
        request: &HttpRequest,
        options: RetryOptions,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        let start = Instant::now();
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_reason = String::new();
        let mut last_status = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self
                    .config
                    .delay_with_jitter(attempt, rand::rng().random_range(JITTER_MIN..=JITTER_MAX));
                debug!(
                    "[LINK_RETRY] Sleeping {}ms before attempt {}/{} to {}",
                    delay.as_millis(),
                    attempt,
                    max_attempts,
                    request.url
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(QuarryLinkError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(QuarryLinkError::Cancelled),
                outcome = transport.execute(request.clone()) => outcome,
            };

            match classify(request, outcome, options) {
                Verdict::Done(response) => {
                    if attempt > 1 {
                        debug!(
                            "[LINK_RETRY] {} succeeded on attempt {}/{}",
                            request.url, attempt, max_attempts
                        );
                    }
                    return Ok(response);
                },
                Verdict::Fail(err) => return Err(err),
                Verdict::Retry { reason, status } => {
                    warn!(
                        "[LINK_RETRY] Retriable failure (attempt {}/{}) for {}: {}",
                        attempt, max_attempts, request.url, reason
                    );
                    last_reason = reason;
                    last_status = status;
                },
            }
        }

        Err(QuarryLinkError::RetriesExhausted {
            url: request.url.to_string(),
            attempts: max_attempts,
            elapsed_ms: start.elapsed().as_millis(),
            last_status,
            reason: last_reason,
        })
    }
}

fn classify(request: &HttpRequest, outcome: Result<HttpResponse>, options: RetryOptions) -> Verdict {
    let response = match outcome {
        Ok(response) => response,
        Err(QuarryLinkError::NetworkError(msg)) => {
            return Verdict::Retry {
                reason: format!("connection failure: {}", msg),
                status: None,
            }
        },
        Err(other) => return Verdict::Fail(other),
    };

    if response.status == 200 {
        return Verdict::Done(response);
    }
    if response.status == 404 && options.ignore_not_found {
        return Verdict::Done(HttpResponse {
            status: 404,
            headers: response.headers,
            body: String::new(),
        });
    }

    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&response.body) {
        let code = envelope.error.code;
        if is_retryable_code(code) {
            return Verdict::Retry {
                reason: format!(
                    "HTTP {} with transient error [{}] {}",
                    response.status, code, envelope.error.message
                ),
                status: Some(response.status),
            };
        }
        return Verdict::Fail(QuarryLinkError::QueryFailed {
            query_id: None,
            status_code: Some(response.status),
            code,
            message: envelope.error.message,
        });
    }

    if options.retry_server_errors && matches!(response.status, 500 | 502 | 503) {
        return Verdict::Retry {
            reason: format!("HTTP {}: {}", response.status, response.body),
            status: Some(response.status),
        };
    }

    Verdict::Fail(QuarryLinkError::HttpStatus {
        url: request.url.to_string(),
        status_code: response.status,
        body: response.body,
    })
}
