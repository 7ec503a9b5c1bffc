//! External capability clients -- Mail, Calendar, Docs.
//!
//! Each client is a thin capability interface over a vendor API, async and
//! cancellable, parameterized by an opaque third-party token. Core code
//! never sees transport codes: every failure is mapped into the uniform
//! [`ProviderError`] taxonomy and retry decisions are made from that.

pub mod calendar;
pub mod docs;
pub mod mail;

use std::time::Duration;

use thiserror::Error;

/// Uniform failure taxonomy for all capability clients.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No third-party credential was supplied.
    #[error("authentication required: no credential supplied")]
    AuthMissing,
    /// The supplied credential was rejected as stale.
    #[error("authentication expired: please sign in again")]
    AuthExpired,
    /// The requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The credential lacks permission for this operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The provider asked us to back off.
    #[error("rate limited by provider")]
    RateLimited {
        /// Suggested backoff, when the provider supplied one.
        retry_after: Option<Duration>,
    },
    /// A failure that is safe to retry (the request did not take effect).
    #[error("transient provider failure: {0}")]
    Transient(String),
    /// A failure that must not be retried. Ambiguous transport outcomes
    /// land here so a retry can never double-apply a non-idempotent call.
    #[error("permanent provider failure: {0}")]
    Permanent(String),
    /// The request was cancelled before completing.
    #[error("provider call cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Whether a bounded retry is permitted for this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited { .. })
    }

    /// Whether this is a credential problem that should surface as a
    /// "please sign in" message and never be retried.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthMissing | Self::AuthExpired)
    }
}

/// Map an HTTP error status into the provider taxonomy.
///
/// `had_token` distinguishes AuthMissing from AuthExpired on 401.
pub(crate) fn map_error_status(
    status: reqwest::StatusCode,
    body: &str,
    had_token: bool,
    retry_after: Option<Duration>,
) -> ProviderError {
    match status.as_u16() {
        401 => {
            if had_token {
                ProviderError::AuthExpired
            } else {
                ProviderError::AuthMissing
            }
        }
        403 => ProviderError::PermissionDenied(summarize(body)),
        404 => ProviderError::NotFound(summarize(body)),
        429 => ProviderError::RateLimited { retry_after },
        500..=599 => ProviderError::Transient(format!("HTTP {status}: {}", summarize(body))),
        _ => ProviderError::Permanent(format!("HTTP {status}: {}", summarize(body))),
    }
}

/// Parse a `Retry-After` header value in seconds.
pub(crate) fn parse_retry_after(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Minimal percent-encoding for query parameters.
pub(crate) fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(char::from(byte));
            }
            b' ' => out.push('+'),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

/// First line of an error body, bounded, for error messages.
fn summarize(body: &str) -> String {
    let line = body.lines().next().unwrap_or_default();
    let mut end = line.len().min(160);
    while end > 0 && !line.is_char_boundary(end) {
        end = end.saturating_sub(1);
    }
    line.get(..end).unwrap_or_default().to_owned()
}
