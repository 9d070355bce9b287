//! Error types for the ocrbatch library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`BatchError`] — **Fatal**: the batch cannot proceed at all (missing
//!   credentials, unreadable input directory, output cannot be written).
//!   Returned as `Err(BatchError)` from the top-level entry points.
//!
//! * [`InvokeError`] — **Per attempt**: one call to the remote endpoint
//!   failed (network blip, rate limit, non-success response). The invoker
//!   catches it and decides whether to retry.
//!
//! * [`RequestError`] — **Per request**: every attempt for one request
//!   failed. Stored inside [`crate::output::RequestResult`] so callers can
//!   inspect partial success rather than losing the whole batch to one bad
//!   request.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the ocrbatch library.
///
/// Request-level failures use [`RequestError`] and are stored in
/// [`crate::output::RequestResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum BatchError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input path was not found.
    #[error("Input not found: '{path}'\nCheck the path exists and is readable.")]
    InputNotFound { path: PathBuf },

    /// Process does not have read permission on the path.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PNG or JPEG image.
    #[error("File is not a supported image: '{path}'\nFirst bytes: {magic:?}")]
    NotAnImage { path: PathBuf, magic: [u8; 4] },

    /// The input directory holds nothing to process.
    #[error("No documents found in '{path}'\nPut one directory of page_N.png images per document there.")]
    NoDocuments { path: PathBuf },

    // ── Service errors ────────────────────────────────────────────────────
    /// A required credential is missing from the environment.
    #[error("Missing credential {var}.\n{hint}")]
    MissingCredentials { var: String, hint: String },

    /// Every request failed after all attempts; output would be empty.
    #[error("All {total} requests failed after {attempts} attempts each.\nFirst error: {first_error}")]
    AllRequestsFailed {
        total: usize,
        attempts: u32,
        first_error: String,
    },

    /// Some requests succeeded but at least one failed.
    ///
    /// Returned by [`crate::output::BatchOutput::into_result`] when the
    /// caller wants to treat any request failure as an error.
    #[error("{failed}/{total} requests failed")]
    PartialFailure {
        succeeded: usize,
        failed: usize,
        total: usize,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not read an input file.
    #[error("Failed to read '{path}': {source}")]
    InputReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// The failure of a single attempt against a remote endpoint.
///
/// Every variant is retried by [`crate::invoker::BatchInvoker`] until the
/// request's attempt budget is spent. Input errors (e.g. a URL-mode OCR
/// request without a prefix) are not told apart from transient ones.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvokeError {
    /// Connection refused, DNS failure, reset mid-body.
    #[error("network error: {0}")]
    Network(String),

    /// The call did not complete within the client timeout.
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// HTTP 429. `retry_after_secs` is the server-provided hint, if any.
    #[error("rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// HTTP 401/403.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Any other non-success status or service-level error code.
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// The body could not be parsed.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The request itself could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl InvokeError {
    /// Map a transport-level `reqwest` failure.
    pub fn from_transport(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            InvokeError::Timeout { secs: timeout_secs }
        } else {
            InvokeError::Network(err.to_string())
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, retry_after_secs: Option<u64>, body: String) -> Self {
        match status {
            429 => InvokeError::RateLimited { retry_after_secs },
            401 | 403 => InvokeError::Auth(body),
            _ => InvokeError::Api {
                status,
                message: body,
            },
        }
    }
}

/// `Retry-After` in whole seconds, when present and numeric.
pub(crate) fn retry_after_secs(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// A terminal, non-fatal error for a single request.
///
/// Stored in [`crate::output::RequestResult`] when a request fails.
/// The batch continues with the remaining requests.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RequestError {
    /// Every attempt failed; `detail` is the last attempt's error.
    #[error("Request '{id}': failed after {attempts} attempts: {detail}")]
    Exhausted {
        id: String,
        attempts: u32,
        detail: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_failure_display() {
        let e = BatchError::PartialFailure {
            succeeded: 9,
            failed: 1,
            total: 10,
        };
        let msg = e.to_string();
        assert!(msg.contains("1/10"), "got: {msg}");
    }

    #[test]
    fn status_classification() {
        assert_eq!(
            InvokeError::from_status(429, Some(3), String::new()),
            InvokeError::RateLimited {
                retry_after_secs: Some(3)
            }
        );
        assert!(matches!(
            InvokeError::from_status(403, None, "bad key".into()),
            InvokeError::Auth(ref m) if m == "bad key"
        ));
        assert!(matches!(
            InvokeError::from_status(503, None, "busy".into()),
            InvokeError::Api { status: 503, .. }
        ));
    }

    #[test]
    fn exhausted_display() {
        let e = RequestError::Exhausted {
            id: "page_3".into(),
            attempts: 4,
            detail: "request timed out after 30s".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("page_3"));
        assert!(msg.contains("4 attempts"));
        assert!(msg.contains("30s"));
    }

    #[test]
    fn missing_credentials_display() {
        let e = BatchError::MissingCredentials {
            var: "ARK_API_KEY".into(),
            hint: "Set it in .env".into(),
        };
        assert!(e.to_string().contains("ARK_API_KEY"));
    }
}
