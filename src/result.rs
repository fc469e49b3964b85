//! Per-request result record populated by the executor.

use std::time::Duration;

/// Everything the surrounding test harness needs to know about one
/// upload attempt. Failures are captured here instead of being thrown
/// past the sampler boundary.
#[derive(Debug, Clone, Default)]
pub struct UploadResult {
    /// Effective URL: the configured endpoint, updated if the transport
    /// auto-followed a redirect
    pub url: String,

    pub status_code: u16,
    pub status_message: String,

    /// Request headers, one `Name: value` per line
    pub request_headers: String,

    /// Response headers, status line first, one per line
    pub response_headers: String,

    /// Response body bytes after content decoding
    pub body: Vec<u8>,

    /// Approximate size of the response head (status line + headers)
    pub header_size: usize,

    /// Size of the decoded response body
    pub body_size: usize,

    /// Location header of a final redirect response, if any
    pub redirect_location: Option<String>,

    pub success: bool,

    /// The literal posted body as stored for logging, with file content
    /// suppression applied
    pub posted_body: String,

    /// Failure description when the sample did not complete normally
    pub failure: Option<String>,

    /// True when the sample ended because of an external interrupt
    pub interrupted: bool,

    pub elapsed: Duration,
}

/// Standard success classification: 2xx and 3xx count as success.
pub fn is_success_code(status: u16) -> bool {
    (200..400).contains(&status)
}

impl UploadResult {
    /// Start a result for the given target; success/status filled later.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Mark this result failed with the given cause. Any partial state
    /// already captured (request headers, posted body) is kept for
    /// diagnosis.
    pub fn fail(&mut self, cause: impl std::fmt::Display) {
        self.success = false;
        self.failure = Some(cause.to_string());
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status_code)
    }
}
