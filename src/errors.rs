//! Error taxonomy for the sampler core.
//!
//! Failures are classified so that reporting layers can distinguish
//! mis-configuration (caught before any network I/O) from transport
//! failures that happened on the wire. All errors end up captured in the
//! per-request [`crate::result::UploadResult`] rather than propagating
//! past the sampler boundary.

use thiserror::Error;

use crate::body::BodyError;
use crate::client_pool::PoolError;
use crate::content_cache::CacheError;

/// Errors that can occur while preparing or executing an upload sample.
#[derive(Error, Debug)]
pub enum SamplerError {
    /// Endpoint URL could not be parsed. Caught before any network I/O.
    #[error("invalid endpoint URL '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    /// Malformed numeric or structural configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A file referenced by the payload could not be read.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The multipart body could not be assembled for the wire.
    #[error(transparent)]
    Body(#[from] BodyError),

    /// An HTTP client could not be constructed for the target.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The HTTP transport failed after the request was sent.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A redirect response arrived without a Location header.
    #[error("missing Location header in redirect response (HTTP {status})")]
    MissingRedirectLocation { status: u16 },
}

/// Coarse error classes used as labels in logs and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Bad configuration, detected before network I/O
    Configuration,
    /// Payload selection problems (handled by skipping, never fatal)
    Selection,
    /// Connection, protocol or timeout failures on the wire
    Transport,
    /// Body could not be serialized for the wire
    Serialization,
}

impl SamplerError {
    /// Classify this error for reporting.
    pub fn class(&self) -> ErrorClass {
        match self {
            SamplerError::InvalidEndpoint { .. }
            | SamplerError::Config(_)
            | SamplerError::Pool(_) => ErrorClass::Configuration,
            SamplerError::Cache(_) | SamplerError::Body(_) => ErrorClass::Serialization,
            SamplerError::Transport(_) | SamplerError::MissingRedirectLocation { .. } => {
                ErrorClass::Transport
            }
        }
    }

    /// True when the failure happened before any bytes hit the network,
    /// so no partial connection state exists.
    pub fn is_pre_network(&self) -> bool {
        !matches!(
            self,
            SamplerError::Transport(_) | SamplerError::MissingRedirectLocation { .. }
        )
    }
}

impl ErrorClass {
    /// Stable label for log fields.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorClass::Configuration => "configuration",
            ErrorClass::Selection => "selection",
            ErrorClass::Transport => "transport",
            ErrorClass::Serialization => "serialization",
        }
    }
}

/// Refine a transport error into a more specific label for diagnostics.
///
/// reqwest collapses quite different failures into one error type; this
/// inspects the flags it does expose.
pub fn transport_error_label(error: &reqwest::Error) -> &'static str {
    if error.is_timeout() {
        "timeout"
    } else if error.is_connect() {
        "connect"
    } else if error.is_body() || error.is_decode() {
        "body"
    } else if error.is_redirect() {
        "redirect"
    } else {
        "other"
    }
}
