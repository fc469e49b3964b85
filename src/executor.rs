//! Upload request execution engine.
//!
//! One executor owns at most one in-flight request at a time. A sample
//! moves through prepare (route, build body, acquire client), send and
//! response parsing; any preparation failure short-circuits to a failed
//! result with no network I/O attempted. A concurrent `interrupt()` call
//! races the in-flight send through a one-shot cancel channel.
//!
//! The executor is invoked by the surrounding sampling harness through
//! the narrow [`Sampler`] contract; there is no inheritance from a
//! generic sampler base.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Url;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::body::{MultipartBody, MultipartBodyBuilder};
use crate::client_pool::{AcquiredClient, HttpClientPool};
use crate::config::SamplerConfig;
use crate::content_cache::FileContentCache;
use crate::errors::{transport_error_label, SamplerError};
use crate::result::{is_success_code, UploadResult};
use crate::router::route;
use crate::utils::headers_to_string;

/// Narrow contract between the sampling harness and this core.
#[async_trait]
pub trait Sampler: Send + Sync {
    /// Run one sample to completion and hand back the result record.
    async fn execute(&self) -> UploadResult;

    /// Abort the in-flight request, if any. Returns true when an active
    /// send was interrupted; false when there was nothing to interrupt
    /// or the request completed concurrently.
    fn interrupt(&self) -> bool;
}

/// Executes threshold-routed multipart uploads.
pub struct RequestExecutor {
    config: SamplerConfig,
    cache: Arc<FileContentCache>,
    pool: Mutex<HttpClientPool>,

    /// Published before each send, cleared on every terminal state.
    /// The only state a concurrent interrupt call sees.
    in_flight: Mutex<Option<oneshot::Sender<()>>>,
}

/// Everything resolved before the first byte goes on the wire.
struct Prepared {
    url: Url,
    body: MultipartBody,
    acquired: AcquiredClient,
    retry_count: u32,
}

/// How a send attempt ended.
enum SendOutcome {
    Completed,
    Interrupted,
    Failed(SamplerError),
}

impl RequestExecutor {
    pub fn new(
        config: SamplerConfig,
        cache: Arc<FileContentCache>,
        pool: HttpClientPool,
    ) -> Self {
        Self {
            config,
            cache,
            pool: Mutex::new(pool),
            in_flight: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// True when no request is in flight.
    pub fn is_idle(&self) -> bool {
        self.in_flight.lock().unwrap().is_none()
    }

    /// Route the sample, assemble the body and acquire a client.
    /// Fails closed: any error here means no network I/O happened.
    fn prepare(&self) -> Result<Prepared, SamplerError> {
        let threshold = self.config.threshold_config()?;
        let decision = route(&threshold);
        let endpoint = self.config.endpoint_for(decision.endpoint);
        let url = Url::parse(endpoint).map_err(|e| SamplerError::InvalidEndpoint {
            url: endpoint.to_string(),
            reason: e.to_string(),
        })?;

        debug!(
            endpoint = %url,
            choice = ?decision.endpoint,
            record_type = threshold.record_type,
            threshold = threshold.threshold,
            "routed sample"
        );

        let body = MultipartBodyBuilder::new(&self.cache).build(
            &self.config.arguments,
            &self.config.own_arguments,
            &self.config.static_files,
            &self.config.dynamic_files,
            &self.config.variable_files,
            decision.included,
            &threshold.attachment_selector,
        )?;

        let mut pool = self.pool.lock().unwrap();
        let retry_count = pool.settings().retry_count;
        let acquired = pool.acquire(&url, self.config.proxy.as_ref())?;

        Ok(Prepared {
            url,
            body,
            acquired,
            retry_count,
        })
    }

    /// Run one sample. All failures are captured into the result; this
    /// never panics or throws past the sampler boundary.
    pub async fn execute(&self) -> UploadResult {
        let started = Instant::now();

        let prepared = match self.prepare() {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, class = e.class().label(), "sample preparation failed");
                // Best-effort URL for the failed record; routing may be
                // the very thing that failed.
                let mut result = UploadResult::for_url(&self.config.endpoint_achieved);
                result.fail(&e);
                result.elapsed = started.elapsed();
                return result;
            }
        };

        let mut result = UploadResult::for_url(prepared.url.as_str());
        result.posted_body = prepared.body.loggable(self.config.log_file_contents);

        // Publish the interrupt handle before the network call begins.
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        *self.in_flight.lock().unwrap() = Some(cancel_tx);

        let outcome = self
            .send_with_retry(&prepared, &mut result, &mut cancel_rx)
            .await;

        // Clear on every terminal state so later interrupts are no-ops
        // until a new send begins.
        self.in_flight.lock().unwrap().take();

        match outcome {
            SendOutcome::Completed => {}
            SendOutcome::Interrupted => {
                debug!(url = %prepared.url, "sample interrupted");
                result.interrupted = true;
                result.fail("sample interrupted");
            }
            SendOutcome::Failed(e) => {
                error!(url = %prepared.url, error = %e, class = e.class().label(), "sample failed");
                result.fail(&e);
            }
        }

        result.elapsed = started.elapsed();
        result
    }

    /// Send the prepared request, retrying transport failures up to the
    /// pool's fixed retry count (default disabled).
    async fn send_with_retry(
        &self,
        prepared: &Prepared,
        result: &mut UploadResult,
        cancel_rx: &mut oneshot::Receiver<()>,
    ) -> SendOutcome {
        let mut attempt = 0;
        loop {
            match self.send_once(prepared, result, cancel_rx).await {
                Ok(true) => return SendOutcome::Completed,
                Ok(false) => return SendOutcome::Interrupted,
                Err(SamplerError::Transport(e)) if attempt < prepared.retry_count => {
                    attempt += 1;
                    warn!(
                        url = %prepared.url,
                        attempt,
                        max = prepared.retry_count,
                        kind = transport_error_label(&e),
                        error = %e,
                        "transport error, retrying"
                    );
                }
                Err(e) => return SendOutcome::Failed(e),
            }
        }
    }

    /// One send attempt. Ok(true) = completed, Ok(false) = interrupted.
    async fn send_once(
        &self,
        prepared: &Prepared,
        result: &mut UploadResult,
        cancel_rx: &mut oneshot::Receiver<()>,
    ) -> Result<bool, SamplerError> {
        // The body owns its buffers, so the wire form can be rebuilt for
        // each attempt.
        let form = prepared.body.to_form()?;

        let mut builder = prepared
            .acquired
            .client
            .post(prepared.url.clone())
            .multipart(form);

        // Delegated credentials for this target: the send runs under
        // that principal.
        if let Some(creds) = &prepared.acquired.authorization {
            builder = builder.basic_auth(&creds.username, Some(&creds.password));
        }

        let request = builder.build()?;
        result.request_headers = headers_to_string(request.headers());

        let send = prepared.acquired.client.execute(request);
        tokio::select! {
            response = send => {
                let response = response?;
                self.parse_response(response, result).await?;
                Ok(true)
            }
            _ = &mut *cancel_rx => Ok(false),
        }
    }

    /// Fill the result record from the response.
    async fn parse_response(
        &self,
        response: reqwest::Response,
        result: &mut UploadResult,
    ) -> Result<(), SamplerError> {
        let status = response.status();
        result.status_code = status.as_u16();
        result.status_message = status.canonical_reason().unwrap_or_default().to_string();

        // The transport may have auto-followed redirects; report the URL
        // the response actually came from.
        result.url = response.url().to_string();

        let status_line = format!(
            "{:?} {} {}\n",
            response.version(),
            status.as_u16(),
            result.status_message
        );
        result.response_headers = format!(
            "{}{}",
            status_line,
            headers_to_string(response.headers())
        );

        // Condensed header text plus one CR per header line and the
        // blank line before the body. Connection-level byte counts are
        // not exposed by the transport, so this mirrors the on-wire head
        // size as closely as the parsed headers allow.
        result.header_size = result.response_headers.len() + response.headers().len() + 3;

        if status.is_redirection() {
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            match location {
                Some(loc) => result.redirect_location = Some(loc),
                // Protocol violation; surface it instead of recording a
                // half-parsed redirect.
                None => {
                    return Err(SamplerError::MissingRedirectLocation {
                        status: status.as_u16(),
                    })
                }
            }
        }

        // Body is read after headers; chunked responses have no reliable
        // Content-Length, so size accounting uses the decoded bytes.
        let body = response.bytes().await?;
        result.body_size = body.len();
        result.body = body.to_vec();
        result.success = is_success_code(result.status_code);
        Ok(())
    }
}

#[async_trait]
impl Sampler for RequestExecutor {
    async fn execute(&self) -> UploadResult {
        RequestExecutor::execute(self).await
    }

    fn interrupt(&self) -> bool {
        RequestExecutor::interrupt(self)
    }
}

impl RequestExecutor {
    /// Abort the in-flight request, if any.
    ///
    /// Reads and clears the in-flight handle atomically, so a second
    /// interrupt (or an interrupt racing normal completion) is a no-op
    /// returning false.
    pub fn interrupt(&self) -> bool {
        let handle = self.in_flight.lock().unwrap().take();
        match handle {
            Some(cancel) => {
                if cancel.send(()).is_err() {
                    // The send finished between take and signal; nothing
                    // was interrupted.
                    warn!("could not abort pending request, it already completed");
                    false
                } else {
                    true
                }
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_pool::{ClientSettings, TlsResetSignal};

    fn executor_with(config: SamplerConfig) -> RequestExecutor {
        let dir = std::env::temp_dir();
        let cache = Arc::new(FileContentCache::new(dir));
        let pool = HttpClientPool::new(ClientSettings::default(), TlsResetSignal::new());
        RequestExecutor::new(config, cache, pool)
    }

    fn valid_config() -> SamplerConfig {
        SamplerConfig {
            endpoint_achieved: "http://upload.example.com/full".to_string(),
            endpoint_below: "http://upload.example.com/partial".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_interrupt_before_any_send_is_a_noop() {
        let executor = executor_with(valid_config());
        assert!(executor.is_idle());
        assert!(!executor.interrupt());
        assert!(!executor.interrupt());
    }

    #[tokio::test]
    async fn test_malformed_endpoint_fails_without_network_io() {
        let mut config = valid_config();
        config.endpoint_achieved = "not a url".to_string();

        let executor = executor_with(config);
        let result = executor.execute().await;

        assert!(!result.success);
        assert!(result.failure.unwrap().contains("invalid endpoint URL"));
        // Nothing was sent, so no partial network state was captured.
        assert!(result.request_headers.is_empty());
        assert_eq!(result.status_code, 0);
        assert!(executor.is_idle());
    }

    #[tokio::test]
    async fn test_malformed_threshold_fails_closed() {
        let mut config = valid_config();
        config.threshold = crate::config::NumericField::Text("lots".to_string());

        let executor = executor_with(config);
        let result = executor.execute().await;

        assert!(!result.success);
        assert!(result.failure.unwrap().contains("threshold"));
    }

    #[tokio::test]
    async fn test_missing_payload_file_fails_closed() {
        let mut config = valid_config();
        config.static_files = vec![crate::files::FileReference::new(
            "definitely-not-here.bin",
            "f1",
            "application/octet-stream",
        )];

        let executor = executor_with(config);
        let result = executor.execute().await;

        assert!(!result.success);
        assert!(result
            .failure
            .unwrap()
            .contains("definitely-not-here.bin"));
    }

    #[test]
    fn test_executor_is_usable_as_trait_object() {
        let executor = executor_with(valid_config());
        let sampler: &dyn Sampler = &executor;
        assert!(!sampler.interrupt());
    }
}
