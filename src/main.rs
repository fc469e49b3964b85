//! Command-line runner: execute one upload sample from a YAML config.
//!
//! Mainly useful for trying out a sampler configuration outside the test
//! harness. Pass the config path as the first argument.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use multipart_sampler::client_pool::{ClientSettings, HttpClientPool, TlsResetSignal};
use multipart_sampler::config::SamplerConfig;
use multipart_sampler::content_cache::FileContentCache;
use multipart_sampler::executor::RequestExecutor;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config_path = std::env::args().nth(1).ok_or_else(|| {
        "usage: multipart_sampler <config.yaml> [base-dir]".to_string()
    })?;
    let base_dir = std::env::args().nth(2).unwrap_or_else(|| ".".to_string());

    let config = SamplerConfig::from_yaml_file(&config_path)?;
    config.validate()?;

    let settings = ClientSettings::default()
        .with_timeouts(config.parsed_connect_timeout()?, config.parsed_response_timeout()?);
    let pool = HttpClientPool::new(settings, TlsResetSignal::new());
    let cache = Arc::new(FileContentCache::new(base_dir));

    let executor = RequestExecutor::new(config, cache, pool);
    let result = executor.execute().await;

    info!(
        url = %result.url,
        status = result.status_code,
        success = result.success,
        header_size = result.header_size,
        body_size = result.body_size,
        elapsed_ms = result.elapsed.as_millis() as u64,
        "sample finished"
    );
    if let Some(failure) = &result.failure {
        eprintln!("sample failed: {}", failure);
        std::process::exit(1);
    }

    println!("{}", result.posted_body);
    Ok(())
}
