//! Threshold-routed multipart upload sampler.
//!
//! A load-testing sampler core that POSTs multipart file uploads whose
//! target endpoint and payload composition change with a running record
//! counter compared against a configured threshold. The crate provides
//! the execution engine only: routing, body assembly, a per-worker HTTP
//! client cache and interruptible request execution. Configuration
//! panels and the surrounding test harness live elsewhere and talk to
//! this core through [`config::SamplerConfig`] and the
//! [`executor::Sampler`] trait.

pub mod body;
pub mod client_pool;
pub mod config;
pub mod content_cache;
pub mod errors;
pub mod executor;
pub mod files;
pub mod result;
pub mod router;
pub mod utils;
