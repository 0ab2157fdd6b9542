//! Probe module for target monitoring.
//!
//! A probe never fails: every transport or protocol problem is captured in
//! the returned [`Sample`].

mod endpoints;
mod http;

pub use endpoints::*;
pub use http::*;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::store::{ErrorKind, Sample};

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("DNS resolution failed: {0}")]
    Dns(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("TLS handshake failed: {0}")]
    Tls(String),
    #[error("failed reading response body: {0}")]
    Body(String),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProbeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProbeError::Timeout(_) => ErrorKind::Timeout,
            ProbeError::Dns(_) => ErrorKind::Dns,
            ProbeError::Connect(_) => ErrorKind::Connect,
            ProbeError::Tls(_) => ErrorKind::Tls,
            ProbeError::Body(_) => ErrorKind::Body,
            ProbeError::InvalidUrl(_) => ErrorKind::InvalidUrl,
            ProbeError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Something that can time a single request against a URL.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, url: &str, timeout: Duration) -> Sample;
}

/// Real HTTP prober.
#[derive(Debug, Clone, Default)]
pub struct HttpProber;

impl HttpProber {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &str, timeout: Duration) -> Sample {
        run_http_probe(url, timeout).await
    }
}
