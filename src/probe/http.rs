//! HTTP probe implementation.
//!
//! Phases are timed separately: DNS through the system resolver, TCP connect
//! through a dedicated handshake to the first resolved address that accepts,
//! then the request itself with that address pinned so reqwest does not
//! resolve again.

use chrono::Utc;
use reqwest::redirect::Policy;
use reqwest::Url;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

use super::ProbeError;
use crate::store::{duration_ms, ErrorKind, PhaseTimings, ProbeFailure, Sample};

const USER_AGENT: &str = concat!("pulsewatch/", env!("CARGO_PKG_VERSION"));

/// What was learned before the probe finished or failed.
#[derive(Default)]
struct Progress {
    timings: PhaseTimings,
    status: Option<u16>,
    size: u64,
}

/// Run an HTTP GET probe against the given URL.
///
/// The whole exchange is bounded by `timeout`; on expiry the sample carries
/// error kind `Timeout` and whatever phases had completed.
pub async fn run_http_probe(url: &str, timeout: Duration) -> Sample {
    let timestamp = Utc::now();
    let start = Instant::now();
    let mut progress = Progress::default();

    let result = match tokio::time::timeout(timeout, timed_request(url, timeout, &mut progress)).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Timeout(timeout)),
    };
    let elapsed = start.elapsed();

    match (result, progress.status) {
        (Ok(()), Some(status)) => {
            Sample::from_status(timestamp, elapsed, status, progress.size, progress.timings)
        }
        (Ok(()), None) => Sample::failed(
            timestamp,
            elapsed,
            None,
            progress.timings,
            ProbeFailure::new(ErrorKind::Internal, "no response recorded"),
        ),
        (Err(e), status) => {
            tracing::debug!("HTTP probe {} failed: {}", url, e);
            Sample::failed(
                timestamp,
                elapsed,
                status,
                progress.timings,
                ProbeFailure::new(e.kind(), e.to_string()),
            )
        }
    }
}

async fn timed_request(url: &str, timeout: Duration, progress: &mut Progress) -> Result<(), ProbeError> {
    let parsed = Url::parse(url).map_err(|e| ProbeError::InvalidUrl(format!("{}: {}", url, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ProbeError::InvalidUrl(format!("unsupported scheme: {}", parsed.scheme())));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| ProbeError::InvalidUrl(format!("{}: missing host", url)))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    let port = parsed
        .port_or_known_default()
        .ok_or_else(|| ProbeError::InvalidUrl(format!("{}: missing port", url)))?;

    // DNS
    let phase = Instant::now();
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(|e| ProbeError::Dns(format!("{}: {}", host, e)))?
        .collect();
    if addrs.is_empty() {
        return Err(ProbeError::Dns(format!("{}: no addresses", host)));
    }
    progress.timings.dns = duration_ms(phase.elapsed());

    // TCP connect
    let phase = Instant::now();
    let addr = connect_first(&addrs).await?;
    progress.timings.connect = duration_ms(phase.elapsed());

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .redirect(Policy::none())
        .user_agent(USER_AGENT)
        .resolve(&host, addr)
        .build()
        .map_err(|e| ProbeError::Internal(e.to_string()))?;

    // First byte: request sent and response headers received
    let phase = Instant::now();
    let response = client
        .get(parsed)
        .send()
        .await
        .map_err(|e| classify(e, timeout))?;
    progress.timings.first_byte = duration_ms(phase.elapsed());
    progress.status = Some(response.status().as_u16());

    // Read the full body to measure complete transfer time
    let phase = Instant::now();
    let body = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            ProbeError::Timeout(timeout)
        } else {
            ProbeError::Body(error_chain(&e))
        }
    })?;
    progress.timings.download = duration_ms(phase.elapsed());
    progress.size = body.len() as u64;

    Ok(())
}

/// Connect to each address in resolver order and return the first that accepts.
async fn connect_first(addrs: &[SocketAddr]) -> Result<SocketAddr, ProbeError> {
    let mut failures = Vec::with_capacity(addrs.len());
    for &addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                drop(stream);
                return Ok(addr);
            }
            Err(e) => {
                tracing::debug!("HTTP probe: connect to {} failed: {}", addr, e);
                failures.push(format!("{}: {}", addr, e));
            }
        }
    }
    Err(ProbeError::Connect(failures.join("; ")))
}

fn classify(e: reqwest::Error, timeout: Duration) -> ProbeError {
    if e.is_timeout() {
        return ProbeError::Timeout(timeout);
    }

    let detail = error_chain(&e);
    let lower = detail.to_lowercase();
    if lower.contains("certificate") || lower.contains("tls") || lower.contains("ssl") {
        ProbeError::Tls(detail)
    } else if e.is_body() || e.is_decode() {
        ProbeError::Body(detail)
    } else if e.is_builder() {
        ProbeError::InvalidUrl(detail)
    } else {
        ProbeError::Connect(detail)
    }
}

/// Flatten an error and its sources into one line.
fn error_chain(e: &dyn std::error::Error) -> String {
    let mut parts = vec![e.to_string()];
    let mut source = e.source();
    while let Some(s) = source {
        let text = s.to_string();
        if !parts.contains(&text) {
            parts.push(text);
        }
        source = s.source();
    }
    parts.join(": ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_test_server;

    #[tokio::test]
    async fn test_http_probe_invalid_url() {
        let sample = run_http_probe("http://256.256.256.256", Duration::from_millis(100)).await;
        assert!(!sample.success);
        assert_eq!(sample.error_kind(), Some(ErrorKind::InvalidUrl));
    }

    #[tokio::test]
    async fn test_http_probe_success() {
        let addr = spawn_test_server().await;
        let sample = run_http_probe(&format!("http://{}/", addr), Duration::from_secs(5)).await;

        assert!(sample.success, "{:?}", sample.error);
        assert_eq!(sample.status_code, Some(200));
        assert_eq!(sample.size, 5);
        assert!(sample.timings.first_byte > 0.0);
        assert!(sample.response_time >= sample.timings.first_byte);
    }

    #[tokio::test]
    async fn test_http_probe_server_error() {
        let addr = spawn_test_server().await;
        let sample = run_http_probe(&format!("http://{}/fail", addr), Duration::from_secs(5)).await;

        assert!(!sample.success);
        assert_eq!(sample.status_code, Some(500));
        assert_eq!(sample.error_kind(), Some(ErrorKind::Http));
    }

    #[tokio::test]
    async fn test_http_probe_does_not_follow_redirects() {
        let addr = spawn_test_server().await;
        let sample = run_http_probe(&format!("http://{}/moved", addr), Duration::from_secs(5)).await;

        assert!(sample.success);
        assert_eq!(sample.status_code, Some(307));
    }

    #[tokio::test]
    async fn test_http_probe_timeout() {
        let addr = spawn_test_server().await;
        let timeout = Duration::from_millis(200);
        let start = Instant::now();
        let sample = run_http_probe(&format!("http://{}/slow", addr), timeout).await;

        assert!(!sample.success);
        assert!(sample.is_timeout());
        assert!(start.elapsed() < timeout + Duration::from_millis(500));
        // the connection itself was established before the deadline
        assert!(sample.timings.connect >= 0.0);
    }

    #[tokio::test]
    async fn test_http_probe_connection_refused() {
        let addr = refused_addr();

        let sample = run_http_probe(&format!("http://{}/", addr), Duration::from_secs(2)).await;
        assert!(!sample.success);
        assert_eq!(sample.error_kind(), Some(ErrorKind::Connect));
        assert!(sample.status_code.is_none());
    }

    fn refused_addr() -> SocketAddr {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    }

    #[tokio::test]
    async fn test_connect_falls_through_unreachable_addresses() {
        let live = spawn_test_server().await;
        let dead = refused_addr();

        assert_eq!(connect_first(&[dead, live]).await.unwrap(), live);
        assert_eq!(connect_first(&[live, dead]).await.unwrap(), live);
    }

    #[tokio::test]
    async fn test_connect_reports_every_failed_address() {
        let first = refused_addr();
        let second = refused_addr();

        match connect_first(&[first, second]).await {
            Err(ProbeError::Connect(detail)) => {
                assert!(detail.contains(&first.to_string()), "{}", detail);
                assert!(detail.contains(&second.to_string()), "{}", detail);
            }
            other => panic!("expected connect error, got {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_scheme_is_invalid_url() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let sample = rt.block_on(run_http_probe("ftp://example.com/", Duration::from_secs(1)));
        assert_eq!(sample.error_kind(), Some(ErrorKind::InvalidUrl));
    }
}
