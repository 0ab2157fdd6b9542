//! Composite probes over a target's health endpoints.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use super::Prober;
use crate::store::{ErrorKind, PhaseTimings, ProbeFailure, Sample, Target};

/// Probe every URL of a target and fold the results into one sample.
///
/// Endpoints are probed concurrently. The fastest successful response
/// provides the timing, status and size; the sample is successful only if
/// every endpoint succeeded.
pub async fn probe_target(prober: Arc<dyn Prober>, target: &Target, timeout: Duration) -> Sample {
    let urls = target.probe_urls();
    if urls.len() == 1 {
        return prober.probe(&urls[0], timeout).await;
    }

    let mut set = JoinSet::new();
    for (idx, url) in urls.iter().enumerate() {
        let prober = Arc::clone(&prober);
        let url = url.clone();
        set.spawn(async move {
            let sample = prober.probe(&url, timeout).await;
            (idx, sample)
        });
    }

    let mut samples: Vec<Option<Sample>> = vec![None; urls.len()];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, sample)) => samples[idx] = Some(sample),
            Err(e) => tracing::error!("Probe task for {} failed: {}", target.name, e),
        }
    }

    let samples: Vec<(String, Sample)> = urls
        .into_iter()
        .zip(samples)
        .map(|(url, sample)| {
            let sample = sample.unwrap_or_else(|| {
                Sample::failed(
                    chrono::Utc::now(),
                    Duration::ZERO,
                    None,
                    PhaseTimings::default(),
                    ProbeFailure::new(ErrorKind::Internal, "probe task did not complete"),
                )
            });
            (url, sample)
        })
        .collect();

    combine_endpoint_samples(&target.url, samples)
}

/// Fold per-endpoint samples into one representative sample.
pub fn combine_endpoint_samples(base_url: &str, samples: Vec<(String, Sample)>) -> Sample {
    let earliest = samples.iter().map(|(_, s)| s.timestamp).min();

    let failures: Vec<&(String, Sample)> = samples.iter().filter(|(_, s)| !s.success).collect();
    let fastest_ok = samples
        .iter()
        .filter(|(_, s)| s.success)
        .min_by(|(_, a), (_, b)| a.response_time.total_cmp(&b.response_time));

    let mut combined = match (fastest_ok, failures.first()) {
        (Some((_, s)), _) => s.clone(),
        (None, Some((_, s))) => s.clone(),
        (None, None) => {
            return Sample::failed(
                chrono::Utc::now(),
                Duration::ZERO,
                None,
                PhaseTimings::default(),
                ProbeFailure::new(ErrorKind::Internal, "no health endpoints probed"),
            )
        }
    };

    if let Some(ts) = earliest {
        combined.timestamp = ts;
    }

    if let Some((_, first_failed)) = failures.first() {
        let kind = first_failed
            .error_kind()
            .unwrap_or(ErrorKind::Internal);
        let detail: Vec<String> = failures
            .iter()
            .map(|(url, s)| {
                let path = url.strip_prefix(base_url.trim_end_matches('/')).unwrap_or(url);
                let reason = s
                    .error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| "failed".to_string());
                format!("{}: {}", path, reason)
            })
            .collect();

        combined.success = false;
        combined.error = Some(ProbeFailure::new(
            kind,
            format!(
                "{} of {} health endpoints failed ({})",
                failures.len(),
                samples.len(),
                detail.join("; ")
            ),
        ));
    }

    combined
}
