//! Response-time statistics.
//!
//! Percentiles are estimated with a TDigest built over the sample window, the
//! rest is computed exactly.

use tdigests::TDigest;

/// Aggregate response-time figures in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResponseStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
}

/// Compute statistics for the given response times.
///
/// Non-finite values are ignored; returns `None` when nothing is left.
pub fn response_stats(values: &[f64]) -> Option<ResponseStats> {
    let values: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if values.is_empty() {
        return None;
    }

    let mut min = f64::MAX;
    let mut max = f64::MIN;
    let mut sum = 0.0;

    for &v in &values {
        if v < min {
            min = v;
        }
        if v > max {
            max = v;
        }
        sum += v;
    }

    let td = TDigest::from_values(values.clone());

    Some(ResponseStats {
        avg: sanitize_float(sum / values.len() as f64),
        min: sanitize_float(min),
        max: sanitize_float(max),
        p50: sanitize_float(td.estimate_quantile(0.50)).clamp(min, max),
        p95: sanitize_float(td.estimate_quantile(0.95)).clamp(min, max),
    })
}

fn sanitize_float(f: f64) -> f64 {
    if f.is_nan() || f.is_infinite() {
        0.0
    } else {
        f
    }
}
