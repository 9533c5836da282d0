pub mod classification;
pub mod ranking;

use serde::Serialize;

pub use classification::{ClassificationReport, ConfusionMatrix};
pub use ranking::{evaluate_ranking, RankingMetric, RankingMetrics};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub avg: f64,
    pub p50: u128,
    pub p95: u128,
}

pub(crate) fn compute_latency_stats(latencies: &[u128]) -> LatencyStats {
    if latencies.is_empty() {
        return LatencyStats::default();
    }
    let mut sorted = latencies.to_vec();
    sorted.sort_unstable();
    let sum: u128 = sorted.iter().copied().sum();
    #[allow(clippy::cast_precision_loss)]
    let avg = sum as f64 / (sorted.len() as f64);
    LatencyStats {
        avg,
        p50: percentile(&sorted, 0.50),
        p95: percentile(&sorted, 0.95),
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn percentile(sorted: &[u128], fraction: f64) -> u128 {
    let Some(last) = sorted.len().checked_sub(1) else {
        return 0;
    };
    let idx = (fraction.clamp(0.0, 1.0) * last as f64).round() as usize;
    sorted.get(idx.min(last)).copied().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_percentiles_use_nearest_rank() {
        let stats = compute_latency_stats(&[40, 10, 30, 20, 50]);
        assert!((stats.avg - 30.0).abs() < f64::EPSILON);
        assert_eq!(stats.p50, 30);
        assert_eq!(stats.p95, 50);
        assert_eq!(compute_latency_stats(&[]), LatencyStats::default());
    }
}
