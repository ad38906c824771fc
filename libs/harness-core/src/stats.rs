use serde::Serialize;

/// Summary of a set of non-negative duration samples (milliseconds).
///
/// Percentiles are nearest-rank: sort ascending, take the sample at
/// `clamp(ceil(len * p) - 1, 0, len - 1)`. No interpolation, so the
/// result is always an observed sample and at exact boundaries the
/// higher of two candidates wins. Empty input gives all zeros.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyStats {
    pub samples: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl LatencyStats {
    pub fn from_samples(samples: impl IntoIterator<Item = f64>) -> Self {
        let mut sorted: Vec<f64> = samples.into_iter().collect();
        if sorted.is_empty() {
            return Self::default();
        }
        sorted.sort_by(f64::total_cmp);

        let sum: f64 = sorted.iter().sum();
        Self {
            samples: sorted.len(),
            mean: sum / sorted.len() as f64,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            p50: percentile(&sorted, 0.50),
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
        }
    }
}

/// Nearest-rank percentile over an ascending slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    let len = sorted.len();
    if len == 0 {
        return 0.0;
    }
    let rank = (len as f64 * p).ceil() as i64 - 1;
    let idx = rank.clamp(0, len as i64 - 1) as usize;
    sorted[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p95_of_five_samples_is_the_largest() {
        assert_eq!(percentile(&[1.0, 2.0, 3.0, 4.0, 5.0], 0.95), 5.0);
    }

    #[test]
    fn nearest_rank_boundaries() {
        let sorted = [10.0, 20.0, 30.0, 40.0];
        // ceil(4 * 0.5) - 1 = 1
        assert_eq!(percentile(&sorted, 0.5), 20.0);
        assert_eq!(percentile(&sorted, 0.0), 10.0);
        assert_eq!(percentile(&sorted, 1.0), 40.0);
        assert_eq!(percentile(&[7.0], 0.99), 7.0);
    }

    #[test]
    fn summary_of_unsorted_samples() {
        let stats = LatencyStats::from_samples([5.0, 1.0, 4.0, 2.0, 3.0]);
        assert_eq!(stats.samples, 5);
        assert_eq!(stats.mean, 3.0);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 5.0);
        assert_eq!(stats.p50, 3.0);
        assert_eq!(stats.p95, 5.0);
    }

    #[test]
    fn empty_samples_are_all_zero() {
        let stats = LatencyStats::from_samples(std::iter::empty());
        assert_eq!(stats, LatencyStats::default());
        assert_eq!(stats.mean, 0.0);
        assert_eq!(stats.p95, 0.0);
        assert_eq!(percentile(&[], 0.95), 0.0);
    }
}
