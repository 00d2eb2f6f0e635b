//! Weighted query selection.
//!
//! Query ratios are folded into a cumulative distribution once, before any
//! worker starts. Every worker then samples from the same immutable table.

use rand::Rng;

use crate::error::{BenchError, Result};

/// Allowed distance between the sum of the ratios and 1.0
pub const RATIO_TOLERANCE: f64 = 0.01;

/// Cumulative distribution over query indices
#[derive(Debug, Clone, PartialEq)]
pub struct CumulativeDistribution {
    cdf: Vec<f64>,
}

impl CumulativeDistribution {
    /// Build the distribution from per-query ratios
    pub fn build(weights: &[f64]) -> Result<Self> {
        if weights.is_empty() {
            return Err(BenchError::Config("no queries were provided".to_string()));
        }

        if let Some((index, weight)) = weights
            .iter()
            .enumerate()
            .find(|(_, w)| !w.is_finite() || **w < 0.0 || **w > 1.0)
        {
            return Err(BenchError::Config(format!(
                "ratio of query {} must be within [0, 1] (got {})",
                index, weight
            )));
        }

        let total: f64 = weights.iter().sum();
        if (1.0 - total).abs() > RATIO_TOLERANCE {
            return Err(BenchError::Config(format!(
                "total ratio should be 1.0 (currently is {:.6})",
                total
            )));
        }

        let cdf = weights
            .iter()
            .scan(0.0_f64, |acc, w| {
                *acc += w;
                Some(*acc)
            })
            .collect();

        Ok(Self { cdf })
    }

    /// Draw a query index
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let r: f64 = rng.gen();
        self.index_for(r)
    }

    /// Smallest index whose cumulative weight covers `r`, falling back to the
    /// last index when rounding leaves `r` above the final entry
    pub fn index_for(&self, r: f64) -> usize {
        let bucket = self.cdf.partition_point(|c| *c < r);
        bucket.min(self.cdf.len() - 1)
    }

    /// Number of queries
    pub fn len(&self) -> usize {
        self.cdf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cdf.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.cdf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_rejects_ratios_not_summing_to_one() {
        let err = CumulativeDistribution::build(&[0.5, 0.3]).unwrap_err();
        assert!(err.is_config());
        assert!(CumulativeDistribution::build(&[0.5, 0.505]).is_ok());
        assert!(CumulativeDistribution::build(&[]).is_err());
        assert!(CumulativeDistribution::build(&[1.5, -0.5]).is_err());
        assert!(CumulativeDistribution::build(&[f64::NAN, 1.0]).is_err());
    }

    #[test]
    fn test_index_for_boundaries() {
        let cdf = CumulativeDistribution::build(&[0.25, 0.25, 0.5]).unwrap();
        assert_eq!(cdf.as_slice(), &[0.25, 0.5, 1.0]);
        assert_eq!(cdf.index_for(0.0), 0);
        assert_eq!(cdf.index_for(0.25), 0);
        assert_eq!(cdf.index_for(0.2500001), 1);
        assert_eq!(cdf.index_for(0.75), 2);
    }

    #[test]
    fn test_rounding_falls_back_to_last_index() {
        // sums to 0.995, so draws above that have no covering bucket
        let cdf = CumulativeDistribution::build(&[0.5, 0.495]).unwrap();
        assert_eq!(cdf.index_for(0.999), 1);
    }

    #[test]
    fn test_zero_weight_queries_are_never_drawn() {
        let cdf = CumulativeDistribution::build(&[0.0, 1.0, 0.0]).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            assert_eq!(cdf.sample(&mut rng), 1);
        }
    }

    #[test]
    fn test_empirical_split_matches_ratios() {
        let cdf = CumulativeDistribution::build(&[0.7, 0.3]).unwrap();
        let mut rng = StdRng::seed_from_u64(12345);
        let draws = 10_000;
        let mut counts = [0usize; 2];
        for _ in 0..draws {
            counts[cdf.sample(&mut rng)] += 1;
        }

        let first = counts[0] as f64 / draws as f64;
        let second = counts[1] as f64 / draws as f64;
        assert!((first - 0.7).abs() <= 0.02, "first share was {}", first);
        assert!((second - 0.3).abs() <= 0.02, "second share was {}", second);
    }

    proptest! {
        #[test]
        fn prop_cdf_is_monotonic_and_samples_in_range(
            raw in prop::collection::vec(0.0f64..1.0, 1..12),
            seed in any::<u64>(),
        ) {
            let total: f64 = raw.iter().sum();
            prop_assume!(total > 0.0);
            let weights: Vec<f64> = raw.iter().map(|w| w / total).collect();

            let cdf = CumulativeDistribution::build(&weights).unwrap();
            let entries = cdf.as_slice();
            prop_assert!(entries.windows(2).all(|w| w[0] <= w[1]));
            prop_assert!((entries[entries.len() - 1] - 1.0).abs() <= RATIO_TOLERANCE);

            let mut rng = StdRng::seed_from_u64(seed);
            for _ in 0..64 {
                prop_assert!(cdf.sample(&mut rng) < weights.len());
            }
        }
    }
}
