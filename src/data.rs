use crate::error::{Error, Result};

/// Immutable two-or-more-group dataset: one real outcome per observation and
/// a 1-based group index for each.
///
/// Construction validates every shape/range invariant up front; once built,
/// the dataset never changes and is shared read-only across sampler chains.
#[derive(Debug, Clone)]
pub struct Dataset {
    outcome: Vec<f64>,
    group_id: Vec<usize>,
    n_groups: usize,
}

impl Dataset {
    /// Build a dataset from an outcome vector and 1-based group indices.
    ///
    /// Fails with [`Error::InvalidInput`] on mismatched lengths, `N < 1`,
    /// `G < 2`, out-of-range group indices, or non-finite outcomes. A group
    /// with no observations is allowed (its posterior is prior-only) but is
    /// logged as a caveat.
    pub fn new(outcome: Vec<f64>, group_id: Vec<usize>, n_groups: usize) -> Result<Self> {
        if outcome.is_empty() {
            return Err(Error::InvalidInput("need at least one observation".into()));
        }
        if outcome.len() != group_id.len() {
            return Err(Error::InvalidInput(format!(
                "outcome has {} entries but group_id has {}",
                outcome.len(),
                group_id.len()
            )));
        }
        if n_groups < 2 {
            return Err(Error::InvalidInput(format!(
                "need at least 2 groups, got {}",
                n_groups
            )));
        }
        for (i, &g) in group_id.iter().enumerate() {
            if g < 1 || g > n_groups {
                return Err(Error::InvalidInput(format!(
                    "group_id[{}] = {} is outside 1..={}",
                    i, g, n_groups
                )));
            }
        }
        for (i, &y) in outcome.iter().enumerate() {
            if !y.is_finite() {
                return Err(Error::InvalidInput(format!(
                    "outcome[{}] = {} is not finite",
                    i, y
                )));
            }
        }

        let ds = Self {
            outcome,
            group_id,
            n_groups,
        };
        for (g, &count) in ds.group_counts().iter().enumerate() {
            if count == 0 {
                log::warn!(
                    "group {} has no observations; its posterior is prior-only",
                    g + 1
                );
            }
        }
        Ok(ds)
    }

    pub fn len(&self) -> usize {
        self.outcome.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcome.is_empty()
    }

    pub fn n_groups(&self) -> usize {
        self.n_groups
    }

    pub fn outcome(&self) -> &[f64] {
        &self.outcome
    }

    pub fn group_id(&self) -> &[usize] {
        &self.group_id
    }

    /// Observation count per group (index 0 is group 1).
    pub fn group_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.n_groups];
        for &g in &self.group_id {
            counts[g - 1] += 1;
        }
        counts
    }

    /// Pooled empirical mean across all groups.
    pub fn pooled_mean(&self) -> f64 {
        self.outcome.iter().sum::<f64>() / self.outcome.len() as f64
    }

    /// Pooled empirical standard deviation (n−1 denominator).
    ///
    /// Falls back to 1.0 when the sample is degenerate (a single observation
    /// or zero spread) so the location prior stays proper.
    pub fn pooled_sd(&self) -> f64 {
        let n = self.outcome.len();
        if n < 2 {
            return 1.0;
        }
        let mean = self.pooled_mean();
        let ss: f64 = self.outcome.iter().map(|&y| (y - mean) * (y - mean)).sum();
        let sd = (ss / (n - 1) as f64).sqrt();
        if sd.is_finite() && sd > 0.0 {
            sd
        } else {
            1.0
        }
    }

    /// Per-group empirical means; `None` for unobserved groups.
    pub fn group_means(&self) -> Vec<Option<f64>> {
        let mut sums = vec![0.0f64; self.n_groups];
        let counts = self.group_counts();
        for (&y, &g) in self.outcome.iter().zip(self.group_id.iter()) {
            sums[g - 1] += y;
        }
        sums.iter()
            .zip(counts.iter())
            .map(|(&s, &c)| if c > 0 { Some(s / c as f64) } else { None })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_dataset() {
        let ds = Dataset::new(vec![1.0, 2.0, 3.0], vec![1, 2, 1], 2).unwrap();
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.n_groups(), 2);
        assert_eq!(ds.group_counts(), vec![2, 1]);
        assert!((ds.pooled_mean() - 2.0).abs() < 1e-12);
        assert!((ds.pooled_sd() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_mismatched_lengths() {
        let err = Dataset::new(vec![1.0, 2.0], vec![1], 2).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_rejects_empty() {
        assert!(Dataset::new(vec![], vec![], 2).is_err());
    }

    #[test]
    fn test_rejects_single_group() {
        assert!(Dataset::new(vec![1.0], vec![1], 1).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_group() {
        assert!(Dataset::new(vec![1.0, 2.0], vec![1, 3], 2).is_err());
        assert!(Dataset::new(vec![1.0, 2.0], vec![0, 1], 2).is_err());
    }

    #[test]
    fn test_rejects_non_finite_outcome() {
        assert!(Dataset::new(vec![1.0, f64::NAN], vec![1, 2], 2).is_err());
    }

    #[test]
    fn test_unobserved_group_allowed() {
        let ds = Dataset::new(vec![1.0, 2.0], vec![1, 1], 2).unwrap();
        assert_eq!(ds.group_counts(), vec![2, 0]);
        assert_eq!(ds.group_means()[1], None);
    }

    #[test]
    fn test_degenerate_sd_falls_back() {
        let ds = Dataset::new(vec![5.0, 5.0], vec![1, 2], 2).unwrap();
        assert_eq!(ds.pooled_sd(), 1.0);
    }
}
