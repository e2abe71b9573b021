//! Cross-pairing: forcing main and baseline pairs to share time coordinates.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use crate::error::{PoolError, Result};
use crate::series::TimeSeries;

/// How main and baseline series are matched before their valid times are
/// intersected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossPairMethod {
    /// Reference times must be identical.
    #[default]
    Exact,
    /// Nearest issue time, within an optional tolerance.
    Fuzzy,
}

/// Main and baseline series at identical time coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossPairs<A, B> {
    pub main: Vec<TimeSeries<A>>,
    pub baseline: Vec<TimeSeries<B>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrossPairer {
    method: CrossPairMethod,
    tolerance: Option<Duration>,
}

impl CrossPairer {
    /// # Errors
    /// Returns [`PoolError::InvalidParameter`] for a negative tolerance.
    pub fn new(method: CrossPairMethod, tolerance: Option<Duration>) -> Result<Self> {
        if let Some(tolerance) = tolerance {
            if tolerance < Duration::zero() {
                return Err(PoolError::InvalidParameter {
                    param: "tolerance".into(),
                    value: tolerance.to_string(),
                    reason: "the cross-pairing tolerance cannot be negative".into(),
                });
            }
        }
        Ok(Self { method, tolerance })
    }

    pub fn exact() -> Self {
        Self {
            method: CrossPairMethod::Exact,
            tolerance: None,
        }
    }

    pub fn method(&self) -> CrossPairMethod {
        self.method
    }

    /// Cross-pair main and baseline series.
    ///
    /// Each main series is matched with at most one baseline series, after
    /// which both keep only their common valid times. Unmatched series on
    /// either side are dropped.
    pub fn cross<A: Clone, B: Clone>(
        &self,
        main: Vec<TimeSeries<A>>,
        baseline: Vec<TimeSeries<B>>,
    ) -> CrossPairs<A, B> {
        let n_main = main.len();
        let n_baseline = baseline.len();
        let mut used = vec![false; baseline.len()];
        let mut matched_main = Vec::new();
        let mut matched_baseline = Vec::new();

        for series in main {
            let Some(index) = self.find_match(&series, &baseline, &used) else {
                continue;
            };
            used[index] = true;

            let common: BTreeSet<DateTime<Utc>> = series
                .valid_times()
                .intersection(&baseline[index].valid_times())
                .copied()
                .collect();
            matched_main.push(series.filter(|e| common.contains(&e.time)));
            matched_baseline.push(baseline[index].clone().filter(|e| common.contains(&e.time)));
        }

        if matched_main.len() < n_main || matched_baseline.len() < n_baseline {
            debug!(
                n_main,
                n_baseline,
                n_matched = matched_main.len(),
                "dropped series without a cross-pair"
            );
        }

        CrossPairs {
            main: matched_main,
            baseline: matched_baseline,
        }
    }

    fn find_match<A, B>(&self, main: &TimeSeries<A>, baseline: &[TimeSeries<B>], used: &[bool]) -> Option<usize> {
        let candidates = baseline.iter().enumerate().filter(|(i, _)| !used[*i]);
        match self.method {
            CrossPairMethod::Exact => candidates
                .filter(|(_, b)| b.metadata().reference_times == main.metadata().reference_times)
                .map(|(i, _)| i)
                .next(),
            CrossPairMethod::Fuzzy => {
                let anchor = main.metadata().anchor_time();
                candidates
                    .filter_map(|(i, b)| {
                        let distance = match (anchor, b.metadata().anchor_time()) {
                            (Some(x), Some(y)) => abs(x - y),
                            (None, None) => Duration::zero(),
                            _ => return None,
                        };
                        match self.tolerance {
                            Some(tolerance) if distance > tolerance => None,
                            _ => Some((distance, i)),
                        }
                    })
                    .min()
                    .map(|(_, i)| i)
            }
        }
    }
}

fn abs(duration: Duration) -> Duration {
    if duration < Duration::zero() {
        -duration
    } else {
        duration
    }
}
