//! Pools: the paired data for one time window and feature group, ready for
//! statistics.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{PoolError, Result};
use crate::feature::FeatureTuple;
use crate::scale::TimeScale;
use crate::series::{Pair, TimeSeries};
use crate::status::ValidationEvent;
use crate::window::TimeWindow;

/// Paired series grouped by feature tuple.
pub type PairsByFeature<L, R> = BTreeMap<FeatureTuple, Vec<TimeSeries<Pair<L, R>>>>;

/// Describes a pool.
///
/// The factory builds one basic metadata for the main pairs and one for the
/// baseline pairs; each supplier completes them with its time window, the
/// time scale actually used and the validation events raised.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolMetadata {
    feature_group: String,
    feature_tuples: Vec<FeatureTuple>,
    time_window: Option<TimeWindow>,
    time_scale: Option<TimeScale>,
    is_baseline: bool,
    validation_events: Vec<ValidationEvent>,
}

impl PoolMetadata {
    /// Basic metadata without a time window.
    pub fn basic(
        feature_group: impl Into<String>,
        feature_tuples: Vec<FeatureTuple>,
        time_scale: Option<TimeScale>,
        is_baseline: bool,
    ) -> Self {
        Self {
            feature_group: feature_group.into(),
            feature_tuples,
            time_window: None,
            time_scale,
            is_baseline,
            validation_events: Vec::new(),
        }
    }

    pub fn with_time_window(mut self, window: TimeWindow) -> Self {
        self.time_window = Some(window);
        self
    }

    pub fn with_time_scale(mut self, time_scale: Option<TimeScale>) -> Self {
        self.time_scale = time_scale;
        self
    }

    pub fn with_validation_events(mut self, events: Vec<ValidationEvent>) -> Self {
        self.validation_events = events;
        self
    }

    pub fn feature_group(&self) -> &str {
        &self.feature_group
    }

    pub fn feature_tuples(&self) -> &[FeatureTuple] {
        &self.feature_tuples
    }

    pub fn time_window(&self) -> Option<&TimeWindow> {
        self.time_window.as_ref()
    }

    /// The time scale of the paired values.
    pub fn time_scale(&self) -> Option<&TimeScale> {
        self.time_scale.as_ref()
    }

    pub fn is_baseline(&self) -> bool {
        self.is_baseline
    }

    pub fn validation_events(&self) -> &[ValidationEvent] {
        &self.validation_events
    }
}

/// A baseline pool side.
#[derive(Debug, Clone, PartialEq)]
pub struct BaselinePairs<L, R> {
    pub metadata: PoolMetadata,
    pub pairs: PairsByFeature<L, R>,
}

/// Paired data for one time window of one feature group.
///
/// Every declared feature tuple has an entry, empty when no pairs were found.
#[derive(Debug, Clone, PartialEq)]
pub struct Pool<L, R> {
    metadata: PoolMetadata,
    main: PairsByFeature<L, R>,
    baseline: Option<BaselinePairs<L, R>>,
    climatology: Option<BTreeMap<FeatureTuple, Arc<[f64]>>>,
}

impl<L, R> Pool<L, R> {
    /// Assemble a pool.
    ///
    /// Declared feature tuples without pairs receive empty entries.
    ///
    /// # Errors
    /// Returns [`PoolError::InternalError`] when pairs are keyed by a tuple the
    /// metadata does not declare.
    pub fn assemble(
        metadata: PoolMetadata,
        main: PairsByFeature<L, R>,
        baseline: Option<BaselinePairs<L, R>>,
        climatology: Option<BTreeMap<FeatureTuple, Arc<[f64]>>>,
    ) -> Result<Self> {
        let main = complete(&metadata, main)?;
        let baseline = baseline
            .map(|b| -> Result<BaselinePairs<L, R>> {
                let pairs = complete(&b.metadata, b.pairs)?;
                Ok(BaselinePairs {
                    metadata: b.metadata,
                    pairs,
                })
            })
            .transpose()?;

        Ok(Self {
            metadata,
            main,
            baseline,
            climatology,
        })
    }

    pub fn metadata(&self) -> &PoolMetadata {
        &self.metadata
    }

    pub fn baseline_metadata(&self) -> Option<&PoolMetadata> {
        self.baseline.as_ref().map(|b| &b.metadata)
    }

    pub fn feature_tuples(&self) -> impl Iterator<Item = &FeatureTuple> {
        self.main.keys()
    }

    pub fn main(&self) -> &PairsByFeature<L, R> {
        &self.main
    }

    /// Main pairs for one feature tuple.
    pub fn main_pairs(&self, tuple: &FeatureTuple) -> Option<&[TimeSeries<Pair<L, R>>]> {
        self.main.get(tuple).map(Vec::as_slice)
    }

    pub fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }

    /// Baseline pairs for one feature tuple.
    pub fn baseline_pairs(&self, tuple: &FeatureTuple) -> Option<&[TimeSeries<Pair<L, R>>]> {
        self.baseline
            .as_ref()
            .and_then(|b| b.pairs.get(tuple))
            .map(Vec::as_slice)
    }

    /// Climatological values for one feature tuple.
    pub fn climatology(&self, tuple: &FeatureTuple) -> Option<&[f64]> {
        self.climatology
            .as_ref()
            .and_then(|c| c.get(tuple))
            .map(|values| values.as_ref())
    }

    /// Number of main pairs across all tuples.
    pub fn pair_count(&self) -> usize {
        count(&self.main)
    }

    /// Number of baseline pairs across all tuples.
    pub fn baseline_pair_count(&self) -> usize {
        self.baseline.as_ref().map_or(0, |b| count(&b.pairs))
    }

    /// Split into the main side and the optional baseline side.
    pub fn into_parts(self) -> (PoolMetadata, PairsByFeature<L, R>, Option<BaselinePairs<L, R>>) {
        (self.metadata, self.main, self.baseline)
    }
}

fn complete<L, R>(metadata: &PoolMetadata, mut pairs: PairsByFeature<L, R>) -> Result<PairsByFeature<L, R>> {
    if let Some(undeclared) = pairs
        .keys()
        .find(|tuple| !metadata.feature_tuples.contains(tuple))
    {
        return Err(PoolError::InternalError(format!(
            "pairs for feature tuple {} are not declared in feature group '{}'",
            undeclared, metadata.feature_group
        )));
    }
    for tuple in &metadata.feature_tuples {
        pairs.entry(tuple.clone()).or_default();
    }
    Ok(pairs)
}

fn count<L, R>(pairs: &PairsByFeature<L, R>) -> usize {
    pairs.values().flatten().map(TimeSeries::len).sum()
}
