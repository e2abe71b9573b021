//! Expansion of one feature group across its time windows.
//!
//! A [`PoolsGenerator`] hands out one [`PoolSupplier`] per time window. The
//! suppliers share whatever can be shared between windows: the climatology,
//! a generated-baseline source, and the left data when one retrieval over
//! the union of all windows can serve every window.

use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::caching::CachingRetriever;
use crate::error::Result;
use crate::feature::FeatureGroup;
use crate::generators::BaselineGenerator;
use crate::pool::PoolMetadata;
use crate::retrieval::{sliced, Retriever, RetrieverFactory};
use crate::supplier::{BaselineSource, Climatology, PoolComponents, PoolSupplier, PoolSupplierConfig};
use crate::window::TimeWindow;

/// Baseline wiring for a feature group.
pub enum BaselinePlan<R> {
    /// Read per window from the baseline dataset.
    Retrieved,
    /// Derived from a source shared by every window.
    Generated(Arc<dyn BaselineGenerator<R>>),
}

/// Where each window's left data come from.
enum LeftSource<L> {
    /// One retrieval sliced per window.
    Shared(Retriever<L>),
    PerWindow,
}

/// Parts of a generator, assembled by the pool factory.
pub struct PoolsGeneratorParts<L, R> {
    pub components: Arc<PoolComponents<L, R>>,
    /// Retriever factory, already wrapped with the caching policy.
    pub retrievers: Arc<dyn RetrieverFactory<L, R>>,
    pub group: FeatureGroup,
    pub windows: Vec<TimeWindow>,
    pub metadata: PoolMetadata,
    pub baseline_metadata: Option<PoolMetadata>,
    pub baseline: Option<BaselinePlan<R>>,
    pub climatology: Option<Arc<Climatology<L>>>,
    /// Left data do not depend on the time window.
    pub left_time_window_independent: bool,
}

/// One pool supplier per time window of one feature group.
pub struct PoolsGenerator<L, R> {
    components: Arc<PoolComponents<L, R>>,
    retrievers: Arc<dyn RetrieverFactory<L, R>>,
    group: FeatureGroup,
    windows: Vec<TimeWindow>,
    metadata: PoolMetadata,
    baseline_metadata: Option<PoolMetadata>,
    baseline: Option<BaselinePlan<R>>,
    climatology: Option<Arc<Climatology<L>>>,
    left: LeftSource<L>,
}

impl<L, R> PoolsGenerator<L, R>
where
    L: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// Build a generator. Windows are sorted and de-duplicated.
    ///
    /// # Errors
    /// Returns [`crate::error::PoolError::InvalidTimeWindow`] when the left
    /// retrieval window cannot be formed.
    pub fn new(parts: PoolsGeneratorParts<L, R>) -> Result<Self> {
        let mut windows = parts.windows;
        windows.sort();
        windows.dedup();

        let mut generator = Self {
            components: parts.components,
            retrievers: parts.retrievers,
            group: parts.group,
            windows,
            metadata: parts.metadata,
            baseline_metadata: parts.baseline_metadata,
            baseline: parts.baseline,
            climatology: parts.climatology,
            left: LeftSource::PerWindow,
        };
        generator.left = generator.left_source(parts.left_time_window_independent)?;
        Ok(generator)
    }

    fn left_source(&self, time_window_independent: bool) -> Result<LeftSource<L>> {
        if let Some(climatology) = &self.climatology {
            debug!(group = self.group.name(), "left data are read from the climatology");
            return Ok(LeftSource::Shared(climatology.retriever()));
        }
        if !time_window_independent || self.windows.is_empty() {
            return Ok(LeftSource::PerWindow);
        }
        let union = self.left_window(&TimeWindow::union(&self.windows)?)?;
        debug!(group = self.group.name(), window = %union, "left data are read once for all windows");
        let shared: Retriever<L> = Arc::new(CachingRetriever::new(
            self.retrievers
                .left_retriever(&self.group.left_features(), Some(&union)),
        ));
        Ok(LeftSource::Shared(shared))
    }

    /// Valid-time window of left data needed by `window`, widened by one
    /// desired period for upscaling and shifted against the left offset.
    fn left_window(&self, window: &TimeWindow) -> Result<TimeWindow> {
        let (lower, upper) = window.valid_time_bounds();
        let period = self
            .components
            .desired_time_scale
            .map_or_else(Duration::zero, |scale| scale.period());
        let offset = self.components.left_offset;
        TimeWindow::of_valid_times(lower - period - offset, upper - offset)
    }

    pub fn feature_group(&self) -> &FeatureGroup {
        &self.group
    }

    /// The sorted, de-duplicated time windows.
    pub fn time_windows(&self) -> &[TimeWindow] {
        &self.windows
    }

    /// One supplier per time window, in window order.
    ///
    /// # Errors
    /// Propagates supplier construction failures.
    #[instrument(skip_all, fields(group = self.group.name(), n_windows = self.windows.len()))]
    pub fn suppliers(&self) -> Result<Vec<PoolSupplier<L, R>>> {
        self.windows.iter().map(|window| self.supplier(window)).collect()
    }

    fn supplier(&self, window: &TimeWindow) -> Result<PoolSupplier<L, R>> {
        let left_window = self.left_window(window)?;
        let left = match &self.left {
            LeftSource::Shared(shared) => {
                let (lower, upper) = left_window.valid_time_bounds();
                sliced(Arc::clone(shared), lower, upper)
            }
            LeftSource::PerWindow => self
                .retrievers
                .left_retriever(&self.group.left_features(), Some(&left_window)),
        };
        let right = self
            .retrievers
            .right_retriever(&self.group.right_features(), window);
        let baseline = self.baseline.as_ref().map(|plan| match plan {
            BaselinePlan::Retrieved => BaselineSource::Retrieved(
                self.retrievers
                    .baseline_retriever(&self.group.baseline_features(), Some(window)),
            ),
            BaselinePlan::Generated(generator) => BaselineSource::Generated(Arc::clone(generator)),
        });

        PoolSupplier::new(PoolSupplierConfig {
            components: Arc::clone(&self.components),
            metadata: self.metadata.clone().with_time_window(*window),
            baseline_metadata: self.baseline_metadata.clone(),
            left,
            right,
            baseline,
            climatology: self.climatology.clone(),
        })
    }
}
