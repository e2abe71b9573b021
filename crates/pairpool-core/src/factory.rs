//! Pool factory: the static wiring of one evaluation.
//!
//! The factory checks the declared pool shape against the datasets, builds
//! the pairer, upscalers, transformers and cross-pairer once, and produces a
//! [`PoolsGenerator`] per feature group.

use std::sync::Arc;
use tracing::{debug, instrument};

use crate::caching::{BaselineCaching, CachingRetrieverFactory};
use crate::config::{DataType, GeneratedBaseline, PoolingOptions};
use crate::cross_pairing::CrossPairer;
use crate::error::{PoolError, Result};
use crate::feature::FeatureGroup;
use crate::generators::{BaselineGenerator, PersistenceGenerator};
use crate::pairing::Pairer;
use crate::pool::PoolMetadata;
use crate::pools::{BaselinePlan, PoolsGenerator, PoolsGeneratorParts};
use crate::retrieval::RetrieverFactory;
use crate::series::TimeSeries;
use crate::supplier::{Climatology, PoolComponents};
use crate::upscaling::Upscaler;
use crate::values::{
    bounds_transformer, convert_series, default_admissibility, default_climate_mapper, ValueKind,
    ValueShape,
};
use crate::window::TimeWindow;

/// Builds pools generators for one evaluation.
pub struct PoolFactory<L, R> {
    options: PoolingOptions,
    shape: ValueShape,
    components: Arc<PoolComponents<L, R>>,
}

impl<L, R> PoolFactory<L, R>
where
    L: ValueKind,
    R: ValueKind,
{
    /// Create a factory for pools of the given shape.
    ///
    /// # Arguments
    /// * `options` - Pooling options, validated here
    /// * `shape` - Shape of the pools to build
    ///
    /// # Errors
    /// Returns [`PoolError::Configuration`] when the options are inconsistent
    /// or the shape does not match the value types or declared datasets.
    pub fn new(options: PoolingOptions, shape: ValueShape) -> Result<Self> {
        options.validate()?;
        check_shape::<L, R>(&options, shape)?;

        let cross_pairer = options
            .cross_pair
            .map(|c| CrossPairer::new(c.method, c.tolerance))
            .transpose()?;

        let components = PoolComponents {
            pairer: Pairer::with_default_admissibility(options.pairing_mode),
            left_upscaler: Upscaler::with_default_aggregator(options.rescale_lenient),
            right_upscaler: Upscaler::with_default_aggregator(options.rescale_lenient),
            left_transformer: options.value_bounds.map(bounds_transformer::<L>),
            right_transformer: options.value_bounds.map(bounds_transformer::<R>),
            cross_pairer,
            desired_time_scale: options.desired_time_scale,
            pair_frequency: options.pair_frequency,
            left_offset: options.left.time_offset,
            right_offset: options.right.time_offset,
            baseline_offset: options
                .baseline
                .map_or_else(chrono::Duration::zero, |b| b.dataset.time_offset),
        };
        debug!(
            %shape,
            desired_time_scale = ?options.desired_time_scale,
            baseline = options.has_baseline(),
            cross_pair = components.cross_pairer.is_some(),
            "created pool factory"
        );

        Ok(Self {
            options,
            shape,
            components: Arc::new(components),
        })
    }

    pub fn options(&self) -> &PoolingOptions {
        &self.options
    }

    pub fn shape(&self) -> ValueShape {
        self.shape
    }

    /// Basic metadata for the main pairs of a feature group.
    pub fn basic_metadata(&self, group: &FeatureGroup) -> PoolMetadata {
        PoolMetadata::basic(
            group.name(),
            group.tuples().to_vec(),
            self.options.desired_time_scale,
            false,
        )
    }

    /// Basic metadata for the baseline pairs, when a baseline is declared.
    pub fn basic_baseline_metadata(&self, group: &FeatureGroup) -> Option<PoolMetadata> {
        self.options.baseline.map(|_| {
            PoolMetadata::basic(
                group.name(),
                group.tuples().to_vec(),
                self.options.desired_time_scale,
                true,
            )
        })
    }

    /// Create the generator of pools for one feature group.
    ///
    /// # Arguments
    /// * `retrievers` - Storage-layer retriever factory; wrapped here with the
    ///   caching policy of the declared baseline
    /// * `group` - Feature group to pool
    /// * `windows` - Time windows, one pool each
    ///
    /// # Errors
    /// Returns [`PoolError::InvalidParameter`] when the baseline generator
    /// cannot be built, or a window error when a retrieval window cannot be
    /// formed.
    #[instrument(skip_all, fields(group = group.name(), n_windows = windows.len()))]
    pub fn pools_generator(
        &self,
        retrievers: Arc<dyn RetrieverFactory<L, R>>,
        group: FeatureGroup,
        windows: Vec<TimeWindow>,
    ) -> Result<PoolsGenerator<L, R>> {
        let c = &*self.components;

        let baseline_caching = match &self.options.baseline {
            Some(b) if b.same_as_climatology => BaselineCaching::SameAsClimatology(Arc::new(
                |series: TimeSeries<L>| convert_series::<L, R>(&series),
            )),
            Some(b) if b.generated.is_some() => BaselineCaching::Generated,
            _ => BaselineCaching::PassThrough,
        };
        let retrievers: Arc<dyn RetrieverFactory<L, R>> =
            Arc::new(CachingRetrieverFactory::new(retrievers, baseline_caching));

        let climatology = self.options.climatology_required.then(|| {
            Arc::new(Climatology::new(
                retrievers.climatology_retriever(&group.left_features()),
                default_climate_mapper(),
                c.left_upscaler.clone(),
                c.desired_time_scale,
            )
            .with_time_offset(c.left_offset))
        });

        let baseline = match self.options.baseline {
            None => None,
            Some(b) => Some(match b.generated {
                Some(GeneratedBaseline::Persistence { order }) => {
                    let generator: Arc<dyn BaselineGenerator<R>> = Arc::new(PersistenceGenerator::new(
                        order,
                        retrievers.baseline_retriever(&group.baseline_features(), None),
                        group.lookup(),
                        default_admissibility(),
                        Some(c.right_upscaler.clone()),
                    )?);
                    BaselinePlan::Generated(generator)
                }
                None => BaselinePlan::Retrieved,
            }),
        };

        PoolsGenerator::new(PoolsGeneratorParts {
            components: Arc::clone(&self.components),
            metadata: self.basic_metadata(&group),
            baseline_metadata: self.basic_baseline_metadata(&group),
            retrievers,
            group,
            windows,
            baseline,
            climatology,
            left_time_window_independent: self.options.left.data_type.is_time_window_independent(),
        })
    }
}

/// Check the pool shape against the value types and declared datasets.
fn check_shape<L: ValueKind, R: ValueKind>(options: &PoolingOptions, shape: ValueShape) -> Result<()> {
    if L::SHAPE != ValueShape::SingleValued {
        return Err(PoolError::Configuration(format!(
            "left values must be single-valued, not {}",
            L::SHAPE
        )));
    }
    if R::SHAPE != shape {
        return Err(PoolError::Configuration(format!(
            "cannot build {} pools from {} right values",
            shape,
            R::SHAPE
        )));
    }

    let expected = |role: &str, data_type: DataType| -> Result<()> {
        if data_type.shape() == shape {
            Ok(())
        } else {
            Err(PoolError::Configuration(format!(
                "cannot build {} pools when the {} data are {:?}",
                shape, role, data_type
            )))
        }
    };
    expected("right", options.right.data_type)?;
    if let Some(baseline) = &options.baseline {
        if baseline.generated.is_none() && !baseline.same_as_climatology {
            expected("baseline", baseline.dataset.data_type)?;
        }
    }
    Ok(())
}
