//! Pool suppliers.
//!
//! A [`PoolSupplier`] materializes the pool for one time window on demand:
//! it retrieves the left, right and baseline data, rescales them to the
//! desired time scale, pairs them, optionally cross-pairs main and baseline,
//! and assembles the result. Each invocation is independent, so an external
//! scheduler may run suppliers for different windows concurrently.
//!
//! An invocation moves through the stages of [`PoolStage`], logging every
//! transition. A failure in any stage ends in [`PoolStage::Failed`] and the
//! error is returned unchanged; nothing is retried here.

use chrono::Duration;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, trace, warn};

use crate::caching::CachingSupplier;
use crate::cross_pairing::CrossPairer;
use crate::error::{PoolError, Result};
use crate::feature::{Feature, FeatureGroup, FeatureLookup, FeatureTuple};
use crate::generators::BaselineGenerator;
use crate::pairing::Pairer;
use crate::pool::{BaselinePairs, PairsByFeature, Pool, PoolMetadata};
use crate::retrieval::{collect_series, Retriever};
use crate::scale::{duration_nanos, TimeScale};
use crate::series::{consolidate, Pair, TimeSeries};
use crate::status::{log_validation_events, ValidationEvent};
use crate::upscaling::Upscaler;
use crate::values::{ClimateMapper, Transformer};
use crate::window::TimeWindow;

/// Stage of one pool creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolStage {
    Idle,
    Retrieving,
    Rescaling,
    Pairing,
    CrossPairing,
    Assembling,
    Ready,
    Failed,
}

impl fmt::Display for PoolStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PoolStage::Idle => "idle",
            PoolStage::Retrieving => "retrieving",
            PoolStage::Rescaling => "rescaling",
            PoolStage::Pairing => "pairing",
            PoolStage::CrossPairing => "cross-pairing",
            PoolStage::Assembling => "assembling",
            PoolStage::Ready => "ready",
            PoolStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

struct StageTracker {
    current: PoolStage,
}

impl StageTracker {
    fn new() -> Self {
        Self {
            current: PoolStage::Idle,
        }
    }

    fn advance(&mut self, next: PoolStage) {
        debug!(from = %self.current, to = %next, "pool stage");
        self.current = next;
    }
}

/// Wiring shared by every supplier of one evaluation, built once by the
/// pool factory.
pub struct PoolComponents<L, R> {
    pub pairer: Pairer<L, R>,
    pub left_upscaler: Upscaler<L>,
    pub right_upscaler: Upscaler<R>,
    pub left_transformer: Option<Transformer<L>>,
    pub right_transformer: Option<Transformer<R>>,
    pub cross_pairer: Option<CrossPairer>,
    pub desired_time_scale: Option<TimeScale>,
    /// Spacing of pairs kept when both sides were upscaled. Defaults to the
    /// desired period.
    pub pair_frequency: Option<Duration>,
    pub left_offset: Duration,
    pub right_offset: Duration,
    pub baseline_offset: Duration,
}

/// Where the baseline of a pool comes from.
pub enum BaselineSource<R> {
    Retrieved(Retriever<R>),
    Generated(Arc<dyn BaselineGenerator<R>>),
}

impl<R> Clone for BaselineSource<R> {
    fn clone(&self) -> Self {
        match self {
            BaselineSource::Retrieved(r) => BaselineSource::Retrieved(Arc::clone(r)),
            BaselineSource::Generated(g) => BaselineSource::Generated(Arc::clone(g)),
        }
    }
}

/// Climatological values per left feature, computed once and shared by every
/// pool of a feature group.
pub struct Climatology<L> {
    retriever: Retriever<L>,
    mapper: ClimateMapper<L>,
    upscaler: Upscaler<L>,
    desired: Option<TimeScale>,
    offset: Duration,
    values: CachingSupplier<BTreeMap<Feature, Arc<[f64]>>>,
}

impl<L> Climatology<L>
where
    L: Clone + Send + Sync + 'static,
{
    /// # Arguments
    /// * `retriever` - Climatological series, typically a cached retriever
    /// * `mapper` - Maps each value to the doubles it contributes
    /// * `upscaler` - Rescales the series to `desired` before mapping
    /// * `desired` - Time scale of the pools, if declared
    pub fn new(retriever: Retriever<L>, mapper: ClimateMapper<L>, upscaler: Upscaler<L>, desired: Option<TimeScale>) -> Self {
        Self {
            retriever,
            mapper,
            upscaler,
            desired,
            offset: Duration::zero(),
            values: CachingSupplier::new(),
        }
    }

    /// Shift climatological valid times by `offset` before rescaling, as for
    /// the left data of every pool.
    pub fn with_time_offset(mut self, offset: Duration) -> Self {
        self.offset = offset;
        self
    }

    /// The climatological series themselves.
    pub fn retriever(&self) -> Retriever<L> {
        Arc::clone(&self.retriever)
    }

    /// Finite climatological values by feature, concatenated across series.
    pub fn values(&self) -> Result<Arc<BTreeMap<Feature, Arc<[f64]>>>> {
        self.values.get_or_try_init(|| {
            let mut by_feature: BTreeMap<Feature, Vec<f64>> = BTreeMap::new();
            for series in collect_series(&*self.retriever)? {
                let series = series.offset_valid_times(self.offset);
                let series = match &self.desired {
                    Some(desired) => {
                        let rescaled = self.upscaler.rescale(&series, desired, &BTreeSet::new())?;
                        log_validation_events(series.feature().as_str(), &rescaled.events);
                        rescaled.series
                    }
                    None => series,
                };
                let doubles = by_feature.entry(series.feature().clone()).or_default();
                for event in series.events() {
                    doubles.extend((self.mapper)(&event.value).into_iter().filter(|v| v.is_finite()));
                }
            }
            debug!(n_features = by_feature.len(), "computed climatology");
            Ok(by_feature
                .into_iter()
                .map(|(feature, values)| (feature, Arc::from(values)))
                .collect())
        })
    }
}

/// Everything a [`PoolSupplier`] needs, by name.
pub struct PoolSupplierConfig<L, R> {
    pub components: Arc<PoolComponents<L, R>>,
    /// Main metadata, including the time window.
    pub metadata: PoolMetadata,
    /// Required exactly when `baseline` is present.
    pub baseline_metadata: Option<PoolMetadata>,
    pub left: Retriever<L>,
    pub right: Retriever<R>,
    pub baseline: Option<BaselineSource<R>>,
    pub climatology: Option<Arc<Climatology<L>>>,
}

/// Left and right series of one feature tuple, at a common time scale.
struct ScaledPair<L, R> {
    tuple: FeatureTuple,
    left: TimeSeries<L>,
    right: TimeSeries<R>,
    both_upscaled: bool,
}

/// Creates the pool for one time window.
pub struct PoolSupplier<L, R> {
    components: Arc<PoolComponents<L, R>>,
    window: TimeWindow,
    lookup: FeatureLookup,
    metadata: PoolMetadata,
    baseline_metadata: Option<PoolMetadata>,
    left: Retriever<L>,
    right: Retriever<R>,
    baseline: Option<BaselineSource<R>>,
    climatology: Option<Arc<Climatology<L>>>,
}

impl<L, R> PoolSupplier<L, R>
where
    L: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// Create a supplier.
    ///
    /// # Errors
    /// Returns [`PoolError::Configuration`] when the metadata has no time
    /// window, or when baseline metadata and baseline source are not both
    /// present or both absent.
    pub fn new(config: PoolSupplierConfig<L, R>) -> Result<Self> {
        let window = config.metadata.time_window().copied().ok_or_else(|| {
            PoolError::Configuration("pool metadata must declare a time window".into())
        })?;

        match (&config.baseline, &config.baseline_metadata) {
            (Some(_), None) => {
                return Err(PoolError::Configuration(
                    "a baseline source requires baseline metadata".into(),
                ))
            }
            (None, Some(_)) => {
                return Err(PoolError::Configuration(
                    "baseline metadata was supplied without a baseline source".into(),
                ))
            }
            (Some(_), Some(metadata)) if !metadata.is_baseline() => {
                return Err(PoolError::Configuration(
                    "baseline metadata must be marked as baseline".into(),
                ))
            }
            _ => {}
        }

        let lookup = FeatureGroup::new(
            config.metadata.feature_group(),
            config.metadata.feature_tuples().to_vec(),
        )?
        .lookup();

        Ok(Self {
            components: config.components,
            window,
            lookup,
            metadata: config.metadata,
            baseline_metadata: config.baseline_metadata,
            left: config.left,
            right: config.right,
            baseline: config.baseline,
            climatology: config.climatology,
        })
    }

    pub fn time_window(&self) -> &TimeWindow {
        &self.window
    }

    pub fn metadata(&self) -> &PoolMetadata {
        &self.metadata
    }

    /// Create the pool.
    ///
    /// # Errors
    /// Rescaling, pairing and data-access errors are returned unchanged.
    /// Missing data is not an error: it yields empty entries in the pool.
    #[instrument(skip_all, fields(group = %self.metadata.feature_group(), window = %self.window))]
    pub fn get(&self) -> Result<Pool<L, R>> {
        let mut stage = StageTracker::new();
        match self.create_pool(&mut stage) {
            Ok(pool) => {
                stage.advance(PoolStage::Ready);
                info!(
                    n_pairs = pool.pair_count(),
                    n_baseline_pairs = pool.baseline_pair_count(),
                    "created pool"
                );
                Ok(pool)
            }
            Err(error) => {
                warn!(stage = %stage.current, %error, "failed to create pool");
                stage.advance(PoolStage::Failed);
                Err(error)
            }
        }
    }

    fn create_pool(&self, stage: &mut StageTracker) -> Result<Pool<L, R>> {
        let c = &*self.components;

        stage.advance(PoolStage::Retrieving);
        let mut right = offset_all(collect_series(&*self.right)?, c.right_offset);
        right.sort_by_key(|s| (s.metadata().anchor_time(), s.first_time()));
        let retrieved_baseline = match &self.baseline {
            Some(BaselineSource::Retrieved(retriever)) => {
                Some(offset_all(collect_series(&**retriever)?, c.baseline_offset))
            }
            _ => None,
        };
        let left = offset_all(collect_series(&*self.left)?, c.left_offset);
        let left = consolidate(self.snip_left(left, &right, retrieved_baseline.as_deref()));
        debug!(
            n_left = left.len(),
            n_right = right.len(),
            n_baseline = retrieved_baseline.as_ref().map_or(0, Vec::len),
            "retrieved series"
        );

        let time_scale = c.desired_time_scale.or_else(|| common_time_scale(&right));

        stage.advance(PoolStage::Rescaling);
        let mut main_events = Vec::new();
        let main_scaled = self.rescale_all(&left, &right, |f| self.lookup.tuple_for_right(f), &mut main_events)?;
        let mut baseline_events = Vec::new();
        let baseline_scaled = match retrieved_baseline {
            Some(baseline) => Some(self.rescale_all(
                &left,
                &baseline,
                |f| self.lookup.tuple_for_baseline(f),
                &mut baseline_events,
            )?),
            None => None,
        };

        stage.advance(PoolStage::Pairing);
        let mut main = self.pair_all(main_scaled)?;
        let mut baseline = match (baseline_scaled, &self.baseline) {
            (Some(scaled), _) => Some(self.pair_all(scaled)?),
            (None, Some(BaselineSource::Generated(generator))) => {
                let generated = self.generate_baseline(&main, generator.as_ref())?;
                let scaled = self.rescale_all(
                    &left,
                    &generated,
                    |f| self.lookup.tuple_for_baseline(f),
                    &mut baseline_events,
                )?;
                Some(self.pair_all(scaled)?)
            }
            (None, _) => None,
        };

        if let (Some(cross_pairer), Some(baseline_pairs)) = (&c.cross_pairer, baseline.as_mut()) {
            stage.advance(PoolStage::CrossPairing);
            cross_pair(cross_pairer, &mut main, baseline_pairs);
        }

        stage.advance(PoolStage::Assembling);
        let climatology = match &self.climatology {
            Some(climatology) => {
                let values = climatology.values()?;
                Some(
                    self.metadata
                        .feature_tuples()
                        .iter()
                        .map(|tuple| {
                            let vector = values
                                .get(&tuple.left)
                                .cloned()
                                .unwrap_or_else(|| Arc::from(Vec::new()));
                            (tuple.clone(), vector)
                        })
                        .collect(),
                )
            }
            None => None,
        };

        let metadata = self
            .metadata
            .clone()
            .with_time_scale(time_scale)
            .with_validation_events(main_events);
        let baseline = match (baseline, &self.baseline_metadata) {
            (Some(pairs), Some(baseline_metadata)) => Some(BaselinePairs {
                metadata: baseline_metadata
                    .clone()
                    .with_time_window(self.window)
                    .with_time_scale(time_scale)
                    .with_validation_events(baseline_events),
                pairs,
            }),
            _ => None,
        };

        Pool::assemble(metadata, main, baseline, climatology)
    }

    /// Snip left series to the span of the right and baseline series, widened
    /// by one desired period so that the first interval can be aggregated.
    fn snip_left(
        &self,
        left: Vec<TimeSeries<L>>,
        right: &[TimeSeries<R>],
        baseline: Option<&[TimeSeries<R>]>,
    ) -> Vec<TimeSeries<L>> {
        let others = right.iter().chain(baseline.unwrap_or_default());
        let lower = others.clone().filter_map(TimeSeries::first_time).min();
        let upper = others.filter_map(TimeSeries::last_time).max();
        let (Some(lower), Some(upper)) = (lower, upper) else {
            return left.into_iter().map(|s| s.filter(|_| false)).collect();
        };
        let lower = lower - self.buffer();
        left.into_iter()
            .map(|s| s.filter(|e| e.time >= lower && e.time <= upper))
            .collect()
    }

    fn buffer(&self) -> Duration {
        self.components
            .desired_time_scale
            .map_or_else(Duration::zero, |scale| scale.period())
    }

    /// Rescale every right-hand series together with the left series of its
    /// feature tuple.
    fn rescale_all<'a>(
        &'a self,
        left: &[TimeSeries<L>],
        right: &[TimeSeries<R>],
        tuple_for: impl Fn(&Feature) -> Option<&'a FeatureTuple>,
        events: &mut Vec<ValidationEvent>,
    ) -> Result<Vec<ScaledPair<L, R>>> {
        let mut scaled = Vec::new();
        for right_series in right {
            let Some(tuple) = tuple_for(right_series.feature()) else {
                debug!(feature = %right_series.feature(), "no feature tuple declared, skipping series");
                continue;
            };
            let mut matched = false;
            for left_series in left.iter().filter(|s| *s.feature() == tuple.left) {
                matched = true;
                if let Some(pair) = self.rescale_pair(tuple, left_series, right_series, events)? {
                    scaled.push(pair);
                }
            }
            if !matched {
                trace!(feature = %right_series.feature(), left = %tuple.left, "no left data, zero pairs");
            }
        }
        Ok(scaled)
    }

    fn rescale_pair(
        &self,
        tuple: &FeatureTuple,
        left: &TimeSeries<L>,
        right: &TimeSeries<R>,
        events: &mut Vec<ValidationEvent>,
    ) -> Result<Option<ScaledPair<L, R>>> {
        let c = &*self.components;
        let left = left.snip_to_span_of(right, self.buffer());

        let (left, right, both_upscaled) = match &c.desired_time_scale {
            None => (left, right.clone(), false),
            Some(desired) => {
                let scaled_left = c.left_upscaler.rescale(&left, desired, &right.valid_times())?;
                log_validation_events(left.feature().as_str(), &scaled_left.events);
                events.extend(scaled_left.events);
                if scaled_left.series.is_empty() {
                    trace!(feature = %right.feature(), "no left data after rescaling, zero pairs");
                    return Ok(None);
                }

                let scaled_right = c
                    .right_upscaler
                    .rescale(right, desired, &scaled_left.series.valid_times())?;
                log_validation_events(right.feature().as_str(), &scaled_right.events);
                events.extend(scaled_right.events);

                (
                    scaled_left.series,
                    scaled_right.series,
                    scaled_left.upscaled && scaled_right.upscaled,
                )
            }
        };

        let left = match &c.left_transformer {
            Some(transform) => left.map_values(|v| transform(v)),
            None => left,
        };
        let right = match &c.right_transformer {
            Some(transform) => right.map_values(|v| transform(v)),
            None => right,
        };

        Ok(Some(ScaledPair {
            tuple: tuple.clone(),
            left,
            right,
            both_upscaled,
        }))
    }

    fn pair_all(&self, scaled: Vec<ScaledPair<L, R>>) -> Result<PairsByFeature<L, R>> {
        let c = &*self.components;
        let mut pairs = PairsByFeature::new();
        for ScaledPair {
            tuple,
            left,
            right,
            both_upscaled,
        } in scaled
        {
            let mut paired = c.pairer.pair(&left, &right)?;
            if both_upscaled {
                if let Some(frequency) = self.pair_frequency() {
                    paired = thin_to_frequency(paired, frequency);
                }
            }
            let paired = paired.snip_to_window(&self.window);
            if paired.is_empty() {
                trace!(feature = %right.feature(), "zero pairs");
                continue;
            }
            pairs.entry(tuple).or_insert_with(Vec::new).push(paired);
        }
        Ok(pairs)
    }

    fn pair_frequency(&self) -> Option<Duration> {
        let c = &*self.components;
        c.pair_frequency
            .or_else(|| c.desired_time_scale.map(|scale| scale.period()))
    }

    /// Generate one baseline series per main pair series, using the right
    /// values as the template.
    fn generate_baseline(
        &self,
        main: &PairsByFeature<L, R>,
        generator: &dyn BaselineGenerator<R>,
    ) -> Result<Vec<TimeSeries<R>>> {
        let mut generated = Vec::new();
        for series in main.values().flatten() {
            let template = series.map_values(|pair| pair.right.clone());
            let baseline = generator.generate(&template)?;
            if baseline.is_empty() {
                trace!(feature = %template.feature(), "generated an empty baseline");
            }
            generated.push(baseline);
        }
        Ok(generated)
    }
}

fn offset_all<T>(series: Vec<TimeSeries<T>>, offset: Duration) -> Vec<TimeSeries<T>> {
    if offset.is_zero() {
        return series;
    }
    series.into_iter().map(|s| s.offset_valid_times(offset)).collect()
}

/// The time scale shared by every series, if they agree.
fn common_time_scale<T>(series: &[TimeSeries<T>]) -> Option<TimeScale> {
    let scales: BTreeSet<Option<TimeScale>> = series.iter().map(|s| s.time_scale().copied()).collect();
    match scales.into_iter().collect::<Vec<_>>().as_slice() {
        [Some(scale)] => Some(*scale),
        _ => None,
    }
}

/// Keep pairs spaced `frequency` apart, anchored at the issue time, or at the
/// first pair when there is none.
fn thin_to_frequency<T>(series: TimeSeries<T>, frequency: Duration) -> TimeSeries<T> {
    let step = duration_nanos(frequency);
    let Some(anchor) = series.metadata().anchor_time().or_else(|| series.first_time()) else {
        return series;
    };
    if step <= 0 {
        return series;
    }
    series.filter(|e| duration_nanos(e.time - anchor) % step == 0)
}

/// Cross-pair main and baseline per feature tuple.
fn cross_pair<L: Clone, R: Clone>(
    cross_pairer: &CrossPairer,
    main: &mut PairsByFeature<L, R>,
    baseline: &mut PairsByFeature<L, R>,
) {
    let tuples: BTreeSet<FeatureTuple> = main.keys().chain(baseline.keys()).cloned().collect();
    for tuple in tuples {
        let main_series = main.remove(&tuple).unwrap_or_default();
        let baseline_series = baseline.remove(&tuple).unwrap_or_default();
        let crossed = cross_pairer.cross(main_series, baseline_series);
        let keep = |series: Vec<TimeSeries<Pair<L, R>>>| -> Vec<TimeSeries<Pair<L, R>>> {
            series.into_iter().filter(|s| !s.is_empty()).collect()
        };
        let crossed_main = keep(crossed.main);
        let crossed_baseline = keep(crossed.baseline);
        if !crossed_main.is_empty() {
            main.insert(tuple.clone(), crossed_main);
        }
        if !crossed_baseline.is_empty() {
            baseline.insert(tuple, crossed_baseline);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cross_pairing::CrossPairMethod;
    use crate::error::ErrorKind;
    use crate::pairing::PairingMode;
    use crate::retrieval::{replay, SeriesStream};
    use crate::scale::TimeScaleFunction;
    use crate::series::{Event, TimeSeriesMetadata};
    use crate::status::{EvaluationStage, StatusLevel};
    use crate::values::default_climate_mapper;
    use crate::window::ReferenceTimeType;
    use approx::assert_relative_eq;
    use chrono::{DateTime, TimeZone, Utc};

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, hour, 0, 0).unwrap()
    }

    fn three_hour_mean() -> TimeScale {
        TimeScale::new(Duration::hours(3), TimeScaleFunction::Mean).unwrap()
    }

    fn tuple() -> FeatureTuple {
        FeatureTuple::new("DRRC2", "DRRC2_FC").with_baseline("DRRC2_BASE")
    }

    fn components(desired: Option<TimeScale>, cross_pairer: Option<CrossPairer>) -> Arc<PoolComponents<f64, f64>> {
        Arc::new(PoolComponents {
            pairer: Pairer::with_default_admissibility(PairingMode::Auto),
            left_upscaler: Upscaler::with_default_aggregator(false),
            right_upscaler: Upscaler::with_default_aggregator(false),
            left_transformer: None,
            right_transformer: None,
            cross_pairer,
            desired_time_scale: desired,
            pair_frequency: None,
            left_offset: Duration::zero(),
            right_offset: Duration::zero(),
            baseline_offset: Duration::zero(),
        })
    }

    fn observations() -> TimeSeries<f64> {
        let metadata = TimeSeriesMetadata::new("DRRC2", "QINE", "CMS").with_time_scale(TimeScale::instantaneous());
        let events = (1..=6).map(|h| Event::new(t(h), h as f64)).collect();
        TimeSeries::new(metadata, events).unwrap()
    }

    fn forecast(feature: &str, values: &[(u32, f64)]) -> TimeSeries<f64> {
        let metadata = TimeSeriesMetadata::new(feature, "QINE", "CMS")
            .with_time_scale(three_hour_mean())
            .with_reference_time(ReferenceTimeType::IssueTime, t(0));
        let events = values.iter().map(|(h, v)| Event::new(t(*h), *v)).collect();
        TimeSeries::new(metadata, events).unwrap()
    }

    fn config(
        components: Arc<PoolComponents<f64, f64>>,
        right: Vec<TimeSeries<f64>>,
        baseline: Option<BaselineSource<f64>>,
    ) -> PoolSupplierConfig<f64, f64> {
        let window = TimeWindow::of_valid_times(t(0), t(6)).unwrap();
        let metadata = PoolMetadata::basic("DRRC2", vec![tuple()], None, false).with_time_window(window);
        let baseline_metadata = baseline
            .as_ref()
            .map(|_| PoolMetadata::basic("DRRC2", vec![tuple()], None, true));
        PoolSupplierConfig {
            components,
            metadata,
            baseline_metadata,
            left: replay(vec![observations()]),
            right: replay(right),
            baseline,
            climatology: None,
        }
    }

    #[test]
    fn test_upscales_and_pairs() {
        let right = vec![forecast("DRRC2_FC", &[(3, 2.5), (6, 4.5)])];
        let supplier = PoolSupplier::new(config(components(Some(three_hour_mean()), None), right, None)).unwrap();
        let pool = supplier.get().unwrap();

        let pairs = pool.main_pairs(&tuple()).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].len(), 2);
        assert_relative_eq!(pairs[0].events()[0].value.left, 2.0);
        assert_relative_eq!(pairs[0].events()[1].value.left, 5.0);
        assert_relative_eq!(pairs[0].events()[1].value.right, 4.5);
        assert_eq!(pool.metadata().time_scale(), Some(&three_hour_mean()));
        assert_eq!(pool.metadata().time_window(), Some(supplier.time_window()));
    }

    #[test]
    fn test_left_without_time_scale_pairs_at_native_scale() {
        let unscaled = TimeSeries::new(
            TimeSeriesMetadata::new("DRRC2", "QINE", "CMS"),
            (1..=6).map(|h| Event::new(t(h), h as f64)).collect(),
        )
        .unwrap();
        let mut cfg = config(
            components(Some(three_hour_mean()), None),
            vec![forecast("DRRC2_FC", &[(3, 2.5), (6, 4.5)])],
            None,
        );
        cfg.left = replay(vec![unscaled]);
        let pool = PoolSupplier::new(cfg).unwrap().get().unwrap();

        let pairs = pool.main_pairs(&tuple()).unwrap();
        assert_eq!(pairs[0].len(), 2);
        assert_relative_eq!(pairs[0].events()[0].value.left, 3.0);
        assert_relative_eq!(pairs[0].events()[1].value.left, 6.0);
        assert!(pool
            .metadata()
            .validation_events()
            .iter()
            .any(|e| e.level == StatusLevel::Warn && e.stage == EvaluationStage::Rescaling));
    }

    #[test]
    fn test_climatology_applies_left_offset() {
        let climatology = |offset: Duration| {
            Climatology::new(
                replay(vec![observations()]),
                default_climate_mapper(),
                Upscaler::with_default_aggregator(false),
                Some(three_hour_mean()),
            )
            .with_time_offset(offset)
        };
        let shifted = climatology(Duration::hours(1)).values().unwrap();
        let values = &shifted[&Feature::new("DRRC2")];
        assert_eq!(values.len(), 2);
        assert_relative_eq!(values[0], 2.0);
        assert_relative_eq!(values[1], 5.0);
        assert_eq!(shifted, climatology(Duration::zero()).values().unwrap());

        let unscaled = TimeSeries::new(
            TimeSeriesMetadata::new("DRRC2", "QINE", "CMS"),
            vec![Event::new(t(1), 1.0), Event::new(t(2), f64::NAN)],
        )
        .unwrap();
        let raw = Climatology::new(
            replay(vec![unscaled]),
            default_climate_mapper(),
            Upscaler::with_default_aggregator(false),
            Some(three_hour_mean()),
        )
        .with_time_offset(Duration::hours(1))
        .values()
        .unwrap();
        assert_eq!(&*raw[&Feature::new("DRRC2")], &[1.0]);
    }

    #[test]
    fn test_no_right_data_yields_empty_entry() {
        let supplier = PoolSupplier::new(config(components(Some(three_hour_mean()), None), Vec::new(), None)).unwrap();
        let pool = supplier.get().unwrap();
        assert_eq!(pool.main_pairs(&tuple()).unwrap().len(), 0);
        assert_eq!(pool.pair_count(), 0);
    }

    #[test]
    fn test_retrieved_baseline_is_cross_paired() {
        let right = vec![forecast("DRRC2_FC", &[(3, 2.5), (6, 4.5)])];
        let baseline = vec![forecast("DRRC2_BASE", &[(3, 1.0)])];
        let supplier = PoolSupplier::new(config(
            components(Some(three_hour_mean()), Some(CrossPairer::new(CrossPairMethod::Exact, None).unwrap())),
            right,
            Some(BaselineSource::Retrieved(replay(baseline))),
        ))
        .unwrap();
        let pool = supplier.get().unwrap();

        assert_eq!(pool.pair_count(), 1);
        assert_eq!(pool.baseline_pair_count(), 1);
        assert!(pool.baseline_metadata().unwrap().is_baseline());
    }

    #[test]
    fn test_rescaling_error_is_surfaced() {
        let hourly = TimeScale::new(Duration::hours(1), TimeScaleFunction::Mean).unwrap();
        let right = vec![forecast("DRRC2_FC", &[(3, 2.5)])];
        let supplier = PoolSupplier::new(config(components(Some(hourly), None), right, None)).unwrap();
        let error = supplier.get().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Rescaling);
    }

    #[test]
    fn test_data_access_error_is_surfaced() {
        let mut cfg = config(components(None, None), Vec::new(), None);
        cfg.right = Arc::new(|| -> Result<SeriesStream<f64>> {
            Err(PoolError::data_access("reading right data", "connection refused"))
        });
        let error = PoolSupplier::new(cfg).unwrap().get().unwrap_err();
        assert!(error.is_retryable());
    }

    #[test]
    fn test_baseline_metadata_must_match_source() {
        let mut cfg = config(components(None, None), Vec::new(), None);
        cfg.baseline = Some(BaselineSource::Retrieved(replay(Vec::new())));
        assert!(matches!(
            PoolSupplier::new(cfg),
            Err(PoolError::Configuration(_))
        ));
    }

    #[test]
    fn test_supplier_is_send_sync() {
        fn check<T: Send + Sync>() {}
        check::<PoolSupplier<f64, f64>>();
        check::<PoolSupplier<f64, crate::values::Ensemble>>();
    }

    #[test]
    fn test_thin_to_frequency() {
        let series = forecast("A", &[(1, 1.0), (2, 2.0), (3, 3.0), (6, 6.0)]);
        let thinned = thin_to_frequency(series, Duration::hours(3));
        assert_eq!(thinned.valid_times(), [t(3), t(6)].into_iter().collect());
    }

    #[test]
    fn test_common_time_scale() {
        let a = forecast("A", &[(3, 1.0)]);
        assert_eq!(common_time_scale(&[a.clone(), a.clone()]), Some(three_hour_mean()));
        let b = observations();
        assert_eq!(common_time_scale(&[a, b]), None);
        assert_eq!(common_time_scale::<f64>(&[]), None);
    }
}
