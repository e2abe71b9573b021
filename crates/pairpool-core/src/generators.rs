//! Generated baselines.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, instrument};

use crate::caching::CachingSupplier;
use crate::error::{PoolError, Result};
use crate::feature::{Feature, FeatureLookup};
use crate::retrieval::{collect_series, Retriever};
use crate::scale::TimeScale;
use crate::series::{consolidate, Event, TimeSeries};
use crate::status::log_validation_events;
use crate::upscaling::Upscaler;
use crate::values::Admissibility;

/// Derives a baseline series shaped like a template series.
pub trait BaselineGenerator<R>: Send + Sync {
    /// Generate the baseline for one right-hand template.
    ///
    /// The result carries the template's time scale and reference times and
    /// the baseline feature that corresponds to the template's feature.
    fn generate(&self, template: &TimeSeries<R>) -> Result<TimeSeries<R>>;
}

/// Persistence baseline: the value observed `order` steps before the
/// forecast is issued, persisted across every valid time of the template.
///
/// For templates without an issue time each valid time receives the value
/// observed `order` steps before it.
pub struct PersistenceGenerator<R> {
    order: usize,
    source: Retriever<R>,
    sources: CachingSupplier<BTreeMap<Feature, TimeSeries<R>>>,
    lookup: FeatureLookup,
    admissible: Admissibility<R>,
    upscaler: Option<Upscaler<R>>,
}

impl<R> PersistenceGenerator<R>
where
    R: Clone + Send + Sync + 'static,
{
    /// Create a persistence generator.
    ///
    /// # Arguments
    /// * `order` - Number of source values to look back, at least 1
    /// * `source` - Source data for every baseline feature, retrieved lazily once
    /// * `lookup` - Maps template (right) features to baseline features
    /// * `admissible` - Inadmissible persisted values yield no baseline value
    /// * `upscaler` - Rescales source data to the template scale when they differ
    ///
    /// # Errors
    /// Returns [`PoolError::InvalidParameter`] when `order` is zero.
    pub fn new(
        order: usize,
        source: Retriever<R>,
        lookup: FeatureLookup,
        admissible: Admissibility<R>,
        upscaler: Option<Upscaler<R>>,
    ) -> Result<Self> {
        if order == 0 {
            return Err(PoolError::InvalidParameter {
                param: "order".into(),
                value: order.to_string(),
                reason: "the persistence order must be at least 1".into(),
            });
        }
        Ok(Self {
            order,
            source,
            sources: CachingSupplier::new(),
            lookup,
            admissible,
            upscaler,
        })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    fn source_for(&self, feature: &Feature) -> Result<Option<TimeSeries<R>>> {
        let sources = self.sources.get_or_try_init(|| {
            let series = consolidate(collect_series(&*self.source)?);
            let mut by_feature = BTreeMap::new();
            for s in series {
                if s.metadata().is_forecast() {
                    continue;
                }
                by_feature.entry(s.feature().clone()).or_insert(s);
            }
            debug!(n_features = by_feature.len(), "loaded persistence sources");
            Ok(by_feature)
        })?;
        Ok(sources.get(feature).cloned())
    }

    /// The upscaler and target scale when the source must be rescaled to
    /// the template scale.
    fn upscaling(&self, source: &TimeSeries<R>, template: &TimeSeries<R>) -> Option<(&Upscaler<R>, TimeScale)> {
        let upscaler = self.upscaler.as_ref()?;
        let desired = *template.time_scale()?;
        let Some(existing) = source.time_scale() else {
            debug!(feature = %source.feature(), "persistence source declares no time scale, persisting native values");
            return None;
        };
        let same = *existing == desired || (existing.is_instantaneous() && desired.is_instantaneous());
        (!same).then_some((upscaler, desired))
    }

    fn persisted<'a>(&self, source: &'a TimeSeries<R>, before: DateTime<Utc>) -> Option<&'a R> {
        let count = source.count_before(before);
        let index = count.checked_sub(self.order)?;
        let value = &source.events()[index].value;
        (self.admissible)(value).then_some(value)
    }

    /// Persist source values at their native scale.
    fn persist_native(&self, source: &TimeSeries<R>, template: &TimeSeries<R>) -> Vec<Event<R>> {
        match template.metadata().anchor_time() {
            Some(anchor) => match self.persisted(source, anchor) {
                Some(value) => template
                    .events()
                    .iter()
                    .map(|e| Event::new(e.time, value.clone()))
                    .collect(),
                None => Vec::new(),
            },
            None => template
                .events()
                .iter()
                .filter_map(|e| {
                    self.persisted(source, e.time)
                        .map(|value| Event::new(e.time, value.clone()))
                })
                .collect(),
        }
    }

    /// Persist source values upscaled to the template scale.
    ///
    /// With an anchor, the aggregate ends at the source time `order` steps
    /// before the anchor. Without one, aggregates end at the template's valid
    /// times and each valid time receives the aggregate `order` steps before
    /// it. Only the slice of the source covering those aggregates is upscaled.
    fn persist_upscaled(
        &self,
        source: &TimeSeries<R>,
        template: &TimeSeries<R>,
        upscaler: &Upscaler<R>,
        desired: TimeScale,
    ) -> Result<Vec<Event<R>>> {
        let period = desired.period();
        match template.metadata().anchor_time() {
            Some(anchor) => {
                let Some(index) = source.count_before(anchor).checked_sub(self.order) else {
                    return Ok(Vec::new());
                };
                let end = source.events()[index].time;
                let slice = source.slice_valid_times(end - period, end);
                let rescaled = upscaler.upscale(&slice, &desired, &BTreeSet::from([end]))?;
                log_validation_events(source.feature().as_str(), &rescaled.events);

                Ok(match rescaled.series.events().first() {
                    Some(persisted) if (self.admissible)(&persisted.value) => template
                        .events()
                        .iter()
                        .map(|e| Event::new(e.time, persisted.value.clone()))
                        .collect(),
                    _ => Vec::new(),
                })
            }
            None => {
                let (Some(first), Some(last)) = (template.first_time(), template.last_time()) else {
                    return Ok(Vec::new());
                };
                let slice = source.slice_valid_times(first - period, last);
                let rescaled = upscaler.upscale(&slice, &desired, &template.valid_times())?;
                log_validation_events(source.feature().as_str(), &rescaled.events);

                Ok(template
                    .events()
                    .iter()
                    .filter_map(|e| {
                        self.persisted(&rescaled.series, e.time)
                            .map(|value| Event::new(e.time, value.clone()))
                    })
                    .collect())
            }
        }
    }
}

impl<R> BaselineGenerator<R> for PersistenceGenerator<R>
where
    R: Clone + Send + Sync + 'static,
{
    #[instrument(skip_all, fields(feature = %template.feature(), order = self.order))]
    fn generate(&self, template: &TimeSeries<R>) -> Result<TimeSeries<R>> {
        let baseline_feature = self
            .lookup
            .baseline_for_right(template.feature())
            .cloned()
            .ok_or_else(|| {
                PoolError::Generation(format!(
                    "no baseline feature is declared for right feature '{}'",
                    template.feature()
                ))
            })?;
        let metadata = template.metadata().clone().with_feature(baseline_feature.clone());

        let Some(source) = self.source_for(&baseline_feature)? else {
            debug!(baseline = %baseline_feature, "no source data for persistence");
            return Ok(TimeSeries::empty(metadata));
        };

        let events = match self.upscaling(&source, template) {
            Some((upscaler, desired)) => self.persist_upscaled(&source, template, upscaler, desired)?,
            None => self.persist_native(&source, template),
        };

        TimeSeries::new(metadata, events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{FeatureGroup, FeatureTuple};
    use crate::retrieval::replay;
    use crate::scale::{TimeScale, TimeScaleFunction};
    use crate::series::TimeSeriesMetadata;
    use crate::values::default_admissibility;
    use crate::window::ReferenceTimeType;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, hour, 0, 0).unwrap()
    }

    fn hourly() -> TimeScale {
        TimeScale::new(Duration::hours(1), TimeScaleFunction::Mean).unwrap()
    }

    fn observations(values: &[(u32, f64)]) -> TimeSeries<f64> {
        let metadata = TimeSeriesMetadata::new("DRRC2", "QINE", "CMS").with_time_scale(hourly());
        let events = values.iter().map(|(h, v)| Event::new(t(*h), *v)).collect();
        TimeSeries::new(metadata, events).unwrap()
    }

    fn generator(order: usize, source: Vec<TimeSeries<f64>>) -> PersistenceGenerator<f64> {
        let group = FeatureGroup::of(FeatureTuple::new("DRRC2", "DRRC2_FC").with_baseline("DRRC2"));
        PersistenceGenerator::new(order, replay(source), group.lookup(), default_admissibility(), None)
            .unwrap()
    }

    fn forecast_template(issued: u32, hours: &[u32]) -> TimeSeries<f64> {
        let metadata = TimeSeriesMetadata::new("DRRC2_FC", "QINE", "CMS")
            .with_time_scale(hourly())
            .with_reference_time(ReferenceTimeType::IssueTime, t(issued));
        let events = hours.iter().map(|h| Event::new(t(*h), 0.0)).collect();
        TimeSeries::new(metadata, events).unwrap()
    }

    #[test]
    fn test_persists_last_value_before_issue_time() {
        let source = observations(&[(1, 10.0), (2, 20.0), (3, 30.0), (4, 40.0)]);
        let generated = generator(1, vec![source]).generate(&forecast_template(3, &[4, 5, 6])).unwrap();

        assert_eq!(generated.feature().as_str(), "DRRC2");
        assert_eq!(generated.metadata().issue_time(), Some(t(3)));
        let values: Vec<f64> = generated.events().iter().map(|e| e.value).collect();
        assert_eq!(values, vec![20.0, 20.0, 20.0]);
    }

    #[test]
    fn test_higher_order() {
        let source = observations(&[(1, 10.0), (2, 20.0), (3, 30.0)]);
        let generated = generator(2, vec![source.clone()]).generate(&forecast_template(3, &[4])).unwrap();
        assert_eq!(generated.events()[0].value, 10.0);

        let generated = generator(3, vec![source]).generate(&forecast_template(3, &[4])).unwrap();
        assert!(generated.is_empty());
    }

    #[test]
    fn test_per_valid_time_without_issue_time() {
        let source = observations(&[(1, 10.0), (2, 20.0), (3, 30.0)]);
        let metadata = TimeSeriesMetadata::new("DRRC2_FC", "QINE", "CMS").with_time_scale(hourly());
        let template = TimeSeries::new(
            metadata,
            vec![Event::new(t(1), 0.0), Event::new(t(2), 0.0), Event::new(t(4), 0.0)],
        )
        .unwrap();

        let generated = generator(1, vec![source]).generate(&template).unwrap();
        assert_eq!(generated.valid_times(), [t(2), t(4)].into_iter().collect());
        let values: Vec<f64> = generated.events().iter().map(|e| e.value).collect();
        assert_eq!(values, vec![10.0, 30.0]);
    }

    #[test]
    fn test_inadmissible_value_yields_empty_series() {
        let source = observations(&[(1, 10.0), (2, f64::NAN)]);
        let generated = generator(1, vec![source]).generate(&forecast_template(3, &[4, 5])).unwrap();
        assert!(generated.is_empty());
    }

    #[test]
    fn test_source_is_rescaled_to_template() {
        let instantaneous = TimeSeriesMetadata::new("DRRC2", "QINE", "CMS").with_time_scale(TimeScale::instantaneous());
        let events = (1..=6).map(|h| Event::new(t(h), h as f64)).collect();
        let source = TimeSeries::new(instantaneous, events).unwrap();
        let group = FeatureGroup::of(FeatureTuple::new("DRRC2", "DRRC2_FC").with_baseline("DRRC2"));
        let generator = PersistenceGenerator::new(
            1,
            replay(vec![source]),
            group.lookup(),
            default_admissibility(),
            Some(Upscaler::with_default_aggregator(false)),
        )
        .unwrap();

        let three_hourly = TimeScale::new(Duration::hours(3), TimeScaleFunction::Mean).unwrap();
        let template = TimeSeries::new(
            TimeSeriesMetadata::new("DRRC2_FC", "QINE", "CMS")
                .with_time_scale(three_hourly)
                .with_reference_time(ReferenceTimeType::IssueTime, t(6)),
            vec![Event::new(t(9), 0.0)],
        )
        .unwrap();

        let generated = generator.generate(&template).unwrap();
        // The last source value before the issue time is at 05Z; its 3h mean covers 03Z to 05Z
        assert_eq!(generated.events()[0].value, 4.0);
    }

    #[test]
    fn test_upscaled_persistence_follows_template_valid_times() {
        let instantaneous = TimeSeriesMetadata::new("DRRC2", "QINE", "CMS").with_time_scale(TimeScale::instantaneous());
        let events = (1..=7).map(|h| Event::new(t(h), h as f64)).collect();
        let source = TimeSeries::new(instantaneous, events).unwrap();
        let group = FeatureGroup::of(FeatureTuple::new("DRRC2", "DRRC2_FC").with_baseline("DRRC2"));
        let generator = PersistenceGenerator::new(
            1,
            replay(vec![source]),
            group.lookup(),
            default_admissibility(),
            Some(Upscaler::with_default_aggregator(false)),
        )
        .unwrap();

        // Aggregates end at 04Z and 07Z, not on a grid derived from the source's first value
        let three_hourly = TimeScale::new(Duration::hours(3), TimeScaleFunction::Mean).unwrap();
        let template = TimeSeries::new(
            TimeSeriesMetadata::new("DRRC2_FC", "QINE", "CMS").with_time_scale(three_hourly),
            vec![Event::new(t(4), 0.0), Event::new(t(7), 0.0)],
        )
        .unwrap();

        let generated = generator.generate(&template).unwrap();
        assert_eq!(generated.valid_times(), [t(7)].into_iter().collect());
        assert_eq!(generated.events()[0].value, 3.0);
        assert_eq!(generated.time_scale(), Some(&three_hourly));
    }

    #[test]
    fn test_undeclared_baseline_feature_fails() {
        let template = TimeSeries::new(
            TimeSeriesMetadata::new("OTHER", "QINE", "CMS"),
            vec![Event::new(t(1), 0.0)],
        )
        .unwrap();
        let result = generator(1, Vec::new()).generate(&template);
        assert!(matches!(result, Err(PoolError::Generation(_))));
    }

    #[test]
    fn test_zero_order_is_rejected() {
        let group = FeatureGroup::of(FeatureTuple::new("A", "B").with_baseline("A"));
        let result = PersistenceGenerator::<f64>::new(0, replay(Vec::new()), group.lookup(), default_admissibility(), None);
        assert!(result.is_err());
    }
}
