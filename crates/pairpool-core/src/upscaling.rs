//! Upscaling of time series to a coarser time scale.
//!
//! Values are aggregated over right-closed intervals `(end - period, end]`
//! ending at requested end times. Illegal requests fail fast. Intervals that
//! cannot be aggregated faithfully are reported as validation events.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use tracing::trace;

use crate::error::{RescalingError, Result};
use crate::scale::{validate_rescaling, TimeScale, TimeScaleFunction};
use crate::series::{Event, TimeSeries};
use crate::status::{EvaluationStage, ValidationEvent};
use crate::values::{default_aggregator, Aggregator, ValueKind};

/// A rescaled series and the anomalies raised while producing it.
#[derive(Debug, Clone)]
pub struct RescaledSeries<T> {
    pub series: TimeSeries<T>,
    pub events: Vec<ValidationEvent>,
    /// Whether values were aggregated, as opposed to passed through or relabelled.
    pub upscaled: bool,
}

impl<T> RescaledSeries<T> {
    fn unchanged(series: TimeSeries<T>) -> Self {
        Self {
            series,
            events: Vec::new(),
            upscaled: false,
        }
    }
}

/// Aggregates series to a desired time scale.
pub struct Upscaler<T> {
    aggregator: Aggregator<T>,
    lenient: bool,
}

impl<T> Clone for Upscaler<T> {
    fn clone(&self) -> Self {
        Self {
            aggregator: self.aggregator.clone(),
            lenient: self.lenient,
        }
    }
}

impl<T: ValueKind> Upscaler<T> {
    /// An upscaler using the default aggregation of the value kind.
    pub fn with_default_aggregator(lenient: bool) -> Self {
        Self::new(default_aggregator(), lenient)
    }
}

impl<T: Clone> Upscaler<T> {
    /// Create an upscaler.
    ///
    /// # Arguments
    /// * `aggregator` - Aggregates the values of one interval
    /// * `lenient` - Aggregate intervals with too few or unevenly spaced values
    ///   instead of skipping them
    pub fn new(aggregator: Aggregator<T>, lenient: bool) -> Self {
        Self { aggregator, lenient }
    }

    pub fn is_lenient(&self) -> bool {
        self.lenient
    }

    /// Upscale `series` to `desired` when it declares a time scale.
    ///
    /// A series without a time scale passes through at its native scale with
    /// a validation event: a warning, or informational when `desired` is
    /// instantaneous.
    ///
    /// # Errors
    /// As [`Upscaler::upscale`], except for the missing existing scale.
    pub fn rescale(
        &self,
        series: &TimeSeries<T>,
        desired: &TimeScale,
        end_times: &BTreeSet<DateTime<Utc>>,
    ) -> Result<RescaledSeries<T>> {
        if series.time_scale().is_some()
            || series.is_empty()
            || desired.function() == TimeScaleFunction::Unknown
        {
            return self.upscale(series, desired, end_times);
        }

        let message = format!(
            "feature '{}' declares no time scale, so it was used at its native scale instead of {}",
            series.feature(),
            desired
        );
        let event = if desired.is_instantaneous() {
            ValidationEvent::info(EvaluationStage::Rescaling, message)
        } else {
            ValidationEvent::warn(EvaluationStage::Rescaling, message)
        };
        let mut unchanged = RescaledSeries::unchanged(series.clone());
        unchanged.events.push(event);
        Ok(unchanged)
    }

    /// Upscale `series` to `desired`, producing one value per end time.
    ///
    /// # Arguments
    /// * `series` - Series to upscale; must declare its time scale
    /// * `desired` - Target time scale
    /// * `end_times` - Valid times at which to form aggregates. When empty,
    ///   end times are derived from the series, one period apart.
    ///
    /// # Returns
    /// The upscaled series, labelled with the desired scale, and any
    /// validation events raised. The series passes through unchanged when it
    /// is already at the desired scale or both scales are instantaneous.
    ///
    /// # Errors
    /// Returns [`crate::error::PoolError::Rescaling`] when the desired function
    /// is unknown, the series has no time scale, or the rescaling is illegal.
    pub fn upscale(
        &self,
        series: &TimeSeries<T>,
        desired: &TimeScale,
        end_times: &BTreeSet<DateTime<Utc>>,
    ) -> Result<RescaledSeries<T>> {
        if desired.function() == TimeScaleFunction::Unknown {
            return Err(RescalingError::UnknownDesiredFunction { desired: *desired }.into());
        }

        if series.is_empty() {
            let metadata = series.metadata().clone().with_time_scale(*desired);
            return Ok(RescaledSeries::unchanged(TimeSeries::empty(metadata)));
        }

        let existing = series
            .time_scale()
            .copied()
            .ok_or_else(|| RescalingError::MissingExistingScale {
                feature: series.feature().to_string(),
            })?;

        if existing == *desired || (existing.is_instantaneous() && desired.is_instantaneous()) {
            return Ok(RescaledSeries::unchanged(series.clone()));
        }

        if existing.period() == desired.period()
            && existing.function() == TimeScaleFunction::Unknown
        {
            let metadata = series.metadata().clone().with_time_scale(*desired);
            let mut relabelled = RescaledSeries::unchanged(series.clone().with_metadata(metadata));
            relabelled.events.push(ValidationEvent::debug(
                EvaluationStage::Rescaling,
                format!(
                    "relabelled the time scale of feature '{}' from {} to {} without aggregation, \
                     since the existing function is unknown",
                    series.feature(),
                    existing,
                    desired
                ),
            ));
            return Ok(relabelled);
        }

        let time_step = series.time_step().unwrap_or_else(|| existing.period());
        validate_rescaling(&existing, desired, time_step)?;

        let derived;
        let end_times = if end_times.is_empty() {
            derived = derive_end_times(series, desired.period(), time_step);
            &derived
        } else {
            end_times
        };

        let mut events = Vec::new();
        let mut upscaled = Vec::with_capacity(end_times.len());
        let mut skipped = 0usize;
        let period = desired.period();

        for &end in end_times {
            let start = end - period;
            let from = series.count_before(start + Duration::nanoseconds(1));
            let to = series.count_before(end + Duration::nanoseconds(1));
            let group = &series.events()[from..to];

            if let Some(reason) = self.check_group(group, start, end) {
                events.push(ValidationEvent::debug(
                    EvaluationStage::Rescaling,
                    format!(
                        "interval ({}, {}] of feature '{}': {}",
                        start,
                        end,
                        series.feature(),
                        reason
                    ),
                ));
                if !self.lenient || group.is_empty() {
                    skipped += 1;
                    continue;
                }
            }

            let values: Vec<&T> = group.iter().map(|e| &e.value).collect();
            match (self.aggregator)(&values, desired.function()) {
                Some(value) => upscaled.push(Event::new(end, value)),
                None => {
                    skipped += 1;
                    events.push(ValidationEvent::debug(
                        EvaluationStage::Rescaling,
                        format!(
                            "could not form a {} aggregate over ({}, {}] for feature '{}'",
                            desired.function(),
                            start,
                            end,
                            series.feature()
                        ),
                    ));
                }
            }
        }

        if skipped > 0 {
            events.push(ValidationEvent::warn(
                EvaluationStage::Rescaling,
                format!(
                    "skipped {} of {} intervals while upscaling feature '{}' from {} to {}",
                    skipped,
                    end_times.len(),
                    series.feature(),
                    existing,
                    desired
                ),
            ));
        }

        trace!(
            feature = %series.feature(),
            n_in = series.len(),
            n_out = upscaled.len(),
            skipped,
            "upscaled series"
        );

        let metadata = series.metadata().clone().with_time_scale(*desired);
        Ok(RescaledSeries {
            series: TimeSeries::new(metadata, upscaled)?,
            events,
            upscaled: true,
        })
    }

    /// Reason an interval cannot be aggregated faithfully, if any.
    fn check_group(&self, group: &[Event<T>], start: DateTime<Utc>, end: DateTime<Utc>) -> Option<String> {
        if group.len() < 2 {
            return Some(format!(
                "found {} value(s), but at least 2 are needed to aggregate",
                group.len()
            ));
        }

        let mut times: BTreeSet<DateTime<Utc>> = group.iter().map(|e| e.time).collect();
        times.insert(start);
        times.insert(end);
        let times: Vec<DateTime<Utc>> = times.into_iter().collect();
        let gaps: BTreeSet<Duration> = times.windows(2).map(|pair| pair[1] - pair[0]).collect();
        if gaps.len() > 1 {
            return Some("the values are not evenly spaced within the interval".to_string());
        }
        None
    }
}

/// End times one period apart, starting one period after the time step
/// preceding the first event and ending at or before the last event.
fn derive_end_times<T>(series: &TimeSeries<T>, period: Duration, time_step: Duration) -> BTreeSet<DateTime<Utc>> {
    let mut ends = BTreeSet::new();
    let (Some(first), Some(last)) = (series.first_time(), series.last_time()) else {
        return ends;
    };
    let mut end = first - time_step + period;
    while end <= last {
        ends.insert(end);
        end += period;
    }
    ends
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PoolError;
    use crate::series::TimeSeriesMetadata;
    use crate::status::StatusLevel;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, hour, 0, 0).unwrap()
    }

    fn three_hour_mean() -> TimeScale {
        TimeScale::new(Duration::hours(3), TimeScaleFunction::Mean).unwrap()
    }

    fn instantaneous(values: &[(u32, f64)]) -> TimeSeries<f64> {
        let metadata = TimeSeriesMetadata::new("A", "QINE", "CMS").with_time_scale(TimeScale::instantaneous());
        let events = values.iter().map(|(h, v)| Event::new(t(*h), *v)).collect();
        TimeSeries::new(metadata, events).unwrap()
    }

    fn values(series: &TimeSeries<f64>) -> Vec<f64> {
        series.events().iter().map(|e| e.value).collect()
    }

    fn hourly_one_to_six() -> TimeSeries<f64> {
        instantaneous(&[(1, 1.0), (2, 2.0), (3, 3.0), (4, 4.0), (5, 5.0), (6, 6.0)])
    }

    #[test]
    fn test_upscale_to_requested_end_times() {
        let upscaler = Upscaler::<f64>::with_default_aggregator(false);
        let ends = [t(3), t(6)].into_iter().collect();
        let result = upscaler.upscale(&hourly_one_to_six(), &three_hour_mean(), &ends).unwrap();

        assert!(result.upscaled);
        assert_eq!(result.series.valid_times(), ends);
        let out = values(&result.series);
        assert_relative_eq!(out[0], 2.0);
        assert_relative_eq!(out[1], 5.0);
        assert_eq!(result.series.time_scale(), Some(&three_hour_mean()));
        assert!(result.events.is_empty());
    }

    #[test]
    fn test_derived_end_times() {
        let upscaler = Upscaler::<f64>::with_default_aggregator(false);
        let result = upscaler
            .upscale(&hourly_one_to_six(), &three_hour_mean(), &BTreeSet::new())
            .unwrap();
        assert_eq!(result.series.valid_times(), [t(3), t(6)].into_iter().collect());
    }

    #[test]
    fn test_total() {
        let upscaler = Upscaler::<f64>::with_default_aggregator(false);
        let hourly_total = TimeScale::new(Duration::hours(1), TimeScaleFunction::Total).unwrap();
        let metadata = TimeSeriesMetadata::new("A", "PRECIP", "MM").with_time_scale(hourly_total);
        let events = (1..=6).map(|h| Event::new(t(h), 1.5)).collect();
        let series = TimeSeries::new(metadata, events).unwrap();
        let desired = TimeScale::new(Duration::hours(6), TimeScaleFunction::Total).unwrap();

        let result = upscaler.upscale(&series, &desired, &[t(6)].into_iter().collect()).unwrap();
        assert_relative_eq!(values(&result.series)[0], 9.0);
    }

    #[test]
    fn test_gaps_are_skipped_and_reported() {
        let upscaler = Upscaler::<f64>::with_default_aggregator(false);
        let series = instantaneous(&[(1, 1.0), (3, 3.0), (4, 4.0), (5, 5.0), (6, 6.0)]);
        let ends = [t(3), t(6)].into_iter().collect();
        let result = upscaler.upscale(&series, &three_hour_mean(), &ends).unwrap();

        assert_eq!(result.series.valid_times(), [t(6)].into_iter().collect());
        assert!(result.events.iter().any(|e| e.level == StatusLevel::Warn));
        assert!(result.events.iter().any(|e| e.level == StatusLevel::Debug));
    }

    #[test]
    fn test_lenient_aggregates_uneven_intervals() {
        let upscaler = Upscaler::<f64>::with_default_aggregator(true);
        let series = instantaneous(&[(1, 1.0), (3, 3.0), (4, 4.0), (5, 5.0), (6, 6.0)]);
        let ends = [t(3), t(6)].into_iter().collect();
        let result = upscaler.upscale(&series, &three_hour_mean(), &ends).unwrap();

        let out = values(&result.series);
        assert_relative_eq!(out[0], 2.0);
        assert_relative_eq!(out[1], 5.0);
        assert!(result.events.iter().all(|e| e.level == StatusLevel::Debug));
    }

    #[test]
    fn test_single_value_interval_is_skipped() {
        let upscaler = Upscaler::<f64>::with_default_aggregator(false);
        let series = instantaneous(&[(1, 1.0), (2, 2.0), (3, 3.0), (6, 6.0)]);
        let ends = [t(3), t(6)].into_iter().collect();
        let result = upscaler.upscale(&series, &three_hour_mean(), &ends).unwrap();
        assert_eq!(result.series.len(), 1);
    }

    #[test]
    fn test_illegal_rescaling_fails() {
        let upscaler = Upscaler::<f64>::with_default_aggregator(true);
        let metadata = TimeSeriesMetadata::new("A", "QINE", "CMS").with_time_scale(three_hour_mean());
        let series = TimeSeries::new(metadata, vec![Event::new(t(3), 1.0), Event::new(t(6), 2.0)]).unwrap();
        let hourly = TimeScale::new(Duration::hours(1), TimeScaleFunction::Mean).unwrap();

        let result = upscaler.upscale(&series, &hourly, &BTreeSet::new());
        assert!(matches!(
            result,
            Err(PoolError::Rescaling(RescalingError::Downscaling { .. }))
        ));
    }

    #[test]
    fn test_unknown_desired_function_fails() {
        let upscaler = Upscaler::<f64>::with_default_aggregator(false);
        let desired = TimeScale::new(Duration::hours(3), TimeScaleFunction::Unknown).unwrap();
        let result = upscaler.upscale(&hourly_one_to_six(), &desired, &BTreeSet::new());
        assert!(matches!(
            result,
            Err(PoolError::Rescaling(RescalingError::UnknownDesiredFunction { .. }))
        ));
    }

    #[test]
    fn test_missing_scale_fails() {
        let upscaler = Upscaler::<f64>::with_default_aggregator(false);
        let series = TimeSeries::new(
            TimeSeriesMetadata::new("A", "QINE", "CMS"),
            vec![Event::new(t(1), 1.0)],
        )
        .unwrap();
        let result = upscaler.upscale(&series, &three_hour_mean(), &BTreeSet::new());
        assert!(matches!(
            result,
            Err(PoolError::Rescaling(RescalingError::MissingExistingScale { .. }))
        ));
    }

    #[test]
    fn test_rescale_passes_unscaled_series_through() {
        let upscaler = Upscaler::<f64>::with_default_aggregator(false);
        let series = TimeSeries::new(
            TimeSeriesMetadata::new("A", "QINE", "CMS"),
            vec![Event::new(t(1), 1.0), Event::new(t(2), 2.0)],
        )
        .unwrap();

        let result = upscaler.rescale(&series, &three_hour_mean(), &BTreeSet::new()).unwrap();
        assert_eq!(result.series, series);
        assert!(!result.upscaled);
        assert_eq!(result.events.len(), 1);
        assert_eq!(result.events[0].level, StatusLevel::Warn);

        let result = upscaler
            .rescale(&series, &TimeScale::instantaneous(), &BTreeSet::new())
            .unwrap();
        assert_eq!(result.series.len(), 2);
        assert_eq!(result.events[0].level, StatusLevel::Info);

        let result = upscaler
            .rescale(&hourly_one_to_six(), &three_hour_mean(), &BTreeSet::new())
            .unwrap();
        assert!(result.upscaled);
        assert_eq!(values(&result.series), vec![2.0, 5.0]);
    }

    #[test]
    fn test_passthrough_and_relabel() {
        let upscaler = Upscaler::<f64>::with_default_aggregator(false);

        let empty = TimeSeries::<f64>::empty(TimeSeriesMetadata::new("A", "QINE", "CMS"));
        let result = upscaler.upscale(&empty, &three_hour_mean(), &BTreeSet::new()).unwrap();
        assert_eq!(result.series.time_scale(), Some(&three_hour_mean()));
        assert!(!result.upscaled);

        let unknown = TimeScale::new(Duration::hours(3), TimeScaleFunction::Unknown).unwrap();
        let metadata = TimeSeriesMetadata::new("A", "QINE", "CMS").with_time_scale(unknown);
        let series = TimeSeries::new(metadata, vec![Event::new(t(3), 1.0)]).unwrap();
        let result = upscaler.upscale(&series, &three_hour_mean(), &BTreeSet::new()).unwrap();
        assert_eq!(result.series.time_scale(), Some(&three_hour_mean()));
        assert_eq!(result.series.len(), 1);
        assert_eq!(result.events.len(), 1);

        let one_minute = TimeScale::new(Duration::minutes(1), TimeScaleFunction::Mean).unwrap();
        let result = upscaler.upscale(&hourly_one_to_six(), &one_minute, &BTreeSet::new()).unwrap();
        assert_eq!(result.series.len(), 6);
        assert!(!result.upscaled);
    }
}
