//! Time series, events and pairs.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{PoolError, Result};
use crate::feature::Feature;
use crate::scale::TimeScale;
use crate::window::{ReferenceTimeType, TimeWindow};

/// A value at a valid time.
#[derive(Debug, Clone, PartialEq)]
pub struct Event<T> {
    pub time: DateTime<Utc>,
    pub value: T,
}

impl<T> Event<T> {
    pub fn new(time: DateTime<Utc>, value: T) -> Self {
        Self { time, value }
    }
}

/// A paired left and right value.
#[derive(Debug, Clone, PartialEq)]
pub struct Pair<L, R> {
    pub left: L,
    pub right: R,
}

impl<L, R> Pair<L, R> {
    pub fn new(left: L, right: R) -> Self {
        Self { left, right }
    }
}

/// Metadata shared by every event of a time series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSeriesMetadata {
    pub feature: Feature,
    pub variable: String,
    pub unit: String,
    pub time_scale: Option<TimeScale>,
    pub reference_times: BTreeMap<ReferenceTimeType, DateTime<Utc>>,
}

impl TimeSeriesMetadata {
    pub fn new(feature: impl Into<Feature>, variable: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            feature: feature.into(),
            variable: variable.into(),
            unit: unit.into(),
            time_scale: None,
            reference_times: BTreeMap::new(),
        }
    }

    pub fn with_time_scale(mut self, time_scale: TimeScale) -> Self {
        self.time_scale = Some(time_scale);
        self
    }

    pub fn with_reference_time(mut self, kind: ReferenceTimeType, time: DateTime<Utc>) -> Self {
        self.reference_times.insert(kind, time);
        self
    }

    pub fn with_feature(mut self, feature: Feature) -> Self {
        self.feature = feature;
        self
    }

    /// Whether the series is forecast-shaped, i.e. carries a reference time
    /// other than a valid time.
    pub fn is_forecast(&self) -> bool {
        self.reference_times
            .keys()
            .any(|kind| *kind != ReferenceTimeType::ValidTime)
    }

    pub fn issue_time(&self) -> Option<DateTime<Utc>> {
        self.reference_times.get(&ReferenceTimeType::IssueTime).copied()
    }

    /// The issue time if present, otherwise the first reference time other
    /// than a valid time.
    pub fn anchor_time(&self) -> Option<DateTime<Utc>> {
        self.issue_time().or_else(|| {
            self.reference_times
                .iter()
                .find(|(kind, _)| **kind != ReferenceTimeType::ValidTime)
                .map(|(_, time)| *time)
        })
    }

    /// Whether two metadata describe the same series apart from reference times.
    fn same_identity(&self, other: &Self) -> bool {
        self.feature == other.feature
            && self.variable == other.variable
            && self.unit == other.unit
            && self.time_scale == other.time_scale
    }
}

/// A time series: metadata plus events strictly ascending by valid time.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries<T> {
    metadata: TimeSeriesMetadata,
    events: Vec<Event<T>>,
}

impl<T> TimeSeries<T> {
    /// Create a time series, sorting the events by valid time.
    ///
    /// # Errors
    /// Returns [`PoolError::InvalidSeries`] when two events share a valid time.
    pub fn new(metadata: TimeSeriesMetadata, mut events: Vec<Event<T>>) -> Result<Self> {
        events.sort_by_key(|e| e.time);
        if let Some(pair) = events.windows(2).find(|pair| pair[0].time == pair[1].time) {
            return Err(PoolError::InvalidSeries(format!(
                "time series for feature '{}' has more than one event at {}",
                metadata.feature, pair[0].time
            )));
        }
        Ok(Self { metadata, events })
    }

    pub fn empty(metadata: TimeSeriesMetadata) -> Self {
        Self {
            metadata,
            events: Vec::new(),
        }
    }

    /// Build from events already sorted and unique.
    fn from_sorted(metadata: TimeSeriesMetadata, events: Vec<Event<T>>) -> Self {
        debug_assert!(events.windows(2).all(|pair| pair[0].time < pair[1].time));
        Self { metadata, events }
    }

    pub fn metadata(&self) -> &TimeSeriesMetadata {
        &self.metadata
    }

    pub fn feature(&self) -> &Feature {
        &self.metadata.feature
    }

    pub fn time_scale(&self) -> Option<&TimeScale> {
        self.metadata.time_scale.as_ref()
    }

    pub fn events(&self) -> &[Event<T>] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn first_time(&self) -> Option<DateTime<Utc>> {
        self.events.first().map(|e| e.time)
    }

    pub fn last_time(&self) -> Option<DateTime<Utc>> {
        self.events.last().map(|e| e.time)
    }

    pub fn valid_times(&self) -> BTreeSet<DateTime<Utc>> {
        self.events.iter().map(|e| e.time).collect()
    }

    /// Index of the event at `time`, if any.
    pub fn position(&self, time: DateTime<Utc>) -> Option<usize> {
        self.events.binary_search_by_key(&time, |e| e.time).ok()
    }

    /// Number of events strictly before `time`.
    pub fn count_before(&self, time: DateTime<Utc>) -> usize {
        self.events.partition_point(|e| e.time < time)
    }

    pub fn into_parts(self) -> (TimeSeriesMetadata, Vec<Event<T>>) {
        (self.metadata, self.events)
    }

    pub fn with_metadata(self, metadata: TimeSeriesMetadata) -> Self {
        Self {
            metadata,
            events: self.events,
        }
    }

    /// Smallest positive gap between consecutive events.
    pub fn time_step(&self) -> Option<Duration> {
        self.events
            .windows(2)
            .map(|pair| pair[1].time - pair[0].time)
            .min()
    }

    /// Keep only the events that satisfy `keep`.
    pub fn filter(self, mut keep: impl FnMut(&Event<T>) -> bool) -> Self {
        let (metadata, events) = self.into_parts();
        let events = events.into_iter().filter(|e| keep(e)).collect();
        Self::from_sorted(metadata, events)
    }

    /// Keep the events with valid times in `(lower, upper]`.
    pub fn filter_valid_times(self, lower: DateTime<Utc>, upper: DateTime<Utc>) -> Self {
        self.filter(|e| e.time > lower && e.time <= upper)
    }

    /// Snip to a time window.
    ///
    /// Windows and series anchored at an issue time are snipped by issue time
    /// and lead duration. Everything else is snipped by valid time.
    pub fn snip_to_window(self, window: &TimeWindow) -> Self {
        match (window.has_lead_bounds(), self.metadata.issue_time()) {
            (true, Some(issued)) => {
                if !window.contains_reference_time(issued) {
                    return Self::empty(self.metadata);
                }
                self.filter(|e| window.contains_lead(e.time - issued))
            }
            _ => self.filter(|e| window.contains_valid_time(e.time)),
        }
    }

    /// Shift every valid time by `offset`. Reference times are unchanged.
    pub fn offset_valid_times(self, offset: Duration) -> Self {
        if offset.is_zero() {
            return self;
        }
        let (metadata, events) = self.into_parts();
        let events = events
            .into_iter()
            .map(|e| Event::new(e.time + offset, e.value))
            .collect();
        Self::from_sorted(metadata, events)
    }

    /// Transform every value, keeping the metadata.
    pub fn map_values<U>(&self, f: impl Fn(&T) -> U) -> TimeSeries<U> {
        TimeSeries {
            metadata: self.metadata.clone(),
            events: self
                .events
                .iter()
                .map(|e| Event::new(e.time, f(&e.value)))
                .collect(),
        }
    }
}

impl<T: Clone> TimeSeries<T> {
    /// Copy of the events with valid times in `(lower, upper]`.
    pub fn slice_valid_times(&self, lower: DateTime<Utc>, upper: DateTime<Utc>) -> Self {
        let start = self.events.partition_point(|e| e.time <= lower);
        let end = self.events.partition_point(|e| e.time <= upper);
        let events = if start < end {
            self.events[start..end].to_vec()
        } else {
            Vec::new()
        };
        Self::from_sorted(self.metadata.clone(), events)
    }

    /// Snip to the valid-time span of `other`, widening the lower bound by
    /// `lower_buffer`. Both bounds are inclusive.
    pub fn snip_to_span_of<U>(&self, other: &TimeSeries<U>, lower_buffer: Duration) -> Self {
        match (other.first_time(), other.last_time()) {
            (Some(first), Some(last)) => {
                let lower = first - lower_buffer;
                let start = self.events.partition_point(|e| e.time < lower);
                let end = self.events.partition_point(|e| e.time <= last);
                let events = if start < end {
                    self.events[start..end].to_vec()
                } else {
                    Vec::new()
                };
                Self::from_sorted(self.metadata.clone(), events)
            }
            _ => Self::empty(self.metadata.clone()),
        }
    }
}

/// Merge observation-like series that describe the same feature, variable,
/// unit and scale into one series. Forecast-shaped series pass through.
///
/// When two series hold an event at the same valid time, the value from the
/// series supplied first is kept.
pub fn consolidate<T>(series: Vec<TimeSeries<T>>) -> Vec<TimeSeries<T>> {
    let mut consolidated: Vec<TimeSeries<T>> = Vec::new();
    let mut forecasts = Vec::new();

    for next in series {
        if next.metadata.is_forecast() {
            forecasts.push(next);
            continue;
        }
        match consolidated
            .iter_mut()
            .find(|existing| existing.metadata.same_identity(&next.metadata))
        {
            Some(existing) => {
                let (_, events) = next.into_parts();
                let mut merged: BTreeMap<DateTime<Utc>, T> = BTreeMap::new();
                for event in std::mem::take(&mut existing.events) {
                    merged.insert(event.time, event.value);
                }
                for event in events {
                    merged.entry(event.time).or_insert(event.value);
                }
                existing.events = merged
                    .into_iter()
                    .map(|(time, value)| Event::new(time, value))
                    .collect();
            }
            None => consolidated.push(next),
        }
    }

    consolidated.extend(forecasts);
    consolidated
}
