//! Time windows: the intersection of an absolute reference-time interval and
//! a relative lead-duration interval.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{PoolError, Result};

/// Kind of reference time attached to a time series or a time window.
///
/// `IssueTime` is the canonical anchor for lead durations. Other reference
/// times have no declared lead semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceTimeType {
    ValidTime,
    IssueTime,
    AnalysisStartTime,
}

impl fmt::Display for ReferenceTimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReferenceTimeType::ValidTime => "valid time",
            ReferenceTimeType::IssueTime => "issue time",
            ReferenceTimeType::AnalysisStartTime => "analysis start time",
        };
        f.write_str(name)
    }
}

/// A time window over reference times and lead durations.
///
/// Windows are totally ordered by earliest reference time, then latest
/// reference time, then reference-time type, then earliest lead, then
/// latest lead. The field order below encodes that ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimeWindow {
    earliest_reference_time: DateTime<Utc>,
    latest_reference_time: DateTime<Utc>,
    reference_time_type: ReferenceTimeType,
    earliest_lead: Duration,
    latest_lead: Duration,
}

impl TimeWindow {
    /// Create a time window.
    ///
    /// # Errors
    /// Returns [`PoolError::InvalidTimeWindow`] when the latest reference time
    /// precedes the earliest, when a lead is negative, when the latest lead
    /// precedes the earliest lead, or when the reference-time type cannot
    /// anchor a window.
    pub fn new(
        earliest_reference_time: DateTime<Utc>,
        latest_reference_time: DateTime<Utc>,
        reference_time_type: ReferenceTimeType,
        earliest_lead: Duration,
        latest_lead: Duration,
    ) -> Result<Self> {
        if latest_reference_time < earliest_reference_time {
            return Err(PoolError::InvalidTimeWindow(format!(
                "the latest reference time {} is before the earliest reference time {}",
                latest_reference_time, earliest_reference_time
            )));
        }
        if earliest_lead < Duration::zero() {
            return Err(PoolError::InvalidTimeWindow(format!(
                "the earliest lead duration {} is negative",
                earliest_lead
            )));
        }
        if latest_lead < earliest_lead {
            return Err(PoolError::InvalidTimeWindow(format!(
                "the latest lead duration {} is before the earliest lead duration {}",
                latest_lead, earliest_lead
            )));
        }
        if reference_time_type == ReferenceTimeType::AnalysisStartTime {
            return Err(PoolError::InvalidTimeWindow(
                "time windows are anchored at valid times or issue times".into(),
            ));
        }
        Ok(Self {
            earliest_reference_time,
            latest_reference_time,
            reference_time_type,
            earliest_lead,
            latest_lead,
        })
    }

    /// Create a window over valid times with zero leads.
    pub fn of_valid_times(earliest: DateTime<Utc>, latest: DateTime<Utc>) -> Result<Self> {
        Self::new(
            earliest,
            latest,
            ReferenceTimeType::ValidTime,
            Duration::zero(),
            Duration::zero(),
        )
    }

    /// Create a window over issue times and lead durations.
    pub fn of_issue_times(
        earliest: DateTime<Utc>,
        latest: DateTime<Utc>,
        earliest_lead: Duration,
        latest_lead: Duration,
    ) -> Result<Self> {
        Self::new(
            earliest,
            latest,
            ReferenceTimeType::IssueTime,
            earliest_lead,
            latest_lead,
        )
    }

    pub fn earliest_reference_time(&self) -> DateTime<Utc> {
        self.earliest_reference_time
    }

    pub fn latest_reference_time(&self) -> DateTime<Utc> {
        self.latest_reference_time
    }

    pub fn reference_time_type(&self) -> ReferenceTimeType {
        self.reference_time_type
    }

    pub fn earliest_lead(&self) -> Duration {
        self.earliest_lead
    }

    pub fn latest_lead(&self) -> Duration {
        self.latest_lead
    }

    /// Union of a set of windows.
    ///
    /// Reference-time and lead bounds are the componentwise min/max over all
    /// windows. The reference-time type of the first window is retained.
    ///
    /// # Errors
    /// Returns [`PoolError::InvalidTimeWindow`] when `windows` is empty.
    pub fn union(windows: &[TimeWindow]) -> Result<TimeWindow> {
        let first = windows.first().ok_or_else(|| {
            PoolError::InvalidTimeWindow("cannot form the union of zero time windows".into())
        })?;

        let mut union = *first;
        for window in &windows[1..] {
            union.earliest_reference_time = union
                .earliest_reference_time
                .min(window.earliest_reference_time);
            union.latest_reference_time = union
                .latest_reference_time
                .max(window.latest_reference_time);
            union.earliest_lead = union.earliest_lead.min(window.earliest_lead);
            union.latest_lead = union.latest_lead.max(window.latest_lead);
        }
        Ok(union)
    }

    /// Bounds on valid times implied by this window, as `(lower, upper]`.
    ///
    /// For valid-time windows these are the reference-time bounds. For
    /// issue-time windows the lead bounds are added to the issue-time bounds.
    pub fn valid_time_bounds(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        match self.reference_time_type {
            ReferenceTimeType::IssueTime => (
                self.earliest_reference_time + self.earliest_lead,
                self.latest_reference_time + self.latest_lead,
            ),
            _ => (self.earliest_reference_time, self.latest_reference_time),
        }
    }

    /// Whether a valid time falls within the right-closed valid-time bounds.
    pub fn contains_valid_time(&self, time: DateTime<Utc>) -> bool {
        let (lower, upper) = self.valid_time_bounds();
        time > lower && time <= upper
    }

    /// Whether a reference time falls within `(earliest, latest]`, or equals
    /// the single reference time when both bounds coincide.
    pub fn contains_reference_time(&self, time: DateTime<Utc>) -> bool {
        if self.earliest_reference_time == self.latest_reference_time {
            return time == self.earliest_reference_time;
        }
        time > self.earliest_reference_time && time <= self.latest_reference_time
    }

    /// Whether the lead duration falls within `(earliest, latest]`, or equals
    /// the single lead when both bounds coincide.
    pub fn contains_lead(&self, lead: Duration) -> bool {
        if self.earliest_lead == self.latest_lead {
            return lead == self.earliest_lead;
        }
        lead > self.earliest_lead && lead <= self.latest_lead
    }

    /// Whether lead durations constrain this window.
    pub fn has_lead_bounds(&self) -> bool {
        self.reference_time_type == ReferenceTimeType::IssueTime
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}] by {}",
            self.earliest_reference_time, self.latest_reference_time, self.reference_time_type
        )?;
        if self.has_lead_bounds() {
            write!(f, ", leads ({}, {}]", self.earliest_lead, self.latest_lead)?;
        }
        Ok(())
    }
}
