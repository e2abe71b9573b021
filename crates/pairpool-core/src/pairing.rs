//! Pairing of left and right time series by time coordinates.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{PoolError, Result};
use crate::series::{Event, Pair, TimeSeries, TimeSeriesMetadata};
use crate::values::{default_admissibility, Admissibility, ValueKind};

/// How events are matched between the left and right series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingMode {
    /// Match on reference and valid time when both sides are forecasts,
    /// otherwise on valid time only.
    #[default]
    Auto,
    ReferenceAndValidTime,
    ValidTimeOnly,
}

impl PairingMode {
    /// Resolve `Auto` for a concrete left and right series.
    pub fn resolve(self, left: &TimeSeriesMetadata, right: &TimeSeriesMetadata) -> PairingMode {
        match self {
            PairingMode::Auto if left.is_forecast() && right.is_forecast() => {
                PairingMode::ReferenceAndValidTime
            }
            PairingMode::Auto => PairingMode::ValidTimeOnly,
            other => other,
        }
    }
}

/// Pairs left and right series whose time coordinates match.
pub struct Pairer<L, R> {
    mode: PairingMode,
    left_admissible: Admissibility<L>,
    right_admissible: Admissibility<R>,
}

impl<L, R> Clone for Pairer<L, R> {
    fn clone(&self) -> Self {
        Self {
            mode: self.mode,
            left_admissible: self.left_admissible.clone(),
            right_admissible: self.right_admissible.clone(),
        }
    }
}

impl<L: ValueKind, R: ValueKind> Pairer<L, R> {
    /// A pairer using the default admissibility of each value kind.
    pub fn with_default_admissibility(mode: PairingMode) -> Self {
        Self::new(mode, default_admissibility(), default_admissibility())
    }
}

impl<L: Clone, R: Clone> Pairer<L, R> {
    pub fn new(mode: PairingMode, left_admissible: Admissibility<L>, right_admissible: Admissibility<R>) -> Self {
        Self {
            mode,
            left_admissible,
            right_admissible,
        }
    }

    pub fn mode(&self) -> PairingMode {
        self.mode
    }

    /// Pair two series.
    ///
    /// For each right event the left event with the same matching key is
    /// located; the pair is kept when both values are admissible. Output
    /// follows the right series' order and carries the right series'
    /// metadata. Right events without a match are dropped, so an empty
    /// result is valid.
    ///
    /// # Errors
    /// Returns [`PoolError::Pairing`] when both series declare time scales that
    /// differ and are not both instantaneous.
    pub fn pair(&self, left: &TimeSeries<L>, right: &TimeSeries<R>) -> Result<TimeSeries<Pair<L, R>>> {
        if let (Some(l), Some(r)) = (left.time_scale(), right.time_scale()) {
            if l != r && !(l.is_instantaneous() && r.is_instantaneous()) {
                return Err(PoolError::Pairing(format!(
                    "cannot pair left data for feature '{}' at time scale {} with right data for \
                     feature '{}' at time scale {}",
                    left.feature(),
                    l,
                    right.feature(),
                    r
                )));
            }
        }

        let metadata = right.metadata().clone();
        let mode = self.mode.resolve(left.metadata(), right.metadata());
        if mode == PairingMode::ReferenceAndValidTime
            && left.metadata().reference_times != right.metadata().reference_times
        {
            trace!(feature = %right.feature(), "reference times differ, no pairs");
            return Ok(TimeSeries::empty(metadata));
        }

        let mut events = Vec::with_capacity(right.len());
        let mut inadmissible = 0usize;
        for right_event in right.events() {
            let Some(index) = left.position(right_event.time) else {
                continue;
            };
            let left_value = &left.events()[index].value;
            if (self.left_admissible)(left_value) && (self.right_admissible)(&right_event.value) {
                events.push(Event::new(
                    right_event.time,
                    Pair::new(left_value.clone(), right_event.value.clone()),
                ));
            } else {
                inadmissible += 1;
            }
        }

        if inadmissible > 0 {
            trace!(feature = %right.feature(), inadmissible, "dropped inadmissible pairs");
        }

        TimeSeries::new(metadata, events)
    }
}
