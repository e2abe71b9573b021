//! Value kinds and the function objects injected into the pipeline.
//!
//! The pipeline is generic over the left and right value types. Each value
//! kind supplies defaults for admissibility, aggregation, transformation and
//! climatology mapping through [`ValueKind`]; callers may substitute their own
//! function objects where the defaults do not fit.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::fmt;
use std::sync::Arc;

use crate::error::{PoolError, Result};
use crate::scale::TimeScaleFunction;
use crate::series::{Event, TimeSeries};

/// Shape of the values in a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueShape {
    SingleValued,
    Ensemble,
}

impl fmt::Display for ValueShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueShape::SingleValued => f.write_str("single-valued"),
            ValueShape::Ensemble => f.write_str("ensemble"),
        }
    }
}

/// Predicate deciding whether a value may enter a pair.
pub type Admissibility<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Aggregates the values of one interval under a time scale function.
/// Returns `None` when no aggregate can be formed.
pub type Aggregator<T> = Arc<dyn Fn(&[&T], TimeScaleFunction) -> Option<T> + Send + Sync>;

/// Transforms a value, e.g. to apply admissibility bounds.
pub type Transformer<T> = Arc<dyn Fn(&T) -> T + Send + Sync>;

/// Maps a value to the doubles it contributes to climatology.
pub type ClimateMapper<T> = Arc<dyn Fn(&T) -> Vec<f64> + Send + Sync>;

/// A kind of value that can flow through pairing and rescaling.
pub trait ValueKind: Clone + fmt::Debug + Send + Sync + 'static {
    /// Pool shape this value kind produces.
    const SHAPE: ValueShape;

    /// Default admissibility: the value carries usable information.
    fn is_admissible(&self) -> bool;

    /// Default aggregation of an interval.
    fn aggregate(values: &[&Self], function: TimeScaleFunction) -> Option<Self>;

    /// Apply `f` to every double inside the value.
    fn map_doubles(&self, f: &dyn Fn(f64) -> f64) -> Self;

    /// The doubles inside the value.
    fn doubles(&self) -> Vec<f64>;

    /// Build a value from doubles, if the shape allows it.
    fn from_doubles(doubles: &[f64]) -> Option<Self>;
}

/// Aggregate doubles under a time scale function.
pub fn aggregate_doubles(values: &[f64], function: TimeScaleFunction) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    match function {
        TimeScaleFunction::Mean => Some(Statistics::<f64>::mean(values.iter())),
        TimeScaleFunction::Minimum => Some(Statistics::<f64>::min(values.iter())),
        TimeScaleFunction::Maximum => Some(Statistics::<f64>::max(values.iter())),
        TimeScaleFunction::Total => Some(values.iter().sum()),
        TimeScaleFunction::Unknown => None,
    }
}

impl ValueKind for f64 {
    const SHAPE: ValueShape = ValueShape::SingleValued;

    fn is_admissible(&self) -> bool {
        self.is_finite()
    }

    fn aggregate(values: &[&Self], function: TimeScaleFunction) -> Option<Self> {
        let doubles: Vec<f64> = values.iter().map(|v| **v).collect();
        aggregate_doubles(&doubles, function)
    }

    fn map_doubles(&self, f: &dyn Fn(f64) -> f64) -> Self {
        f(*self)
    }

    fn doubles(&self) -> Vec<f64> {
        vec![*self]
    }

    fn from_doubles(doubles: &[f64]) -> Option<Self> {
        match doubles {
            [value] => Some(*value),
            _ => None,
        }
    }
}

/// Ensemble forecast value: one double per member.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Ensemble {
    members: Vec<f64>,
}

impl Ensemble {
    pub fn new(members: Vec<f64>) -> Self {
        Self { members }
    }

    pub fn members(&self) -> &[f64] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl ValueKind for Ensemble {
    const SHAPE: ValueShape = ValueShape::Ensemble;

    /// Admissible when at least one member is finite.
    fn is_admissible(&self) -> bool {
        self.members.iter().any(|m| m.is_finite())
    }

    /// Aggregates member-wise. All values must have the same member count.
    fn aggregate(values: &[&Self], function: TimeScaleFunction) -> Option<Self> {
        let first = values.first()?;
        let count = first.len();
        if values.iter().any(|v| v.len() != count) {
            return None;
        }
        let members = (0..count)
            .map(|i| {
                let column: Vec<f64> = values.iter().map(|v| v.members[i]).collect();
                aggregate_doubles(&column, function)
            })
            .collect::<Option<Vec<f64>>>()?;
        Some(Self::new(members))
    }

    fn map_doubles(&self, f: &dyn Fn(f64) -> f64) -> Self {
        Self::new(self.members.iter().map(|m| f(*m)).collect())
    }

    fn doubles(&self) -> Vec<f64> {
        self.members.clone()
    }

    fn from_doubles(doubles: &[f64]) -> Option<Self> {
        Some(Self::new(doubles.to_vec()))
    }
}

/// Admissible value bounds with optional substitutes for values outside them.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ValueBounds {
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
    #[serde(default)]
    pub minimum_substitute: Option<f64>,
    #[serde(default)]
    pub maximum_substitute: Option<f64>,
}

impl ValueBounds {
    /// # Errors
    /// Returns [`PoolError::InvalidParameter`] when the minimum exceeds the maximum.
    pub fn validate(&self) -> Result<()> {
        if let (Some(min), Some(max)) = (self.minimum, self.maximum) {
            if min > max {
                return Err(PoolError::InvalidParameter {
                    param: "value_bounds".into(),
                    value: format!("[{}, {}]", min, max),
                    reason: "the minimum exceeds the maximum".into(),
                });
            }
        }
        Ok(())
    }

    /// Replace an out-of-bounds value by its substitute, or by NaN when no
    /// substitute is declared.
    pub fn apply(&self, value: f64) -> f64 {
        if let Some(min) = self.minimum {
            if value < min {
                return self.minimum_substitute.unwrap_or(f64::NAN);
            }
        }
        if let Some(max) = self.maximum {
            if value > max {
                return self.maximum_substitute.unwrap_or(f64::NAN);
            }
        }
        value
    }
}

pub fn default_admissibility<T: ValueKind>() -> Admissibility<T> {
    Arc::new(|value: &T| value.is_admissible())
}

pub fn default_aggregator<T: ValueKind>() -> Aggregator<T> {
    Arc::new(|values: &[&T], function| T::aggregate(values, function))
}

pub fn default_climate_mapper<T: ValueKind>() -> ClimateMapper<T> {
    Arc::new(|value: &T| value.doubles())
}

/// Transformer applying value bounds to every double in a value.
pub fn bounds_transformer<T: ValueKind>(bounds: ValueBounds) -> Transformer<T> {
    Arc::new(move |value: &T| value.map_doubles(&|v| bounds.apply(v)))
}

/// Convert a series between value kinds through their doubles.
///
/// # Errors
/// Returns [`PoolError::InvalidSeries`] when a value cannot be represented in
/// the target kind.
pub fn convert_series<S: ValueKind, T: ValueKind>(series: &TimeSeries<S>) -> Result<TimeSeries<T>> {
    let events = series
        .events()
        .iter()
        .map(|event| {
            let doubles = event.value.doubles();
            T::from_doubles(&doubles)
                .map(|value| Event::new(event.time, value))
                .ok_or_else(|| {
                    PoolError::InvalidSeries(format!(
                        "cannot represent {} doubles as a {} value for feature '{}'",
                        doubles.len(),
                        T::SHAPE,
                        series.feature()
                    ))
                })
        })
        .collect::<Result<Vec<_>>>()?;
    TimeSeries::new(series.metadata().clone(), events)
}
