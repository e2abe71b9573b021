//! Pooling options.
//!
//! [`PoolingOptions`] gathers everything the pool factory needs besides the
//! feature group, the time windows and the data themselves. Options are
//! usually parsed from JSON; durations are given in whole seconds and time
//! scales as `{"period": <seconds>, "function": "mean"}`.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::cross_pairing::CrossPairMethod;
use crate::error::{PoolError, Result};
use crate::pairing::PairingMode;
use crate::scale::{TimeScale, TimeScaleFunction};
use crate::values::{ValueBounds, ValueShape};

/// Kind of dataset behind one data role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Observations,
    Simulations,
    Analyses,
    SingleValuedForecasts,
    EnsembleForecasts,
}

impl DataType {
    /// Shape of the values this dataset carries.
    pub fn shape(&self) -> ValueShape {
        match self {
            DataType::EnsembleForecasts => ValueShape::Ensemble,
            _ => ValueShape::SingleValued,
        }
    }

    pub fn is_forecast(&self) -> bool {
        matches!(self, DataType::SingleValuedForecasts | DataType::EnsembleForecasts)
    }

    /// Whether one retrieval can serve every time window.
    pub fn is_time_window_independent(&self) -> bool {
        matches!(self, DataType::Observations | DataType::Simulations)
    }
}

/// One data role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetOptions {
    pub data_type: DataType,
    /// Added to every valid time after retrieval.
    #[serde(default, with = "seconds")]
    pub time_offset: Duration,
}

impl DatasetOptions {
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            time_offset: Duration::zero(),
        }
    }

    pub fn with_time_offset(mut self, offset: Duration) -> Self {
        self.time_offset = offset;
        self
    }
}

/// A baseline derived from source data rather than read from a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum GeneratedBaseline {
    Persistence { order: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineOptions {
    pub dataset: DatasetOptions,
    #[serde(default)]
    pub generated: Option<GeneratedBaseline>,
    /// The baseline data are the climatological data.
    #[serde(default)]
    pub same_as_climatology: bool,
}

impl BaselineOptions {
    pub fn new(dataset: DatasetOptions) -> Self {
        Self {
            dataset,
            generated: None,
            same_as_climatology: false,
        }
    }

    pub fn generated(dataset: DatasetOptions, generated: GeneratedBaseline) -> Self {
        Self {
            dataset,
            generated: Some(generated),
            same_as_climatology: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CrossPairOptions {
    #[serde(default)]
    pub method: CrossPairMethod,
    #[serde(default, with = "option_seconds")]
    pub tolerance: Option<Duration>,
}

/// Options for pooling one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolingOptions {
    pub left: DatasetOptions,
    pub right: DatasetOptions,
    #[serde(default)]
    pub baseline: Option<BaselineOptions>,
    #[serde(default)]
    pub desired_time_scale: Option<TimeScale>,
    /// Spacing of pairs when both sides are upscaled. Defaults to the desired
    /// period.
    #[serde(default, with = "option_seconds")]
    pub pair_frequency: Option<Duration>,
    #[serde(default)]
    pub value_bounds: Option<ValueBounds>,
    #[serde(default)]
    pub cross_pair: Option<CrossPairOptions>,
    #[serde(default)]
    pub pairing_mode: PairingMode,
    #[serde(default)]
    pub climatology_required: bool,
    /// Aggregate intervals with too few or irregular events instead of
    /// skipping them.
    #[serde(default)]
    pub rescale_lenient: bool,
}

impl PoolingOptions {
    /// Options for a left and right dataset with every optional feature off.
    pub fn new(left: DataType, right: DataType) -> Self {
        Self {
            left: DatasetOptions::new(left),
            right: DatasetOptions::new(right),
            baseline: None,
            desired_time_scale: None,
            pair_frequency: None,
            value_bounds: None,
            cross_pair: None,
            pairing_mode: PairingMode::Auto,
            climatology_required: false,
            rescale_lenient: false,
        }
    }

    /// Parse and validate options from JSON.
    ///
    /// # Errors
    /// Returns [`PoolError::Configuration`] for malformed JSON, or any error of
    /// [`PoolingOptions::validate`].
    pub fn from_json(json: &str) -> Result<Self> {
        let options: PoolingOptions = serde_json::from_str(json)
            .map_err(|e| PoolError::Configuration(format!("invalid pooling options: {}", e)))?;
        options.validate()?;
        Ok(options)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| PoolError::InternalError(format!("cannot serialize pooling options: {}", e)))
    }

    pub fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }

    pub fn has_generated_baseline(&self) -> bool {
        self.baseline.is_some_and(|b| b.generated.is_some())
    }

    /// Check the options for internal consistency.
    ///
    /// # Errors
    /// Returns [`PoolError::Configuration`] or [`PoolError::InvalidParameter`]
    /// describing the first inconsistency found.
    pub fn validate(&self) -> Result<()> {
        if self.left.data_type == DataType::EnsembleForecasts {
            return Err(PoolError::Configuration(
                "left data cannot be ensemble forecasts".into(),
            ));
        }

        if let Some(scale) = &self.desired_time_scale {
            if scale.function() == TimeScaleFunction::Unknown {
                return Err(PoolError::Configuration(format!(
                    "the desired time scale {} must declare a function",
                    scale
                )));
            }
        }

        if let Some(frequency) = self.pair_frequency {
            if frequency <= Duration::zero() {
                return Err(PoolError::InvalidParameter {
                    param: "pair_frequency".into(),
                    value: frequency.num_seconds().to_string(),
                    reason: "the pair frequency must be positive".into(),
                });
            }
            if self.desired_time_scale.is_none() {
                return Err(PoolError::Configuration(
                    "a pair frequency requires a desired time scale".into(),
                ));
            }
        }

        if let Some(bounds) = &self.value_bounds {
            bounds.validate()?;
        }

        if let Some(baseline) = &self.baseline {
            match baseline.generated {
                Some(_) if baseline.same_as_climatology => {
                    return Err(PoolError::Configuration(
                        "a generated baseline cannot also be the climatology".into(),
                    ))
                }
                Some(GeneratedBaseline::Persistence { order: 0 }) => {
                    return Err(PoolError::InvalidParameter {
                        param: "order".into(),
                        value: "0".into(),
                        reason: "the persistence order must be at least 1".into(),
                    })
                }
                _ => {}
            }
        }

        if let Some(cross_pair) = &self.cross_pair {
            if self.baseline.is_none() {
                return Err(PoolError::Configuration(
                    "cross-pairing requires a baseline".into(),
                ));
            }
            if let Some(tolerance) = cross_pair.tolerance {
                if tolerance < Duration::zero() {
                    return Err(PoolError::InvalidParameter {
                        param: "tolerance".into(),
                        value: tolerance.num_seconds().to_string(),
                        reason: "the cross-pairing tolerance cannot be negative".into(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Durations as whole seconds.
mod seconds {
    use chrono::Duration;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(duration.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = i64::deserialize(deserializer)?;
        Duration::try_seconds(secs).ok_or_else(|| de::Error::custom(format!("duration of {} seconds is out of range", secs)))
    }
}

mod option_seconds {
    use chrono::Duration;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match duration {
            Some(d) => serializer.serialize_some(&d.num_seconds()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        match Option::<i64>::deserialize(deserializer)? {
            Some(secs) => Duration::try_seconds(secs)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("duration of {} seconds is out of range", secs))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const FULL: &str = r#"{
        "left": {"data_type": "observations"},
        "right": {"data_type": "single_valued_forecasts", "time_offset": 3600},
        "baseline": {
            "dataset": {"data_type": "observations"},
            "generated": {"method": "persistence", "order": 1}
        },
        "desired_time_scale": {"period": 21600, "function": "mean"},
        "pair_frequency": 21600,
        "value_bounds": {"minimum": 0.0, "minimum_substitute": 0.0},
        "cross_pair": {"method": "fuzzy", "tolerance": 3600},
        "pairing_mode": "reference_and_valid_time",
        "climatology_required": true
    }"#;

    #[test]
    fn test_from_json() {
        let options = PoolingOptions::from_json(FULL).unwrap();
        assert_eq!(options.left.data_type, DataType::Observations);
        assert_eq!(options.right.time_offset, Duration::hours(1));
        assert_eq!(options.left.time_offset, Duration::zero());
        assert_eq!(
            options.desired_time_scale,
            Some(TimeScale::new(Duration::hours(6), TimeScaleFunction::Mean).unwrap())
        );
        assert_eq!(options.pair_frequency, Some(Duration::hours(6)));
        assert_eq!(
            options.baseline.unwrap().generated,
            Some(GeneratedBaseline::Persistence { order: 1 })
        );
        assert_eq!(options.cross_pair.unwrap().method, CrossPairMethod::Fuzzy);
        assert_eq!(options.cross_pair.unwrap().tolerance, Some(Duration::hours(1)));
        assert_eq!(options.pairing_mode, PairingMode::ReferenceAndValidTime);
        assert!(options.climatology_required);
        assert!(!options.rescale_lenient);
        assert!(options.has_generated_baseline());
    }

    #[test]
    fn test_json_round_trip() {
        let options = PoolingOptions::from_json(FULL).unwrap();
        let json = options.to_json().unwrap();
        assert_eq!(PoolingOptions::from_json(&json).unwrap(), options);
    }

    #[test]
    fn test_minimal_json_uses_defaults() {
        let options = PoolingOptions::from_json(
            r#"{"left": {"data_type": "observations"}, "right": {"data_type": "ensemble_forecasts"}}"#,
        )
        .unwrap();
        assert_eq!(options, PoolingOptions::new(DataType::Observations, DataType::EnsembleForecasts));
        assert_eq!(options.right.data_type.shape(), ValueShape::Ensemble);
    }

    #[test]
    fn test_malformed_json() {
        let error = PoolingOptions::from_json(r#"{"left": {}}"#).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Configuration);

        let error = PoolingOptions::from_json(
            r#"{"left": {"data_type": "observations"}, "right": {"data_type": "observations"},
                "desired_time_scale": {"period": 0, "function": "mean"}}"#,
        )
        .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_validate_rejects_inconsistencies() {
        let base = PoolingOptions::new(DataType::Observations, DataType::SingleValuedForecasts);
        assert!(base.validate().is_ok());

        let mut options = base.clone();
        options.left = DatasetOptions::new(DataType::EnsembleForecasts);
        assert!(options.validate().is_err());

        let mut options = base.clone();
        options.desired_time_scale = Some(TimeScale::new(Duration::hours(6), TimeScaleFunction::Unknown).unwrap());
        assert!(options.validate().is_err());

        let mut options = base.clone();
        options.desired_time_scale = Some(TimeScale::new(Duration::hours(6), TimeScaleFunction::Mean).unwrap());
        options.pair_frequency = Some(Duration::zero());
        assert!(matches!(options.validate(), Err(PoolError::InvalidParameter { .. })));

        let mut options = base.clone();
        options.pair_frequency = Some(Duration::hours(6));
        assert!(options.validate().is_err());

        let mut options = base.clone();
        options.value_bounds = Some(ValueBounds {
            minimum: Some(1.0),
            maximum: Some(0.0),
            ..ValueBounds::default()
        });
        assert!(options.validate().is_err());

        let mut options = base.clone();
        let mut baseline = BaselineOptions::generated(
            DatasetOptions::new(DataType::Observations),
            GeneratedBaseline::Persistence { order: 1 },
        );
        baseline.same_as_climatology = true;
        options.baseline = Some(baseline);
        assert!(options.validate().is_err());

        let mut options = base.clone();
        options.baseline = Some(BaselineOptions::generated(
            DatasetOptions::new(DataType::Observations),
            GeneratedBaseline::Persistence { order: 0 },
        ));
        assert!(options.validate().is_err());

        let mut options = base.clone();
        options.cross_pair = Some(CrossPairOptions::default());
        assert!(options.validate().is_err());

        let mut options = base;
        options.baseline = Some(BaselineOptions::new(DatasetOptions::new(DataType::SingleValuedForecasts)));
        options.cross_pair = Some(CrossPairOptions {
            method: CrossPairMethod::Fuzzy,
            tolerance: Some(Duration::hours(-1)),
        });
        assert!(options.validate().is_err());
    }
}
