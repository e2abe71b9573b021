//! Time scales and the legality rules for rescaling between them.
//!
//! A [`TimeScale`] describes the temporal support of a value: the period over
//! which it applies and the function that produced it from finer values.
//! Durations are compared with exact integer nanosecond arithmetic so that
//! periods with fractional seconds never suffer from floating point rounding.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{PoolError, RescalingError, Result};

/// Periods at or below this many seconds are treated as instantaneous.
pub const INSTANTANEOUS_SECONDS: i64 = 60;

const NANOS_PER_SECOND: i128 = 1_000_000_000;

/// Exact length of a duration in nanoseconds.
pub(crate) fn duration_nanos(duration: Duration) -> i128 {
    i128::from(duration.num_seconds()) * NANOS_PER_SECOND + i128::from(duration.subsec_nanos())
}

/// Aggregation function of a time scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeScaleFunction {
    Unknown,
    Mean,
    Minimum,
    Maximum,
    Total,
}

impl fmt::Display for TimeScaleFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimeScaleFunction::Unknown => "UNKNOWN",
            TimeScaleFunction::Mean => "MEAN",
            TimeScaleFunction::Minimum => "MINIMUM",
            TimeScaleFunction::Maximum => "MAXIMUM",
            TimeScaleFunction::Total => "TOTAL",
        };
        f.write_str(name)
    }
}

/// Temporal support of a value: a positive period and an aggregation function.
///
/// Two scales are equal when both the period and the function match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "TimeScaleRepr", into = "TimeScaleRepr")]
pub struct TimeScale {
    period: Duration,
    function: TimeScaleFunction,
}

/// Serialized form of a [`TimeScale`]: the period in whole seconds plus any
/// sub-second remainder in nanoseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct TimeScaleRepr {
    period: i64,
    function: TimeScaleFunction,
    #[serde(default, skip_serializing_if = "is_zero")]
    period_nanos: u32,
}

fn is_zero(nanos: &u32) -> bool {
    *nanos == 0
}

impl TryFrom<TimeScaleRepr> for TimeScale {
    type Error = PoolError;

    fn try_from(repr: TimeScaleRepr) -> Result<Self> {
        let out_of_range = || PoolError::InvalidParameter {
            param: "period".into(),
            value: format!("{}s + {}ns", repr.period, repr.period_nanos),
            reason: "the time scale period is out of range".into(),
        };
        if i128::from(repr.period_nanos) >= NANOS_PER_SECOND {
            return Err(out_of_range());
        }
        let period = Duration::try_seconds(repr.period)
            .and_then(|seconds| seconds.checked_add(&Duration::nanoseconds(i64::from(repr.period_nanos))))
            .ok_or_else(out_of_range)?;
        TimeScale::new(period, repr.function)
    }
}

impl From<TimeScale> for TimeScaleRepr {
    fn from(scale: TimeScale) -> Self {
        // Periods are positive, so the sub-second part is never negative
        TimeScaleRepr {
            period: scale.period.num_seconds(),
            function: scale.function,
            period_nanos: u32::try_from(scale.period.subsec_nanos()).unwrap_or(0),
        }
    }
}

impl TimeScale {
    /// Create a time scale.
    ///
    /// # Errors
    /// Returns [`PoolError::InvalidParameter`] when the period is not positive.
    pub fn new(period: Duration, function: TimeScaleFunction) -> Result<Self> {
        if period <= Duration::zero() {
            return Err(PoolError::InvalidParameter {
                param: "period".into(),
                value: period.to_string(),
                reason: "a time scale period must be positive".into(),
            });
        }
        Ok(Self { period, function })
    }

    /// The conventional scale of an instantaneous value: one second, unknown function.
    pub fn instantaneous() -> Self {
        Self {
            period: Duration::seconds(1),
            function: TimeScaleFunction::Unknown,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn function(&self) -> TimeScaleFunction {
        self.function
    }

    /// Whether the period is short enough to be treated as instantaneous,
    /// regardless of the function.
    pub fn is_instantaneous(&self) -> bool {
        duration_nanos(self.period) <= i128::from(INSTANTANEOUS_SECONDS) * NANOS_PER_SECOND
    }
}

impl fmt::Display for TimeScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}]", self.period, self.function)
    }
}

/// Check whether values at the `existing` scale may be rescaled to the
/// `desired` scale, given data spaced `data_time_step` apart.
///
/// The rules are checked in order and the first violation is returned:
///
/// | Rule | Failure |
/// |------|---------|
/// | time step is positive | [`RescalingError::NonPositiveTimeStep`] |
/// | no downscaling | [`RescalingError::Downscaling`] |
/// | desired period is a multiple of the existing period | [`RescalingError::NonIntegerPeriodMultiple`] |
/// | same period implies same function | [`RescalingError::FunctionChangeWithoutPeriodChange`] |
/// | totals only from totals | [`RescalingError::AccumulatingNonAccumulation`] |
/// | time step within desired period | [`RescalingError::TimeStepExceedsPeriod`] |
/// | room to aggregate | [`RescalingError::NoRoomToAggregate`] |
/// | desired period is a multiple of the time step | [`RescalingError::PeriodNotMultipleOfTimeStep`] |
pub fn validate_rescaling(
    existing: &TimeScale,
    desired: &TimeScale,
    data_time_step: Duration,
) -> std::result::Result<(), RescalingError> {
    let step = duration_nanos(data_time_step);
    if step <= 0 {
        return Err(RescalingError::NonPositiveTimeStep {
            time_step: data_time_step,
        });
    }

    let existing_period = duration_nanos(existing.period);
    let desired_period = duration_nanos(desired.period);

    if existing_period > desired_period {
        return Err(RescalingError::Downscaling {
            existing: *existing,
            desired: *desired,
        });
    }

    if desired_period % existing_period != 0 {
        return Err(RescalingError::NonIntegerPeriodMultiple {
            existing: *existing,
            desired: *desired,
        });
    }

    if existing_period == desired_period && existing.function != desired.function {
        return Err(RescalingError::FunctionChangeWithoutPeriodChange {
            existing: *existing,
            desired: *desired,
        });
    }

    if desired.function == TimeScaleFunction::Total && existing.function != TimeScaleFunction::Total
    {
        return Err(RescalingError::AccumulatingNonAccumulation {
            existing: *existing,
            desired: *desired,
        });
    }

    if step > desired_period {
        return Err(RescalingError::TimeStepExceedsPeriod {
            time_step: data_time_step,
            desired: *desired,
        });
    }

    if step == desired_period && existing != desired {
        return Err(RescalingError::NoRoomToAggregate {
            time_step: data_time_step,
            existing: *existing,
            desired: *desired,
        });
    }

    if desired_period % step != 0 {
        return Err(RescalingError::PeriodNotMultipleOfTimeStep {
            time_step: data_time_step,
            desired: *desired,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scale(minutes: i64, function: TimeScaleFunction) -> TimeScale {
        TimeScale::new(Duration::minutes(minutes), function).unwrap()
    }

    #[test]
    fn test_period_must_be_positive() {
        assert!(TimeScale::new(Duration::zero(), TimeScaleFunction::Mean).is_err());
        assert!(TimeScale::new(Duration::seconds(-5), TimeScaleFunction::Mean).is_err());
        assert!(TimeScale::new(Duration::seconds(1), TimeScaleFunction::Mean).is_ok());
    }

    #[test]
    fn test_instantaneous_threshold() {
        let one_minute = TimeScale::new(Duration::seconds(60), TimeScaleFunction::Mean).unwrap();
        let just_over = TimeScale::new(
            Duration::seconds(60) + Duration::nanoseconds(1),
            TimeScaleFunction::Unknown,
        )
        .unwrap();
        assert!(one_minute.is_instantaneous());
        assert!(!just_over.is_instantaneous());
        assert!(TimeScale::instantaneous().is_instantaneous());
    }

    #[test]
    fn test_equality_needs_period_and_function() {
        assert_eq!(
            scale(60, TimeScaleFunction::Mean),
            scale(60, TimeScaleFunction::Mean)
        );
        assert_ne!(
            scale(60, TimeScaleFunction::Mean),
            scale(60, TimeScaleFunction::Total)
        );
        assert_ne!(
            scale(60, TimeScaleFunction::Mean),
            scale(120, TimeScaleFunction::Mean)
        );
    }

    #[test]
    fn test_same_period_different_function_fails() {
        let result = validate_rescaling(
            &scale(60, TimeScaleFunction::Mean),
            &scale(60, TimeScaleFunction::Maximum),
            Duration::hours(1),
        );
        assert!(matches!(
            result,
            Err(RescalingError::FunctionChangeWithoutPeriodChange { .. })
        ));
    }

    #[test]
    fn test_hourly_mean_to_three_hourly_mean_succeeds() {
        let result = validate_rescaling(
            &scale(60, TimeScaleFunction::Mean),
            &scale(180, TimeScaleFunction::Mean),
            Duration::hours(1),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_downscaling_fails() {
        let result = validate_rescaling(
            &scale(180, TimeScaleFunction::Mean),
            &scale(60, TimeScaleFunction::Mean),
            Duration::hours(1),
        );
        assert!(matches!(result, Err(RescalingError::Downscaling { .. })));
    }

    #[test]
    fn test_non_integer_multiple_fails() {
        let result = validate_rescaling(
            &scale(60, TimeScaleFunction::Mean),
            &scale(150, TimeScaleFunction::Mean),
            Duration::hours(1),
        );
        assert!(matches!(
            result,
            Err(RescalingError::NonIntegerPeriodMultiple { .. })
        ));
    }

    #[test]
    fn test_fractional_seconds_are_exact() {
        // 0.1s into 0.3s is an exact multiple, which floating point would miss
        let existing = TimeScale::new(Duration::milliseconds(100), TimeScaleFunction::Mean).unwrap();
        let desired = TimeScale::new(Duration::milliseconds(300), TimeScaleFunction::Mean).unwrap();
        assert!(validate_rescaling(&existing, &desired, Duration::milliseconds(100)).is_ok());
    }

    #[test]
    fn test_non_positive_time_step_fails() {
        let existing = scale(60, TimeScaleFunction::Mean);
        let desired = scale(180, TimeScaleFunction::Mean);
        assert!(matches!(
            validate_rescaling(&existing, &desired, Duration::zero()),
            Err(RescalingError::NonPositiveTimeStep { .. })
        ));
        assert!(matches!(
            validate_rescaling(&existing, &desired, Duration::minutes(-1)),
            Err(RescalingError::NonPositiveTimeStep { .. })
        ));
    }

    #[test]
    fn test_total_requires_total() {
        let result = validate_rescaling(
            &scale(60, TimeScaleFunction::Mean),
            &scale(180, TimeScaleFunction::Total),
            Duration::hours(1),
        );
        assert!(matches!(
            result,
            Err(RescalingError::AccumulatingNonAccumulation { .. })
        ));

        let result = validate_rescaling(
            &scale(60, TimeScaleFunction::Total),
            &scale(180, TimeScaleFunction::Total),
            Duration::hours(1),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_time_step_rules() {
        let existing = scale(60, TimeScaleFunction::Mean);
        let desired = scale(180, TimeScaleFunction::Mean);

        assert!(matches!(
            validate_rescaling(&existing, &desired, Duration::hours(6)),
            Err(RescalingError::TimeStepExceedsPeriod { .. })
        ));
        assert!(matches!(
            validate_rescaling(&existing, &desired, Duration::hours(3)),
            Err(RescalingError::NoRoomToAggregate { .. })
        ));
        assert!(matches!(
            validate_rescaling(&existing, &desired, Duration::minutes(120)),
            Err(RescalingError::PeriodNotMultipleOfTimeStep { .. })
        ));
    }

    #[test]
    fn test_instantaneous_to_mean() {
        let existing = TimeScale::instantaneous();
        let desired = scale(180, TimeScaleFunction::Mean);
        assert!(validate_rescaling(&existing, &desired, Duration::hours(1)).is_ok());
    }

    #[test]
    fn test_serde_uses_seconds() {
        let scale: TimeScale =
            serde_json::from_str(r#"{"period": 10800, "function": "mean"}"#).unwrap();
        assert_eq!(scale.period(), Duration::hours(3));
        assert_eq!(scale.function(), TimeScaleFunction::Mean);

        let json = serde_json::to_string(&scale).unwrap();
        assert_eq!(json, r#"{"period":10800,"function":"mean"}"#);

        let invalid: std::result::Result<TimeScale, _> =
            serde_json::from_str(r#"{"period": 0, "function": "mean"}"#);
        assert!(invalid.is_err());
    }

    #[test]
    fn test_serde_keeps_fractional_seconds() {
        let scale = TimeScale::new(Duration::milliseconds(1500), TimeScaleFunction::Mean).unwrap();
        let json = serde_json::to_string(&scale).unwrap();
        assert_eq!(json, r#"{"period":1,"function":"mean","period_nanos":500000000}"#);

        let back: TimeScale = serde_json::from_str(&json).unwrap();
        assert_eq!(back, scale);

        let sub_second: TimeScale =
            serde_json::from_str(r#"{"period": 0, "function": "mean", "period_nanos": 250000000}"#).unwrap();
        assert_eq!(sub_second.period(), Duration::milliseconds(250));

        let overflow: std::result::Result<TimeScale, _> =
            serde_json::from_str(r#"{"period": 1, "function": "mean", "period_nanos": 1000000000}"#);
        assert!(overflow.is_err());
    }

    #[test]
    fn test_display() {
        let text = format!("{}", scale(60, TimeScaleFunction::Mean));
        assert!(text.starts_with('['));
        assert!(text.ends_with(",MEAN]"));
    }
}
