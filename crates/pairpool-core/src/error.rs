//! Error types for pool generation.
//!
//! Errors fall into a small taxonomy (see [`ErrorKind`]). Configuration,
//! rescaling and pairing errors are fatal for the pool being built and are
//! never retried internally. Data-access errors are propagated unchanged so
//! that the caller can decide whether to retry the whole pool. Soft anomalies
//! are not errors at all; they travel as [`crate::status::ValidationEvent`]s.

use chrono::Duration;
use thiserror::Error;

use crate::scale::TimeScale;

/// Result type for pooling operations.
pub type Result<T> = std::result::Result<T, PoolError>;

/// Coarse classification of a [`PoolError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Declared options are inconsistent. Surfaced before any retrieval.
    Configuration,
    /// An illegal rescaling request.
    Rescaling,
    /// Malformed inputs to pairing.
    Pairing,
    /// Failure in the retrieval layer.
    DataAccess,
    /// Broken internal invariant.
    Internal,
}

/// Reasons a rescaling request is illegal.
///
/// There is one variant per validation rule so that callers can tell the
/// failures apart without parsing messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RescalingError {
    #[error("the data time step must be positive, got {time_step}")]
    NonPositiveTimeStep { time_step: Duration },

    #[error("cannot downscale from {existing} to {desired}")]
    Downscaling {
        existing: TimeScale,
        desired: TimeScale,
    },

    #[error("the desired period of {desired} is not an integer multiple of the existing period of {existing}")]
    NonIntegerPeriodMultiple {
        existing: TimeScale,
        desired: TimeScale,
    },

    #[error("cannot change the function from {existing} to {desired} without changing the period")]
    FunctionChangeWithoutPeriodChange {
        existing: TimeScale,
        desired: TimeScale,
    },

    #[error("cannot accumulate {existing} into {desired}: the existing values are not accumulations")]
    AccumulatingNonAccumulation {
        existing: TimeScale,
        desired: TimeScale,
    },

    #[error("the data time step of {time_step} exceeds the desired period of {desired}")]
    TimeStepExceedsPeriod {
        time_step: Duration,
        desired: TimeScale,
    },

    #[error("the data time step of {time_step} equals the desired period of {desired}, leaving no room to rescale from {existing}")]
    NoRoomToAggregate {
        time_step: Duration,
        existing: TimeScale,
        desired: TimeScale,
    },

    #[error("the desired period of {desired} is not an integer multiple of the data time step of {time_step}")]
    PeriodNotMultipleOfTimeStep {
        time_step: Duration,
        desired: TimeScale,
    },

    #[error("the desired time scale {desired} has an unknown function")]
    UnknownDesiredFunction { desired: TimeScale },

    #[error("time series for feature '{feature}' has no time scale and cannot be rescaled")]
    MissingExistingScale { feature: String },
}

/// Error types for pool generation.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid parameter '{param}' = '{value}': {reason}")]
    InvalidParameter {
        param: String,
        value: String,
        reason: String,
    },

    #[error("Rescaling error: {0}")]
    Rescaling(#[from] RescalingError),

    #[error("Pairing error: {0}")]
    Pairing(String),

    #[error("Data access error while {context}: {source}")]
    DataAccess {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Invalid time window: {0}")]
    InvalidTimeWindow(String),

    #[error("Invalid time series: {0}")]
    InvalidSeries(String),

    #[error("Baseline generation error: {0}")]
    Generation(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl PoolError {
    /// Wrap a failure raised by the retrieval layer.
    pub fn data_access<E>(context: impl Into<String>, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        PoolError::DataAccess {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Taxonomy class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PoolError::Configuration(_)
            | PoolError::InvalidParameter { .. }
            | PoolError::InvalidTimeWindow(_)
            | PoolError::Generation(_) => ErrorKind::Configuration,
            PoolError::Rescaling(_) => ErrorKind::Rescaling,
            PoolError::Pairing(_) | PoolError::InvalidSeries(_) => ErrorKind::Pairing,
            PoolError::DataAccess { .. } => ErrorKind::DataAccess,
            PoolError::InternalError(_) => ErrorKind::Internal,
        }
    }

    /// Whether retrying the whole pool might succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::DataAccess
    }
}
