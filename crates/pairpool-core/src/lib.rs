//! Time-series pairing and pool generation for forecast verification.
//!
//! This crate forms pools of time-aligned, scale-consistent pairs from left
//! (observed), right (predicted) and optional baseline time series, one pool
//! per time window and feature group. Data retrieval is delegated to a
//! host-supplied [`RetrieverFactory`]; statistics are computed downstream.

pub mod caching;
pub mod config;
pub mod cross_pairing;
pub mod error;
pub mod factory;
pub mod feature;
pub mod generators;
pub mod pairing;
pub mod pool;
pub mod pools;
pub mod retrieval;
pub mod scale;
pub mod series;
pub mod status;
pub mod supplier;
pub mod upscaling;
pub mod values;
pub mod window;

// Re-exports for convenience
pub use caching::{BaselineCaching, CachingRetriever, CachingRetrieverFactory, CachingSupplier, KeyedCache};
pub use config::{
    BaselineOptions, CrossPairOptions, DataType, DatasetOptions, GeneratedBaseline, PoolingOptions,
};
pub use cross_pairing::{CrossPairMethod, CrossPairer, CrossPairs};
pub use error::{ErrorKind, PoolError, RescalingError, Result};
pub use factory::PoolFactory;
pub use feature::{Feature, FeatureGroup, FeatureLookup, FeatureSet, FeatureTuple};
pub use generators::{BaselineGenerator, PersistenceGenerator};
pub use pairing::{Pairer, PairingMode};
pub use pool::{BaselinePairs, PairsByFeature, Pool, PoolMetadata};
pub use pools::{BaselinePlan, PoolsGenerator, PoolsGeneratorParts};
pub use retrieval::{
    collect_series, mapped, replay, sliced, Retrieve, Retriever, RetrieverFactory, SeriesMapper,
    SeriesStream,
};
pub use scale::{validate_rescaling, TimeScale, TimeScaleFunction};
pub use series::{consolidate, Event, Pair, TimeSeries, TimeSeriesMetadata};
pub use status::{EvaluationStage, StatusLevel, ValidationEvent};
pub use supplier::{
    BaselineSource, Climatology, PoolComponents, PoolStage, PoolSupplier, PoolSupplierConfig,
};
pub use upscaling::{RescaledSeries, Upscaler};
pub use values::{Ensemble, ValueBounds, ValueKind, ValueShape};
pub use window::{ReferenceTimeType, TimeWindow};
