//! Retrieval boundary.
//!
//! The storage layer is an external collaborator. It hands out lazy streams
//! of time series per role, feature set and (optionally) time window through a
//! [`RetrieverFactory`]. A stream may hold open resources such as database
//! cursors; those are released when the stream is dropped, so every consumer
//! takes ownership of the stream and lets it fall out of scope on every path.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::Result;
use crate::feature::FeatureSet;
use crate::series::TimeSeries;
use crate::window::TimeWindow;

/// A lazy, read-once stream of time series.
pub type SeriesStream<T> = Box<dyn Iterator<Item = Result<TimeSeries<T>>> + Send>;

/// A source of time series that may be invoked many times.
pub trait Retrieve<T>: Send + Sync {
    /// Open a fresh stream over the same logical content.
    fn retrieve(&self) -> Result<SeriesStream<T>>;
}

impl<T, F> Retrieve<T> for F
where
    F: Fn() -> Result<SeriesStream<T>> + Send + Sync,
{
    fn retrieve(&self) -> Result<SeriesStream<T>> {
        self()
    }
}

/// Shared handle to a retriever.
pub type Retriever<T> = Arc<dyn Retrieve<T>>;

/// Drain a retriever into memory.
///
/// The stream is owned here and dropped before returning, whether the
/// collection succeeds or fails part way.
pub fn collect_series<T>(retriever: &dyn Retrieve<T>) -> Result<Vec<TimeSeries<T>>> {
    let stream = retriever.retrieve()?;
    stream.collect()
}

/// A retriever that replays the given series on every call.
pub fn replay<T>(series: Vec<TimeSeries<T>>) -> Retriever<T>
where
    T: Clone + Send + Sync + 'static,
{
    let series = Arc::new(series);
    Arc::new(move || -> Result<SeriesStream<T>> { Ok(replay_stream(Arc::clone(&series))) })
}

/// Stream over shared, already materialized series.
pub(crate) fn replay_stream<T>(series: Arc<Vec<TimeSeries<T>>>) -> SeriesStream<T>
where
    T: Clone + Send + Sync + 'static,
{
    let count = series.len();
    Box::new((0..count).map(move |i| -> Result<TimeSeries<T>> { Ok(series[i].clone()) }))
}

/// A retriever that filters every series from `source` to valid times in
/// `(lower, upper]`.
pub fn sliced<T>(source: Retriever<T>, lower: DateTime<Utc>, upper: DateTime<Utc>) -> Retriever<T>
where
    T: Send + 'static,
{
    Arc::new(move || -> Result<SeriesStream<T>> {
        let stream = source.retrieve()?;
        Ok(Box::new(stream.map(move |series| {
            series.map(|s| s.filter_valid_times(lower, upper))
        })))
    })
}

/// Converts a whole series from one value kind to another.
pub type SeriesMapper<S, T> = Arc<dyn Fn(TimeSeries<S>) -> Result<TimeSeries<T>> + Send + Sync>;

/// A retriever that converts every series from `source` with `convert`.
pub fn mapped<S, T>(source: Retriever<S>, convert: SeriesMapper<S, T>) -> Retriever<T>
where
    S: Send + 'static,
    T: Send + 'static,
{
    Arc::new(move || -> Result<SeriesStream<T>> {
        let stream = source.retrieve()?;
        let convert = Arc::clone(&convert);
        Ok(Box::new(stream.map(move |series| series.and_then(|s| convert(s)))))
    })
}

/// Produces retrievers for each data role.
///
/// Implemented by the storage layer. Each retriever must faithfully re-deliver
/// the same logical content on every call.
pub trait RetrieverFactory<L, R>: Send + Sync {
    /// Left (truth) data. A `None` window asks for all available data.
    fn left_retriever(&self, features: &FeatureSet, window: Option<&TimeWindow>) -> Retriever<L>;

    /// Right (candidate) data for one window.
    fn right_retriever(&self, features: &FeatureSet, window: &TimeWindow) -> Retriever<R>;

    /// Baseline data. A `None` window asks for all available data.
    fn baseline_retriever(&self, features: &FeatureSet, window: Option<&TimeWindow>) -> Retriever<R>;

    /// Climatology over the whole period of record.
    fn climatology_retriever(&self, features: &FeatureSet) -> Retriever<L>;
}
