//! Memoizing retrievers.
//!
//! [`CachingSupplier`] populates a value at most once under concurrent callers
//! using double-checked locking. [`CachingRetriever`] builds on it to
//! materialize a retrieval once and replay it afterwards, and
//! [`CachingRetrieverFactory`] decides which roles are worth caching.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::feature::FeatureSet;
use crate::retrieval::{
    collect_series, mapped, replay_stream, Retrieve, Retriever, RetrieverFactory, SeriesMapper,
    SeriesStream,
};
use crate::series::TimeSeries;
use crate::window::TimeWindow;

/// A value computed at most once.
///
/// Failed computations are not cached; the next caller tries again.
pub struct CachingSupplier<V> {
    value: RwLock<Option<Arc<V>>>,
    populate: Mutex<()>,
}

impl<V> Default for CachingSupplier<V> {
    fn default() -> Self {
        Self {
            value: RwLock::new(None),
            populate: Mutex::new(()),
        }
    }
}

impl<V> CachingSupplier<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value, computing it with `init` if absent.
    pub fn get_or_try_init<F>(&self, init: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Result<V>,
    {
        if let Some(value) = self.get() {
            return Ok(value);
        }

        let _guard = self.populate.lock();
        // Another caller may have populated the value while we waited
        if let Some(value) = self.get() {
            return Ok(value);
        }

        let value = Arc::new(init()?);
        *self.value.write() = Some(Arc::clone(&value));
        Ok(value)
    }

    pub fn get(&self) -> Option<Arc<V>> {
        self.value.read().as_ref().map(Arc::clone)
    }

    pub fn is_populated(&self) -> bool {
        self.value.read().is_some()
    }
}

/// A retriever that materializes its source once and replays it afterwards.
///
/// The source stream is fully drained, and therefore closed, during
/// materialization.
pub struct CachingRetriever<T> {
    source: Retriever<T>,
    cache: CachingSupplier<Vec<TimeSeries<T>>>,
}

impl<T> CachingRetriever<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(source: Retriever<T>) -> Self {
        Self {
            source,
            cache: CachingSupplier::new(),
        }
    }

    /// The materialized series.
    pub fn series(&self) -> Result<Arc<Vec<TimeSeries<T>>>> {
        self.cache.get_or_try_init(|| {
            let series = collect_series(&*self.source)?;
            debug!(n_series = series.len(), "materialized cached retrieval");
            Ok(series)
        })
    }

    pub fn is_populated(&self) -> bool {
        self.cache.is_populated()
    }
}

impl<T> Retrieve<T> for CachingRetriever<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn retrieve(&self) -> Result<SeriesStream<T>> {
        Ok(replay_stream(self.series()?))
    }
}

/// A bounded map with an atomic compute-if-absent.
///
/// When full, the oldest entry is evicted.
pub struct KeyedCache<K, V> {
    capacity: usize,
    state: Mutex<KeyedState<K, V>>,
}

struct KeyedState<K, V> {
    entries: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K, V> KeyedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(KeyedState {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Return the entry for `key`, inserting `make()` if absent.
    pub fn get_or_insert_with<F>(&self, key: &K, make: F) -> V
    where
        F: FnOnce() -> V,
    {
        let mut state = self.state.lock();
        if let Some(value) = state.entries.get(key) {
            return value.clone();
        }

        while state.order.len() >= self.capacity {
            match state.order.pop_front() {
                Some(oldest) => {
                    state.entries.remove(&oldest);
                }
                None => break,
            }
        }

        let value = make();
        state.entries.insert(key.clone(), value.clone());
        state.order.push_back(key.clone());
        value
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Caching policy for baseline retrieval.
pub enum BaselineCaching<L, R> {
    /// Baseline data are window specific and not cached.
    PassThrough,
    /// Baseline is generated from source data that are reused across windows.
    Generated,
    /// Baseline is the climatology, converted with the mapper.
    SameAsClimatology(SeriesMapper<L, R>),
}

/// Wraps a retriever factory and caches the roles that are reused across
/// the windows of one feature group.
///
/// Climatology is always cached. Baseline data are cached when generated,
/// and redirected to the cached climatology when declared identical to it.
/// Left and right data pass through.
pub struct CachingRetrieverFactory<L, R> {
    inner: Arc<dyn RetrieverFactory<L, R>>,
    baseline_caching: BaselineCaching<L, R>,
    climatology: KeyedCache<FeatureSet, Arc<CachingRetriever<L>>>,
    baseline: KeyedCache<(FeatureSet, Option<TimeWindow>), Arc<CachingRetriever<R>>>,
}

impl<L, R> CachingRetrieverFactory<L, R>
where
    L: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    pub fn new(inner: Arc<dyn RetrieverFactory<L, R>>, baseline_caching: BaselineCaching<L, R>) -> Self {
        // Baseline features differ from left features, so a redirected
        // baseline needs its own climatology slot
        let climatology_capacity = match baseline_caching {
            BaselineCaching::SameAsClimatology(_) => 2,
            _ => 1,
        };
        Self {
            inner,
            baseline_caching,
            climatology: KeyedCache::new(climatology_capacity),
            baseline: KeyedCache::new(1),
        }
    }
}

impl<L, R> RetrieverFactory<L, R> for CachingRetrieverFactory<L, R>
where
    L: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    fn left_retriever(&self, features: &FeatureSet, window: Option<&TimeWindow>) -> Retriever<L> {
        self.inner.left_retriever(features, window)
    }

    fn right_retriever(&self, features: &FeatureSet, window: &TimeWindow) -> Retriever<R> {
        self.inner.right_retriever(features, window)
    }

    fn baseline_retriever(&self, features: &FeatureSet, window: Option<&TimeWindow>) -> Retriever<R> {
        match &self.baseline_caching {
            BaselineCaching::PassThrough => self.inner.baseline_retriever(features, window),
            BaselineCaching::Generated => {
                let key = (features.clone(), window.copied());
                let cached: Retriever<R> = self.baseline.get_or_insert_with(&key, || {
                    Arc::new(CachingRetriever::new(
                        self.inner.baseline_retriever(features, window),
                    ))
                });
                cached
            }
            BaselineCaching::SameAsClimatology(mapper) => {
                mapped(self.climatology_retriever(features), Arc::clone(mapper))
            }
        }
    }

    fn climatology_retriever(&self, features: &FeatureSet) -> Retriever<L> {
        self.climatology.get_or_insert_with(features, || {
            Arc::new(CachingRetriever::new(self.inner.climatology_retriever(features)))
        })
    }
}
