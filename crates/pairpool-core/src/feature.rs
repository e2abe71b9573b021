//! Geographic features and the correspondence between left, right and
//! baseline features.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{PoolError, Result};

/// Name of a geographic feature, e.g. a gauge or a basin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Feature(String);

impl Feature {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Feature {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Feature {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// A set of features, used as the key of a retrieval.
pub type FeatureSet = BTreeSet<Feature>;

/// The features paired together: left (truth), right (candidate) and an
/// optional baseline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeatureTuple {
    pub left: Feature,
    pub right: Feature,
    #[serde(default)]
    pub baseline: Option<Feature>,
}

impl FeatureTuple {
    pub fn new(left: impl Into<Feature>, right: impl Into<Feature>) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
            baseline: None,
        }
    }

    pub fn with_baseline(mut self, baseline: impl Into<Feature>) -> Self {
        self.baseline = Some(baseline.into());
        self
    }
}

impl fmt::Display for FeatureTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.baseline {
            Some(baseline) => write!(f, "{}-{}-{}", self.left, self.right, baseline),
            None => write!(f, "{}-{}", self.left, self.right),
        }
    }
}

/// A named group of feature tuples evaluated together, one pool per window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureGroup {
    name: String,
    tuples: Vec<FeatureTuple>,
}

impl FeatureGroup {
    /// Create a feature group.
    ///
    /// Tuples are sorted and de-duplicated.
    ///
    /// # Errors
    /// Returns [`PoolError::Configuration`] when the group is empty, or when a
    /// right or baseline feature appears in more than one tuple, since each
    /// retrieved series must map to exactly one tuple.
    pub fn new(name: impl Into<String>, tuples: impl IntoIterator<Item = FeatureTuple>) -> Result<Self> {
        let name = name.into();
        let tuples: Vec<FeatureTuple> = tuples
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if tuples.is_empty() {
            return Err(PoolError::Configuration(format!(
                "feature group '{}' has no feature tuples",
                name
            )));
        }

        let mut rights = BTreeSet::new();
        let mut baselines = BTreeSet::new();
        for tuple in &tuples {
            if !rights.insert(&tuple.right) {
                return Err(PoolError::Configuration(format!(
                    "right feature '{}' appears in more than one tuple of feature group '{}'",
                    tuple.right, name
                )));
            }
            if let Some(baseline) = &tuple.baseline {
                if !baselines.insert(baseline) {
                    return Err(PoolError::Configuration(format!(
                        "baseline feature '{}' appears in more than one tuple of feature group '{}'",
                        baseline, name
                    )));
                }
            }
        }

        Ok(Self { name, tuples })
    }

    /// A group holding a single tuple, named after it.
    pub fn of(tuple: FeatureTuple) -> Self {
        Self {
            name: tuple.to_string(),
            tuples: vec![tuple],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tuples(&self) -> &[FeatureTuple] {
        &self.tuples
    }

    pub fn left_features(&self) -> FeatureSet {
        self.tuples.iter().map(|t| t.left.clone()).collect()
    }

    pub fn right_features(&self) -> FeatureSet {
        self.tuples.iter().map(|t| t.right.clone()).collect()
    }

    pub fn baseline_features(&self) -> FeatureSet {
        self.tuples.iter().filter_map(|t| t.baseline.clone()).collect()
    }

    /// Build the lookup tables for this group.
    pub fn lookup(&self) -> FeatureLookup {
        let mut by_right = BTreeMap::new();
        let mut by_baseline = BTreeMap::new();
        for tuple in &self.tuples {
            by_right.insert(tuple.right.clone(), tuple.clone());
            if let Some(baseline) = &tuple.baseline {
                by_baseline.insert(baseline.clone(), tuple.clone());
            }
        }
        FeatureLookup {
            by_right,
            by_baseline,
        }
    }
}

/// Feature-to-tuple lookups derived once per feature group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureLookup {
    by_right: BTreeMap<Feature, FeatureTuple>,
    by_baseline: BTreeMap<Feature, FeatureTuple>,
}

impl FeatureLookup {
    pub fn tuple_for_right(&self, right: &Feature) -> Option<&FeatureTuple> {
        self.by_right.get(right)
    }

    pub fn tuple_for_baseline(&self, baseline: &Feature) -> Option<&FeatureTuple> {
        self.by_baseline.get(baseline)
    }

    pub fn left_for_right(&self, right: &Feature) -> Option<&Feature> {
        self.by_right.get(right).map(|t| &t.left)
    }

    pub fn left_for_baseline(&self, baseline: &Feature) -> Option<&Feature> {
        self.by_baseline.get(baseline).map(|t| &t.left)
    }

    pub fn baseline_for_right(&self, right: &Feature) -> Option<&Feature> {
        self.by_right.get(right).and_then(|t| t.baseline.as_ref())
    }
}
