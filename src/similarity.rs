//! Nearest-neighbour search over corpus feature vectors
//!
//! The index is trained once per corpus and queried every aggregation cycle.
//! `LinearIndex` is an exhaustive Euclidean search: corpora are a few thousand
//! rows at most, so a scan is well inside one hop.

use crate::corpus::{FeatureMatrix, FragmentId};
use crate::error::{MosaicError, Result};
use rayon::prelude::*;
use std::cmp::Ordering;

/// Rows above which distances are evaluated in parallel
const PARALLEL_THRESHOLD: usize = 4096;

/// Queryable k-NN structure over a static feature matrix
pub trait SimilarityIndex: Send + Sync {
    /// Build the index; replaces anything trained before
    fn train(&mut self, features: &FeatureMatrix, ids: &[FragmentId]);

    /// The `k` ids closest to `query`, nearest first. Returns fewer than `k`
    /// when the index holds fewer rows.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<FragmentId>>;

    fn dimension(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exhaustive Euclidean index
#[derive(Debug, Clone)]
pub struct LinearIndex {
    features: FeatureMatrix,
    ids: Vec<FragmentId>,
}

impl LinearIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            features: FeatureMatrix::new(dim),
            ids: Vec::new(),
        }
    }
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// NaN distances rank after every real one
fn rank_key(distance: f32) -> f32 {
    if distance.is_nan() {
        f32::INFINITY
    } else {
        distance
    }
}

/// Distance first, then id, so equal distances resolve deterministically
fn by_distance(a: &(f32, FragmentId), b: &(f32, FragmentId)) -> Ordering {
    rank_key(a.0)
        .total_cmp(&rank_key(b.0))
        .then(a.1.cmp(&b.1))
}

impl SimilarityIndex for LinearIndex {
    fn train(&mut self, features: &FeatureMatrix, ids: &[FragmentId]) {
        debug_assert_eq!(features.row_count(), ids.len());
        self.features = features.clone();
        self.ids = ids.to_vec();
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<FragmentId>> {
        if query.len() != self.features.dim() {
            return Err(MosaicError::DimensionMismatch {
                expected: self.features.dim(),
                actual: query.len(),
            });
        }
        if k == 0 || self.ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f32, FragmentId)> = if self.ids.len() >= PARALLEL_THRESHOLD {
            self.ids
                .par_iter()
                .enumerate()
                .map(|(row, &id)| (squared_distance(self.features.row(row), query), id))
                .collect()
        } else {
            self.features
                .rows()
                .zip(&self.ids)
                .map(|(row, &id)| (squared_distance(row, query), id))
                .collect()
        };

        let k = k.min(scored.len());
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_distance);
            scored.truncate(k);
        }
        scored.sort_by(by_distance);

        Ok(scored.into_iter().map(|(_, id)| id).collect())
    }

    fn dimension(&self) -> usize {
        self.features.dim()
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}
