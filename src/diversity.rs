//! Symmetric cache of distorted pairwise distances between population
//! members. Keys are unordered pairs of stable candidate ids; lookups
//! take the lock shared, a miss upgrades to exclusive on insert.
//! Entries referencing evicted candidates are purged in sorted batches.

use std::{
  collections::HashMap,
  sync::{
    atomic::{AtomicU64, Ordering},
    RwLock,
  },
};

use itertools::{EitherOrBoth, Itertools};

/// Stable identifier of a population member; survives reordering.
pub type CandidateId = u64;

/// Lp distance between two behavior vectors. `p` may be 1, 2 or
/// infinity; components missing on one side count as zero.
pub fn lp_distance(x: &[f64], y: &[f64], p: f64) -> f64 {
  let diffs = x.iter().zip_longest(y.iter()).map(|pair| match pair {
    EitherOrBoth::Both(a, b) => (a - b).abs(),
    EitherOrBoth::Left(a) => a.abs(),
    EitherOrBoth::Right(b) => b.abs(),
  });
  if p.is_infinite() {
    diffs.fold(0.0, f64::max)
  } else if p == 1.0 {
    diffs.sum()
  } else if p == 2.0 {
    diffs.map(|d| d * d).sum::<f64>().sqrt()
  } else {
    diffs.map(|d| d.powf(p)).sum::<f64>().powf(1.0 / p)
  }
}

/// Cache of distorted diversity penalties between candidate pairs.
pub struct DiversityCache {
  p_norm: f64,
  pressure: f64,
  exponent: f64,
  cache: RwLock<HashMap<(CandidateId, CandidateId), f64>>,
  hits: AtomicU64,
  misses: AtomicU64,
}

impl DiversityCache {
  /// A cache computing `(pressure / (1 + d))^exponent` over Lp
  /// distances, or `pressure / (1 + d)` undistorted when the exponent
  /// is zero.
  pub fn new(p_norm: f64, pressure: f64, exponent: f64) -> Self {
    DiversityCache {
      p_norm,
      pressure,
      exponent,
      cache: RwLock::new(HashMap::new()),
      hits: AtomicU64::new(0),
      misses: AtomicU64::new(0),
    }
  }

  /// Distorted distance between two candidates, symmetric in its
  /// arguments. Computed lazily on first query of a pair.
  pub fn distortion(
    &self,
    a: (CandidateId, &[f64]),
    b: (CandidateId, &[f64]),
  ) -> f64 {
    let key = if a.0 <= b.0 { (a.0, b.0) } else { (b.0, a.0) };
    {
      let cache = self.cache.read().expect("diversity cache poisoned");
      if let Some(&cached) = cache.get(&key) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        return cached;
      }
    }
    let d = lp_distance(a.1, b.1, self.p_norm);
    let dp = self.pressure / (1.0 + d);
    let ddp = if self.exponent > 0.0 {
      dp.powf(self.exponent)
    } else {
      dp
    };
    self.misses.fetch_add(1, Ordering::Relaxed);
    let mut cache = self.cache.write().expect("diversity cache poisoned");
    *cache.entry(key).or_insert(ddp)
  }

  /// Erases every entry whose key mentions any of `removed`.
  ///
  /// The batch must be sorted ascending; the purge is one pass over
  /// the cache with a binary search per key side.
  pub fn erase_refs(&self, removed: &[CandidateId]) {
    debug_assert!(
      removed.windows(2).all(|w| w[0] <= w[1]),
      "erase batch must be sorted"
    );
    if removed.is_empty() {
      return;
    }
    let mut cache = self.cache.write().expect("diversity cache poisoned");
    cache.retain(|&(l, r), _| {
      removed.binary_search(&l).is_err() && removed.binary_search(&r).is_err()
    });
  }

  /// Number of cached pairs.
  pub fn len(&self) -> usize {
    self.cache.read().expect("diversity cache poisoned").len()
  }

  /// True when nothing is cached.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Number of lookups served from the cache.
  pub fn hits(&self) -> u64 {
    self.hits.load(Ordering::Relaxed)
  }

  /// Number of lookups that had to compute.
  pub fn misses(&self) -> u64 {
    self.misses.load(Ordering::Relaxed)
  }
}
