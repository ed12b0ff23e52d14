//! Fitness scores and the scorer contracts. Scorers are pure functions
//! of a candidate tree; the only permitted side effect is internal
//! memoization, so they are shared freely across worker threads.

use std::{cmp::Ordering, collections::HashSet};

use crate::tree::{Arity, Tree};

/// An alias for a raw fitness score. Higher is better.
pub type Score = f64;

/// An alias for candidate complexity.
pub type Complexity = u32;

/// Per-example outcome vector of a candidate, used for Pareto
/// comparison and diversity distances. Its length is a property of the
/// scoring function and is the same for every candidate of a run.
pub type BehavioralScore = Vec<f64>;

/// A raw score bundled with the complexity of the candidate and the
/// penalties levied on it. Every non-sentinel score is finite.
#[derive(Clone, Copy, Debug)]
pub struct CompositeScore {
  /// Raw fitness.
  pub score: Score,
  /// Complexity of the scored candidate.
  pub complexity: Complexity,
  /// Penalty charged for that complexity.
  pub complexity_penalty: f64,
  /// Penalty charged for similarity to the rest of the population.
  pub diversity_penalty: f64,
}

impl CompositeScore {
  /// A score with no diversity penalty yet.
  pub fn new(
    score: Score,
    complexity: Complexity,
    complexity_penalty: f64,
  ) -> Self {
    CompositeScore {
      score,
      complexity,
      complexity_penalty,
      diversity_penalty: 0.0,
    }
  }

  /// The sentinel every real score beats.
  pub fn worst() -> Self {
    CompositeScore {
      score: f64::NEG_INFINITY,
      complexity: Complexity::MAX,
      complexity_penalty: 0.0,
      diversity_penalty: 0.0,
    }
  }

  /// Raw score minus both penalties; the ranking key of the
  /// metapopulation.
  pub fn penalized(&self) -> Score {
    self.score - self.complexity_penalty - self.diversity_penalty
  }

  /// False for the sentinel and for anything a misbehaving scorer
  /// produced.
  pub fn is_finite(&self) -> bool {
    self.score.is_finite()
      && self.complexity_penalty.is_finite()
      && self.diversity_penalty.is_finite()
  }
}

impl PartialEq for CompositeScore {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl Eq for CompositeScore {}

impl PartialOrd for CompositeScore {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for CompositeScore {
  /// Greater is better: higher penalized score first, lower complexity
  /// breaking ties.
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .penalized()
      .total_cmp(&other.penalized())
      .then_with(|| other.complexity.cmp(&self.complexity))
  }
}

/// Scores a candidate tree with a full composite score. May be
/// expensive; callers cache results.
pub trait CompositeScorer: Send + Sync {
  /// Composite score of the candidate.
  fn score(&self, tree: &Tree) -> CompositeScore;

  /// Like [`score`](CompositeScorer::score), with a hint listing input
  /// arguments the candidate's deme will never touch. Scorers backed by
  /// tabular data may skip those columns; the default ignores the hint.
  fn score_with_ignored(
    &self,
    tree: &Tree,
    _ignored: &HashSet<Arity>,
  ) -> CompositeScore {
    self.score(tree)
  }
}

impl<F> CompositeScorer for F
where
  F: Fn(&Tree) -> CompositeScore + Send + Sync,
{
  fn score(&self, tree: &Tree) -> CompositeScore {
    self(tree)
  }
}

/// Produces the per-example outcome vector whose component-wise order
/// defines Pareto dominance.
pub trait BehavioralScorer: Send + Sync {
  /// Behavioral score of the candidate.
  fn behavior(&self, tree: &Tree) -> BehavioralScore;
}

impl<F> BehavioralScorer for F
where
  F: Fn(&Tree) -> BehavioralScore + Send + Sync,
{
  fn behavior(&self, tree: &Tree) -> BehavioralScore {
    self(tree)
  }
}

/// Measures candidate complexity.
pub trait ComplexityScorer: Send + Sync {
  /// Complexity of the candidate.
  fn complexity(&self, tree: &Tree) -> Complexity;
}

impl<F> ComplexityScorer for F
where
  F: Fn(&Tree) -> Complexity + Send + Sync,
{
  fn complexity(&self, tree: &Tree) -> Complexity {
    self(tree)
  }
}

/// The structural complexity measure of [`Tree`] as a scorer.
#[derive(Clone, Copy, Debug, Default)]
pub struct TreeComplexity;

impl ComplexityScorer for TreeComplexity {
  fn complexity(&self, tree: &Tree) -> Complexity {
    tree.complexity()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_penalized() {
    let c = CompositeScore {
      score: 1.0,
      complexity: 4,
      complexity_penalty: 0.25,
      diversity_penalty: 0.5,
    };
    assert_eq!(c.penalized(), 0.25);
  }

  #[test]
  fn test_order_prefers_penalized_then_simplicity() {
    let strong = CompositeScore::new(2.0, 9, 0.0);
    let weak = CompositeScore::new(1.0, 1, 0.0);
    assert!(strong > weak);

    let simple = CompositeScore::new(1.0, 2, 0.0);
    let bulky = CompositeScore::new(1.0, 8, 0.0);
    assert!(simple > bulky);
  }

  #[test]
  fn test_worst_loses_to_everything() {
    let worst = CompositeScore::worst();
    assert!(!worst.is_finite());
    assert!(worst < CompositeScore::new(-1.0e9, 1000, 50.0));
  }

  #[test]
  fn test_scorers_from_closures() {
    fn as_cscorer<S: CompositeScorer>(_: &S) {}
    fn as_bscorer<S: BehavioralScorer>(_: &S) {}
    let c = |t: &Tree| CompositeScore::new(0.0, t.complexity(), 0.0);
    let b = |_: &Tree| vec![0.0, 1.0];
    as_cscorer(&c);
    as_bscorer(&b);
    assert_eq!(b.behavior(&Tree::True), vec![0.0, 1.0]);
  }

  #[test]
  fn test_tree_complexity_scorer() {
    let t = Tree::And(vec![Tree::Arg(0), Tree::True]);
    assert_eq!(TreeComplexity.complexity(&t), 2);
  }
}
