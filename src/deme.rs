//! A deme: the scored knob assignments explored for one exemplar. All
//! instances of a deme share the representation that produced them.

use crate::{field::Instance, score::CompositeScore};

/// One evaluated knob assignment.
#[derive(Clone, Debug)]
pub struct ScoredInstance {
  /// The packed knob settings.
  pub instance: Instance,
  /// The composite score the assignment earned.
  pub score: CompositeScore,
}

/// A growable sequence of scored instances. The optimizer fills it; the
/// merge pipeline sorts it and reads it back. No mutation happens once
/// sorting begins.
#[derive(Debug, Default)]
pub struct Deme {
  items: Vec<ScoredInstance>,
}

impl Deme {
  /// An empty deme.
  pub fn new() -> Self {
    Deme::default()
  }

  /// Appends an evaluated instance.
  pub fn push(&mut self, instance: Instance, score: CompositeScore) {
    self.items.push(ScoredInstance { instance, score });
  }

  /// Number of evaluated instances.
  pub fn len(&self) -> usize {
    self.items.len()
  }

  /// True when nothing has been evaluated.
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  /// The evaluated instances, in their current order.
  pub fn items(&self) -> &[ScoredInstance] {
    &self.items
  }

  /// Sorts descending by composite score: best first.
  pub fn sort(&mut self) {
    self.items.sort_by(|a, b| b.score.cmp(&a.score));
  }

  /// Drops everything after the first `len` instances.
  pub fn truncate(&mut self, len: usize) {
    self.items.truncate(len);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::field::{Field, FieldSet};

  #[test]
  fn test_sort_is_descending_with_complexity_tiebreak() {
    let fs = FieldSet::new(vec![Field::Disc { card: 4 }]);
    let mut deme = Deme::new();
    for (value, score, complexity) in
      [(0, 1.0, 5), (1, 3.0, 9), (2, 3.0, 2), (3, 2.0, 1)]
    {
      let mut inst = fs.zero_instance();
      fs.disc_set(0, value, &mut inst);
      deme.push(inst, CompositeScore::new(score, complexity, 0.0));
    }
    deme.sort();
    let scores: Vec<_> = deme
      .items()
      .iter()
      .map(|si| (si.score.score, si.score.complexity))
      .collect();
    assert_eq!(
      scores,
      vec![(3.0, 2), (3.0, 9), (2.0, 1), (1.0, 5)]
    );
  }
}
