//! Deterministic neighborhood ascent over a deme's knob settings.

use rayon::prelude::*;

use super::{InstanceScorer, Optimizer};
use crate::{
  deme::Deme,
  field::{Field, FieldSet, Instance, Trit},
  representation::Representation,
};

/// Hill climbing from the zero instance. Each round scores every
/// single-field variation of the current center in a parallel batch,
/// appends them all to the deme, and recenters on the best strict
/// improvement; the climb stops when a round improves nothing or the
/// evaluation budget runs out.
#[derive(Clone, Copy, Debug, Default)]
pub struct HillClimbing;

impl Optimizer for HillClimbing {
  fn optimize(
    &self,
    deme: &mut Deme,
    rep: &Representation,
    scorer: &InstanceScorer<'_>,
    max_evals: usize,
  ) -> usize {
    let fields = rep.fields();
    if fields.is_empty() || max_evals == 0 {
      return 0;
    }
    let center = fields.zero_instance();
    let mut best = scorer(&center);
    let mut evals = 1;
    deme.push(center.clone(), best);
    let mut center = center;
    loop {
      let mut hood = neighborhood(fields, &center);
      hood.truncate(max_evals - evals);
      if hood.is_empty() {
        break;
      }
      let scores: Vec<_> = hood.par_iter().map(|inst| scorer(inst)).collect();
      evals += hood.len();
      let mut improved = false;
      for (inst, score) in hood.into_iter().zip(scores) {
        if score > best {
          best = score;
          center = inst.clone();
          improved = true;
        }
        deme.push(inst, score);
      }
      if !improved || evals >= max_evals {
        break;
      }
    }
    evals
  }
}

/// Every instance one field-edit away from `center`: all other values
/// of each discrete field, and the one-digit refinements and the
/// one-digit retreat of each continuous field.
fn neighborhood(fields: &FieldSet, center: &Instance) -> Vec<Instance> {
  let mut out = Vec::new();
  for (i, field) in fields.fields().iter().enumerate() {
    match *field {
      Field::Disc { card } | Field::Term { card } => {
        let current = fields.disc_get(i, center);
        for value in (0..card).filter(|v| *v != current) {
          let mut neighbor = center.clone();
          fields.disc_set(i, value, &mut neighbor);
          out.push(neighbor);
        }
      }
      Field::Contin { depth } => {
        let digits = fields.contin_get(i, center);
        let mut variants: Vec<Vec<Trit>> = Vec::new();
        if let Some((_, shorter)) = digits.split_last() {
          variants.push(shorter.to_vec());
        }
        if digits.len() < usize::from(depth) {
          for digit in [Trit::Left, Trit::Right] {
            let mut longer = digits.clone();
            longer.push(digit);
            variants.push(longer);
          }
        }
        for variant in variants {
          let mut neighbor = center.clone();
          fields.contin_set(i, &variant, &mut neighbor);
          out.push(neighbor);
        }
      }
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    representation::{Knob, KnobKind, Representation},
    score::CompositeScore,
    simplify,
    tree::Tree,
  };

  fn term_rep(card: u16) -> Representation {
    let table: Vec<Tree> = (0..u32::from(card)).map(Tree::Arg).collect();
    Representation::new(
      Tree::Arg(0),
      Tree::Arg(0),
      vec![Knob {
        node: 0,
        kind: KnobKind::Term { table },
      }],
      simplify::identity(),
    )
  }

  #[test]
  fn test_climbs_to_the_best_discrete_setting() {
    let rep = term_rep(8);
    let fields = rep.fields().clone();
    // favors setting 5
    let scorer = move |inst: &Instance| {
      let v = f64::from(fields.disc_get(0, inst));
      CompositeScore::new(-(v - 5.0).abs(), 1, 0.0)
    };
    let mut deme = Deme::new();
    let evals = HillClimbing.optimize(&mut deme, &rep, &scorer, 1000);
    assert_eq!(deme.len(), evals);
    deme.sort();
    assert_eq!(deme.items()[0].score.score, 0.0);
    assert_eq!(
      rep.fields().disc_get(0, &deme.items()[0].instance),
      5
    );
  }

  #[test]
  fn test_respects_evaluation_budget() {
    let rep = term_rep(16);
    let fields = rep.fields().clone();
    let scorer = move |inst: &Instance| {
      CompositeScore::new(f64::from(fields.disc_get(0, inst)), 1, 0.0)
    };
    let mut deme = Deme::new();
    let evals = HillClimbing.optimize(&mut deme, &rep, &scorer, 7);
    assert_eq!(evals, 7);
    assert_eq!(deme.len(), 7);
  }

  #[test]
  fn test_flat_landscape_stops_after_one_round() {
    let rep = term_rep(4);
    let scorer = |_: &Instance| CompositeScore::new(0.0, 1, 0.0);
    let mut deme = Deme::new();
    // zero instance plus its three neighbors, then no improvement
    let evals = HillClimbing.optimize(&mut deme, &rep, &scorer, 1000);
    assert_eq!(evals, 4);
  }

  #[test]
  fn test_empty_representation_is_a_noop() {
    let rep = Representation::new(
      Tree::True,
      Tree::True,
      Vec::new(),
      simplify::identity(),
    );
    let scorer = |_: &Instance| CompositeScore::new(0.0, 1, 0.0);
    let mut deme = Deme::new();
    assert_eq!(HillClimbing.optimize(&mut deme, &rep, &scorer, 100), 0);
    assert!(deme.is_empty());
  }

  #[test]
  fn test_contin_neighborhood() {
    let fields = FieldSet::new(vec![Field::Contin { depth: 2 }]);
    let zero = fields.zero_instance();
    // from the empty digit string: extend left or extend right
    assert_eq!(neighborhood(&fields, &zero).len(), 2);

    let mut one = fields.zero_instance();
    fields.contin_set(0, &[Trit::Left], &mut one);
    // retreat, extend left, extend right
    assert_eq!(neighborhood(&fields, &one).len(), 3);

    let mut full = fields.zero_instance();
    fields.contin_set(0, &[Trit::Left, Trit::Right], &mut full);
    // depth exhausted: only the retreat remains
    assert_eq!(neighborhood(&fields, &full).len(), 1);
  }
}
