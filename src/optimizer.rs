//! Abstract deme optimizer.

pub mod hill_climbing;

use crate::{
  deme::Deme, field::Instance, representation::Representation,
  score::CompositeScore,
};

/// Scores a packed knob assignment. The expander builds one of these
/// per deme: it materializes the candidate and runs the composite
/// scorer on it.
pub type InstanceScorer<'a> = dyn Fn(&Instance) -> CompositeScore + Sync + 'a;

/// Represents an abstract numerical optimizer searching the knob
/// settings of one deme.
pub trait Optimizer: Send + Sync {
  /// Fills `deme` with scored instances of `rep`'s field layout, using
  /// at most `max_evals` scorer calls, and returns the number of
  /// evaluations spent.
  fn optimize(
    &self,
    deme: &mut Deme,
    rep: &Representation,
    scorer: &InstanceScorer<'_>,
    max_evals: usize,
  ) -> usize;
}

impl<F> Optimizer for F
where
  F: Fn(&mut Deme, &Representation, &InstanceScorer<'_>, usize) -> usize
    + Send
    + Sync,
{
  fn optimize(
    &self,
    deme: &mut Deme,
    rep: &Representation,
    scorer: &InstanceScorer<'_>,
    max_evals: usize,
  ) -> usize {
    self(deme, rep, scorer, max_evals)
  }
}
