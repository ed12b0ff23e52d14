//! Deme expansion: decorates an exemplar with knobs, runs the
//! numerical optimizer over the resulting deme and hands the scored
//! instances back for merging.

use std::{collections::HashSet, sync::Arc};

use log::{debug, warn};

use crate::{
  deme::Deme,
  field::Instance,
  optimizer::Optimizer,
  representation::{KnobBuilder, KnobRequest, Representation, Signature},
  score::CompositeScorer,
  search::SearchParams,
  tree::{Arity, Tree},
};

/// Expands one exemplar at a time into a deme. Holds the knob builder,
/// the optimizer and the scorer; owns the representation and deme of
/// the expansion in flight.
pub struct DemeExpander {
  builder: Arc<dyn KnobBuilder>,
  optimizer: Arc<dyn Optimizer>,
  cscorer: Arc<dyn CompositeScorer>,
  signature: Signature,
  params: SearchParams,
  rep: Option<Representation>,
  deme: Option<Deme>,
  /// Inputs the current deme cannot touch; passed to the scorer as a
  /// per-call hint so scorer state is never mutated across expansions.
  ignore_hint: HashSet<Arity>,
}

impl DemeExpander {
  /// An expander with no deme in flight.
  pub fn new(
    signature: Signature,
    builder: Arc<dyn KnobBuilder>,
    optimizer: Arc<dyn Optimizer>,
    cscorer: Arc<dyn CompositeScorer>,
    params: SearchParams,
  ) -> Self {
    DemeExpander {
      builder,
      optimizer,
      cscorer,
      signature,
      params,
      rep: None,
      deme: None,
      ignore_hint: HashSet::new(),
    }
  }

  /// Builds a representation around the exemplar and opens an empty
  /// deme for it. Returns false when the exemplar is not expandable,
  /// in which case the caller picks another exemplar.
  ///
  /// # Panics
  ///
  /// Panics if the previous deme was not freed.
  pub fn create_deme(&mut self, exemplar: &Tree) -> bool {
    assert!(self.rep.is_none(), "previous representation was not freed");
    assert!(self.deme.is_none(), "previous deme was not freed");
    debug!("attempt to build representation from exemplar: {exemplar}");

    let mut ignore = self.params.ignore_args.clone();
    self.ignore_hint.clear();
    if let Some(selector) = &self.params.feature_selector {
      // arguments neither selected as informative nor already present
      // in the exemplar are kept out of this deme entirely
      let selected = selector(exemplar);
      let present = exemplar.arguments();
      for arg in 0..self.signature.arity {
        if !selected.contains(&arg) && !present.contains(&arg) {
          ignore.insert(arg);
        }
      }
      self.ignore_hint.clone_from(&ignore);
    }

    let rep = self.builder.build(&KnobRequest {
      exemplar,
      signature: &self.signature,
      ignore_args: &ignore,
      perceptions: &self.params.perceptions,
      actions: &self.params.actions,
      simplify_candidate: &self.params.simplify_candidate,
      simplify_knob_building: &self.params.simplify_knob_building,
    });
    if rep.fields().is_empty() {
      warn!("the representation is empty; exemplar {exemplar} skipped");
      return false;
    }
    debug!("representation carries {} knobs", rep.fields().len());
    self.rep = Some(rep);
    self.deme = Some(Deme::new());
    true
  }

  /// Runs the optimizer on the open deme with a scorer that
  /// materializes each probed instance. Returns the evaluations spent.
  ///
  /// # Panics
  ///
  /// Panics if no deme is open.
  pub fn optimize_deme(&mut self, max_evals: usize) -> usize {
    debug!("optimize deme; max evaluations allowed: {max_evals}");
    let DemeExpander {
      rep,
      deme,
      optimizer,
      cscorer,
      ignore_hint,
      ..
    } = self;
    let rep: &Representation = rep.as_ref().expect("no deme was created");
    let deme = deme.as_mut().expect("no deme was created");
    let cscorer: &dyn CompositeScorer = &**cscorer;
    let ignore_hint: &HashSet<Arity> = ignore_hint;
    let scorer = |instance: &Instance| {
      let candidate = rep.candidate(instance);
      cscorer.score_with_ignored(&candidate, ignore_hint)
    };
    optimizer.optimize(deme, rep, &scorer, max_evals)
  }

  /// The open deme and its representation, for merging.
  pub fn parts(&mut self) -> Option<(&mut Deme, &Representation)> {
    match (&mut self.deme, &self.rep) {
      (Some(deme), Some(rep)) => Some((deme, rep)),
      _ => None,
    }
  }

  /// Releases the representation and deme of the finished expansion.
  pub fn free_deme(&mut self) {
    self.deme = None;
    self.rep = None;
    self.ignore_hint.clear();
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use super::*;
  use crate::{
    optimizer::hill_climbing::HillClimbing,
    representation::logical::LogicalKnobBuilder,
    score::CompositeScore,
  };

  fn expander(
    arity: Arity,
    cscorer: Arc<dyn CompositeScorer>,
    params: SearchParams,
  ) -> DemeExpander {
    DemeExpander::new(
      Signature { arity },
      Arc::new(LogicalKnobBuilder::default()),
      Arc::new(HillClimbing),
      cscorer,
      params,
    )
  }

  fn flat() -> Arc<dyn CompositeScorer> {
    Arc::new(|t: &Tree| CompositeScore::new(0.0, t.complexity(), 0.0))
  }

  #[test]
  fn test_expand_optimize_free_cycle() {
    let params = SearchParams::builder().build();
    let mut dex = expander(3, flat(), params);
    assert!(dex.create_deme(&Tree::Arg(0)));
    let evals = dex.optimize_deme(50);
    assert!(evals > 0);
    let (deme, rep) = dex.parts().expect("deme is open");
    assert_eq!(deme.len(), evals);
    assert!(!rep.fields().is_empty());
    dex.free_deme();
    assert!(dex.parts().is_none());
    // the expander is reusable after freeing
    assert!(dex.create_deme(&Tree::Arg(1)));
  }

  #[test]
  fn test_unexpandable_exemplar() {
    let params = SearchParams::builder().build();
    let mut dex = expander(0, flat(), params);
    assert!(!dex.create_deme(&Tree::True));
    assert!(dex.parts().is_none());
  }

  #[test]
  fn test_feature_selector_narrows_the_deme() {
    struct HintRecorder(Mutex<Vec<Vec<Arity>>>);
    impl CompositeScorer for HintRecorder {
      fn score(&self, tree: &Tree) -> CompositeScore {
        CompositeScore::new(0.0, tree.complexity(), 0.0)
      }
      fn score_with_ignored(
        &self,
        tree: &Tree,
        ignored: &HashSet<Arity>,
      ) -> CompositeScore {
        let mut sorted: Vec<Arity> = ignored.iter().copied().collect();
        sorted.sort_unstable();
        self.0.lock().expect("poisoned").push(sorted);
        self.score(tree)
      }
    }

    let recorder = Arc::new(HintRecorder(Mutex::new(Vec::new())));
    let params = SearchParams::builder()
      .feature_selector(Some(Arc::new(|_: &Tree| HashSet::from([0]))))
      .build();
    let mut dex = expander(3, recorder.clone(), params);
    assert!(dex.create_deme(&Tree::Arg(0)));
    // arguments 1 and 2 are neither selected nor present: no knobs
    let (_, rep) = dex.parts().expect("deme is open");
    assert_eq!(rep.fields().len(), 1);
    dex.optimize_deme(10);
    let hints = recorder.0.lock().expect("poisoned");
    assert!(!hints.is_empty());
    assert!(hints.iter().all(|h| h == &[1, 2]));
  }
}
