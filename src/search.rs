//! The outer search loop: select an exemplar, expand it into a deme,
//! optimize the deme, merge the result, until a termination condition
//! fires.

use std::{
  collections::HashSet,
  sync::Arc,
  time::{Duration, Instant},
};

use log::info;
use typed_builder::TypedBuilder;

use crate::{
  expander::DemeExpander,
  metapop::{Metapopulation, ScoredTree},
  optimizer::Optimizer,
  representation::{KnobBuilder, Signature},
  score::{BehavioralScorer, CompositeScorer, Score},
  simplify::{self, SimplifyRule},
  tree::{Arity, Tree},
};

/// Called after each merge with the accepted candidates; returning true
/// halts the search.
pub type MergeCallback = Arc<dyn Fn(&[ScoredTree]) -> bool + Send + Sync>;

/// Returns the argument indices deemed informative for an exemplar.
/// Arguments neither selected nor already present in the exemplar are
/// kept out of its deme.
pub type FeatureSelector =
  Arc<dyn Fn(&Tree) -> HashSet<Arity> + Send + Sync>;

/// Control parameters of the search.
///
/// # Examples
///
/// ```
/// use metapop::search::SearchParams;
///
/// let params = SearchParams::builder()
///   .complexity_temperature(8.0)
///   .max_evals(50_000)
///   .jobs(4)
///   .seed(42)
///   .build();
/// assert!(params.include_dominated);
/// ```
#[derive(Clone, TypedBuilder)]
pub struct SearchParams {
  /// Merge candidates regardless of Pareto dominance. When false,
  /// dominated candidates are filtered out of every merge.
  #[builder(default = true)]
  pub include_dominated: bool,
  /// Compute behavioral scores even when no filter needs them.
  #[builder(default = false)]
  pub keep_bscore: bool,
  /// Strength of the diversity penalty; zero disables it.
  #[builder(default = 0.0)]
  pub diversity_pressure: f64,
  /// Exponent distorting pairwise diversity penalties; zero means the
  /// maximum is used instead of a generalized mean.
  #[builder(default = 0.0)]
  pub diversity_exponent: f64,
  /// Norm of the behavioral distance: 1, 2 or infinity.
  #[builder(default = 2.0)]
  pub diversity_p_norm: f64,
  /// Boltzmann temperature of exemplar selection. Temperatures in the
  /// 6 to 12 range work best for most problems.
  #[builder(default = 6.0)]
  pub complexity_temperature: f64,
  /// Cap on candidates considered per merge; `None` means unlimited.
  #[builder(default = None)]
  pub max_candidates: Option<usize>,
  /// Worker threads for the parallel loops.
  #[builder(default = 1)]
  pub jobs: usize,
  /// Smallest population the resize pass will keep.
  #[builder(default = 250)]
  pub min_pool_size: usize,
  /// Master seed; worker draws derive from it deterministically.
  #[builder(default = 1)]
  pub seed: u64,
  /// Total budget of scorer evaluations.
  #[builder(default = 10_000)]
  pub max_evals: usize,
  /// Stop once the best raw score reaches this value.
  #[builder(default = None)]
  pub target_score: Option<Score>,
  /// Stop once this much wall-clock time has elapsed.
  #[builder(default = None)]
  pub max_time: Option<Duration>,
  /// Arguments the knob builder must never introduce.
  #[builder(default)]
  pub ignore_args: HashSet<Arity>,
  /// Optional per-exemplar feature selection.
  #[builder(default = None)]
  pub feature_selector: Option<FeatureSelector>,
  /// Optional halt decision after each merge.
  #[builder(default = None)]
  pub merge_callback: Option<MergeCallback>,
  /// Rule applied to every materialized candidate.
  #[builder(default = simplify::logical())]
  pub simplify_candidate: SimplifyRule,
  /// Rule applied to exemplars before knob building.
  #[builder(default = simplify::logical())]
  pub simplify_knob_building: SimplifyRule,
  /// Term table of perception subtrees handed to the knob builder.
  #[builder(default)]
  pub perceptions: Vec<Tree>,
  /// Term table of action subtrees handed to the knob builder.
  #[builder(default)]
  pub actions: Vec<Tree>,
}

/// Why a run stopped.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Termination {
  /// The evaluation budget ran out.
  BudgetExhausted,
  /// The best raw score reached the target.
  TargetReached,
  /// The wall-clock limit ran out.
  TimeLimit,
  /// The merge callback asked to stop.
  CallbackHalt,
  /// Every member of the metapopulation has been tried as an exemplar.
  ExemplarsExhausted,
}

/// Per-run counters, carried explicitly rather than in globals.
#[derive(Clone, Copy, Debug)]
pub struct SearchContext {
  /// Scorer evaluations spent so far.
  pub evals_used: usize,
  /// When the run started.
  pub start: Instant,
}

/// What a finished run hands back.
#[derive(Clone, Debug)]
pub struct SearchResult {
  /// Candidates achieving the best composite score.
  pub best: Vec<ScoredTree>,
  /// Why the run stopped.
  pub termination: Termination,
  /// Scorer evaluations the run spent.
  pub evals_used: usize,
}

/// A wired-up search: the metapopulation, the expander and the driver
/// loop.
pub struct Search {
  metapop: Metapopulation,
  expander: DemeExpander,
  params: SearchParams,
  context: SearchContext,
}

impl Search {
  /// Wires the components together and seeds the metapopulation with
  /// the exemplars.
  pub fn new(
    exemplars: Vec<Tree>,
    signature: Signature,
    builder: Arc<dyn KnobBuilder>,
    optimizer: Arc<dyn Optimizer>,
    cscorer: Arc<dyn CompositeScorer>,
    bscorer: Arc<dyn BehavioralScorer>,
    params: SearchParams,
  ) -> Self {
    // size the worker pool once; if a pool already exists, keep it
    let _ = rayon::ThreadPoolBuilder::new()
      .num_threads(params.jobs)
      .build_global();
    let metapop = Metapopulation::new(
      exemplars,
      cscorer.clone(),
      bscorer,
      params.clone(),
    );
    let expander = DemeExpander::new(
      signature,
      builder,
      optimizer,
      cscorer,
      params.clone(),
    );
    Search {
      metapop,
      expander,
      params,
      context: SearchContext {
        evals_used: 0,
        start: Instant::now(),
      },
    }
  }

  /// The population being searched.
  pub fn metapop(&self) -> &Metapopulation {
    &self.metapop
  }

  /// The run's counters.
  pub fn context(&self) -> &SearchContext {
    &self.context
  }

  /// Runs the driver loop to termination and returns the best set.
  pub fn run(&mut self) -> SearchResult {
    self.context.start = Instant::now();
    let termination = loop {
      if self.context.evals_used >= self.params.max_evals {
        break Termination::BudgetExhausted;
      }
      if let Some(target) = self.params.target_score {
        if self.metapop.best_composite_score().score >= target {
          break Termination::TargetReached;
        }
      }
      if let Some(limit) = self.params.max_time {
        if self.context.start.elapsed() >= limit {
          break Termination::TimeLimit;
        }
      }
      let Some(exemplar) = self.metapop.select_exemplar() else {
        break Termination::ExemplarsExhausted;
      };
      if !self.expander.create_deme(&exemplar) {
        // not expandable; the exemplar is already marked visited
        continue;
      }
      let budget = self.params.max_evals - self.context.evals_used;
      let evals = self.expander.optimize_deme(budget);
      self.context.evals_used += evals;
      let (deme, rep) =
        self.expander.parts().expect("deme was just optimized");
      let halt = self.metapop.merge_deme(deme, rep, evals);
      self.expander.free_deme();
      if halt {
        break Termination::CallbackHalt;
      }
    };
    info!(
      "search stopped ({termination:?}) after {} evaluations and {} merges",
      self.context.evals_used,
      self.metapop.merge_count()
    );
    self.metapop.log_best_candidates();
    SearchResult {
      best: self.metapop.best_candidates(),
      termination,
      evals_used: self.context.evals_used,
    }
  }
}
