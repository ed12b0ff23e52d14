//! The metapopulation: a score-ordered multiset of scored trees with
//! Boltzmann exemplar selection and a thread-safe merge pipeline.
//! Between merges the order is total and stable; within a merge the set
//! of accepted candidates is deterministic for a given seed and worker
//! count, but their insertion order is not, so consumers always re-read
//! through the sorted view.

use std::{
  cmp::Ordering,
  collections::{hash_map::Entry, HashMap, HashSet},
  io,
  sync::{
    atomic::{AtomicU64, Ordering as AtomicOrdering},
    Arc, RwLock,
  },
};

use log::{debug, info};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;

use crate::{
  deme::Deme,
  diversity::{CandidateId, DiversityCache},
  dominance,
  representation::Representation,
  score::{BehavioralScore, BehavioralScorer, CompositeScore, CompositeScorer},
  search::SearchParams,
  tree::Tree,
};

/// Members never touched by the random eviction pass of a resize.
const KEEP_TOP: usize = 50;

/// A candidate tree with its behavioral and composite scores; the
/// population element.
#[derive(Clone, Debug)]
pub struct ScoredTree {
  /// The candidate program.
  pub tree: Tree,
  /// Per-example outcomes; empty when behavioral scoring is off.
  pub behavior: BehavioralScore,
  /// Composite score, including the current diversity penalty.
  pub score: CompositeScore,
  id: CandidateId,
}

impl ScoredTree {
  /// A candidate that has not been given a population id yet.
  pub fn new(
    tree: Tree,
    behavior: BehavioralScore,
    score: CompositeScore,
  ) -> Self {
    ScoredTree {
      tree,
      behavior,
      score,
      id: 0,
    }
  }

  /// Stable id assigned on insertion; keys the diversity cache.
  pub fn id(&self) -> CandidateId {
    self.id
  }
}

/// The total order of the population: descending penalized score,
/// ascending complexity, then structural tree order.
fn candidate_order(a: &ScoredTree, b: &ScoredTree) -> Ordering {
  b.score.cmp(&a.score).then_with(|| a.tree.cmp(&b.tree))
}

/// Counters of candidates the merge pipeline turned away.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeStats {
  /// Candidates with non-finite scores.
  pub skipped: u64,
  /// Candidates dropped as duplicates of visited, proposed or present
  /// trees.
  pub deduped: u64,
}

/// Flags of the streaming dump.
#[derive(Clone, Copy, Debug)]
pub struct DumpFlags {
  /// Print the raw score.
  pub score: bool,
  /// Print complexity and penalties.
  pub penalty: bool,
  /// Print the behavioral score.
  pub bscore: bool,
  /// Print only candidates whose raw score matches the best listed.
  pub only_bests: bool,
  /// Render trees in Python syntax.
  pub python_syntax: bool,
}

impl Default for DumpFlags {
  fn default() -> Self {
    DumpFlags {
      score: true,
      penalty: false,
      bscore: false,
      only_bests: false,
      python_syntax: false,
    }
  }
}

/// Everything the merge mutex guards.
struct Store {
  /// Members in the total order; position 0 is the best.
  members: Vec<ScoredTree>,
  /// Mirror of member trees for O(1) membership tests.
  trees: HashSet<Tree>,
  /// Trees already used as exemplars. Grows for the whole run.
  visited: HashSet<Tree>,
  best_score: CompositeScore,
  best: Vec<ScoredTree>,
  merge_count: u64,
  next_id: CandidateId,
  rng: StdRng,
}

/// Population cap after `merge_count` merges. Grows linearly with an
/// early-run surplus that decays over the first few hundred merges.
fn population_cap(merge_count: u64) -> usize {
  let n = merge_count as f64;
  (50.0 * (n + 250.0) * (1.0 + 2.0 * (-n / 500.0).exp())) as usize
}

/// The score-ordered population of scored trees.
pub struct Metapopulation {
  params: SearchParams,
  cscorer: Arc<dyn CompositeScorer>,
  bscorer: Arc<dyn BehavioralScorer>,
  diversity: DiversityCache,
  store: RwLock<Store>,
  skipped: AtomicU64,
  deduped: AtomicU64,
}

impl Metapopulation {
  /// Seeds the population with the given exemplars, simplified and
  /// scored.
  ///
  /// # Panics
  ///
  /// Panics if the temperature is not positive or no exemplar earns a
  /// finite score.
  pub fn new(
    exemplars: Vec<Tree>,
    cscorer: Arc<dyn CompositeScorer>,
    bscorer: Arc<dyn BehavioralScorer>,
    params: SearchParams,
  ) -> Self {
    assert!(
      params.complexity_temperature > 0.0,
      "complexity temperature must be positive"
    );
    let diversity = DiversityCache::new(
      params.diversity_p_norm,
      params.diversity_pressure,
      params.diversity_exponent,
    );
    let metapop = Metapopulation {
      store: RwLock::new(Store {
        members: Vec::new(),
        trees: HashSet::new(),
        visited: HashSet::new(),
        best_score: CompositeScore::worst(),
        best: Vec::new(),
        merge_count: 0,
        next_id: 0,
        rng: StdRng::seed_from_u64(params.seed),
      }),
      diversity,
      cscorer,
      bscorer,
      params,
      skipped: AtomicU64::new(0),
      deduped: AtomicU64::new(0),
    };

    let mut seeds = Vec::new();
    for base in exemplars {
      let tree = (metapop.params.simplify_candidate)(base);
      let score = metapop.cscorer.score(&tree);
      if !score.is_finite() {
        debug!("seed exemplar {tree} scored non-finite, skipped");
        continue;
      }
      let behavior = if metapop.needs_behavior() {
        metapop.bscorer.behavior(&tree)
      } else {
        Vec::new()
      };
      seeds.push(ScoredTree::new(tree, behavior, score));
    }
    seeds.sort_by(candidate_order);
    seeds.dedup_by(|a, b| a.tree == b.tree);
    assert!(!seeds.is_empty(), "no seed exemplar earned a finite score");
    metapop.update_best_candidates(&seeds);
    {
      let mut store = metapop.write();
      let store = &mut *store;
      for mut seed in seeds {
        if store.trees.insert(seed.tree.clone()) {
          seed.id = store.next_id;
          store.next_id += 1;
          store.members.push(seed);
        }
      }
      store.members.sort_by(candidate_order);
    }
    metapop
  }

  fn read(&self) -> std::sync::RwLockReadGuard<'_, Store> {
    self.store.read().expect("metapopulation lock poisoned")
  }

  fn write(&self) -> std::sync::RwLockWriteGuard<'_, Store> {
    self.store.write().expect("metapopulation lock poisoned")
  }

  fn needs_behavior(&self) -> bool {
    self.params.keep_bscore
      || !self.params.include_dominated
      || self.params.diversity_pressure > 0.0
  }

  /// The band of penalized scores Boltzmann selection can still reach
  /// below the top.
  pub fn useful_score_range(&self) -> f64 {
    self.params.complexity_temperature * 30.0 / 100.0
  }

  /// Draws the next exemplar by Boltzmann roulette over non-visited
  /// members and marks it visited before returning. `None` means every
  /// member has been tried and the search is out of exemplars.
  ///
  /// # Panics
  ///
  /// Panics if the population is empty, or if the weight sum vanishes
  /// while unvisited candidates remain.
  pub fn select_exemplar(&self) -> Option<Tree> {
    let mut store = self.write();
    let store = &mut *store;
    assert!(
      !store.members.is_empty(),
      "empty metapopulation in select_exemplar"
    );

    if store.members.len() == 1 {
      let tree = store.members[0].tree.clone();
      if store.visited.insert(tree.clone()) {
        debug!("selected the only member: {tree}");
        return Some(tree);
      }
      debug!("no unvisited exemplar left");
      return None;
    }

    let mut top = f64::NEG_INFINITY;
    let mut any = false;
    let selectable: Vec<Option<f64>> = store
      .members
      .iter()
      .map(|m| {
        if store.visited.contains(&m.tree) {
          None
        } else {
          let p = m.score.penalized();
          top = top.max(p);
          any = true;
          Some(p)
        }
      })
      .collect();
    if !any {
      debug!("no unvisited exemplar left");
      return None;
    }

    let inv_temp = 100.0 / self.params.complexity_temperature;
    let weights: Vec<f64> = selectable
      .iter()
      .map(|p| p.map_or(0.0, |p| ((p - top) * inv_temp).exp()))
      .collect();
    let sum: f64 = weights.iter().sum();
    assert!(sum > 0.0, "zero selection weight over unvisited candidates");

    let chosen = roulette(&weights, sum, &mut store.rng);
    let tree = store.members[chosen].tree.clone();
    store.visited.insert(tree.clone());
    debug!(
      "selected the {}th exemplar: {} (penalized {})",
      chosen + 1,
      tree,
      store.members[chosen].score.penalized()
    );
    Some(tree)
  }

  /// Folds an optimized deme back into the population: decodes the
  /// winning instances, filters, scores behavior where needed, updates
  /// the best-so-far record, merges, resizes and reweighs diversity.
  /// Returns true when the merge callback requests termination.
  pub fn merge_deme(
    &self,
    deme: &mut Deme,
    rep: &Representation,
    evals: usize,
  ) -> bool {
    // univariate optimizers may report more evaluations than the deme
    // holds; clamp rather than trust the report
    let mut evals = evals.min(deme.len());
    self.write().merge_count += 1;
    debug!("close deme; evaluations performed: {evals}");
    if deme.is_empty() {
      return false;
    }

    deme.sort();

    // drop the tail Boltzmann selection could never reach, but keep a
    // reasonable pool in case the top instances lead nowhere
    if self.params.min_pool_size < deme.len() {
      let floor =
        deme.items()[0].score.penalized() - self.useful_score_range();
      let mut cut = deme.len();
      while cut > self.params.min_pool_size
        && deme.items()[cut - 1].score.penalized() < floor
      {
        cut -= 1;
      }
      deme.truncate(cut);
      evals = evals.min(deme.len());
    }

    let take = self
      .params
      .max_candidates
      .unwrap_or(usize::MAX)
      .min(evals)
      .min(deme.len());
    let pool = &deme.items()[..take];
    debug!("select candidates to merge amongst {}", pool.len());

    // decode and filter in parallel; the proposed map dedups trees that
    // several instances decode to
    let proposed: RwLock<HashMap<Tree, CompositeScore>> =
      RwLock::new(HashMap::new());
    pool.par_iter().for_each(|si| {
      if !si.score.is_finite() {
        self.skipped.fetch_add(1, AtomicOrdering::Relaxed);
        return;
      }
      let tree = rep.candidate(&si.instance);
      if self.read().visited.contains(&tree) {
        self.deduped.fetch_add(1, AtomicOrdering::Relaxed);
        return;
      }
      {
        let seen = proposed.read().expect("proposed map poisoned");
        if seen.get(&tree).is_some_and(|best| *best >= si.score) {
          self.deduped.fetch_add(1, AtomicOrdering::Relaxed);
          return;
        }
      }
      let mut seen = proposed.write().expect("proposed map poisoned");
      match seen.entry(tree) {
        Entry::Vacant(slot) => {
          slot.insert(si.score);
        }
        // keep the better score so the outcome doesn't depend on
        // thread interleaving
        Entry::Occupied(mut slot) => {
          if si.score > *slot.get() {
            slot.insert(si.score);
          } else {
            self.deduped.fetch_add(1, AtomicOrdering::Relaxed);
          }
        }
      }
    });
    let proposed = proposed
      .into_inner()
      .expect("proposed map poisoned")
      .into_iter()
      .collect::<Vec<_>>();
    debug!("selected {} candidates to be merged", proposed.len());

    let need_behavior = self.needs_behavior();
    if need_behavior {
      debug!("compute behavioral scores of {} candidates", proposed.len());
    }
    let mut candidates: Vec<ScoredTree> = proposed
      .into_par_iter()
      .map(|(tree, score)| {
        let behavior = if need_behavior {
          self.bscorer.behavior(&tree)
        } else {
          Vec::new()
        };
        ScoredTree::new(tree, behavior, score)
      })
      .collect();

    {
      let store = self.read();
      let before = candidates.len();
      candidates.retain(|c| !store.trees.contains(&c.tree));
      let present = (before - candidates.len()) as u64;
      if present > 0 {
        debug!("{present} candidates were already in the metapopulation");
        self.deduped.fetch_add(present, AtomicOrdering::Relaxed);
      }
    }

    if !self.params.include_dominated && !candidates.is_empty() {
      let behaviors: Vec<BehavioralScore> =
        candidates.iter().map(|c| c.behavior.clone()).collect();
      let keep = dominance::non_dominated(&behaviors, self.params.jobs);
      debug!(
        "removed {} dominated candidates out of {}",
        candidates.len() - keep.len(),
        candidates.len()
      );
      let mut keep = keep.into_iter();
      let mut next = keep.next();
      candidates = candidates
        .into_iter()
        .enumerate()
        .filter_map(|(i, c)| {
          if Some(i) == next {
            next = keep.next();
            Some(c)
          } else {
            None
          }
        })
        .collect();
    }

    candidates.sort_by(candidate_order);
    self.update_best_candidates(&candidates);

    let halt = match &self.params.merge_callback {
      Some(callback) => callback(&candidates),
      None => false,
    };

    debug!(
      "merge {} candidates with the metapopulation",
      candidates.len()
    );
    let removed = {
      let mut store = self.write();
      let store = &mut *store;
      for mut candidate in candidates {
        if store.trees.insert(candidate.tree.clone()) {
          candidate.id = store.next_id;
          store.next_id += 1;
          store.members.push(candidate);
        }
      }
      store.members.sort_by(candidate_order);
      let before = store.members.len();
      let removed = resize(store, &self.params, self.useful_score_range());
      debug!(
        "resized the metapopulation from {before} to {}",
        store.members.len()
      );
      removed
    };
    self.diversity.erase_refs(&removed);

    if self.params.diversity_pressure > 0.0 {
      debug!("recompute diversity penalties of the metapopulation");
      self.set_diversity();
    }
    halt
  }

  /// Greedy maximum-diversity reordering: members migrate one by one
  /// into a new pool, each round penalizing what is left by its
  /// distorted distance to the latest pool member, then promoting the
  /// best penalized survivor.
  fn set_diversity(&self) {
    let mut store = self.write();
    let store = &mut *store;
    let exponent = self.params.diversity_exponent;
    let mut remaining: Vec<(ScoredTree, f64)> = std::mem::take(
      &mut store.members,
    )
    .into_iter()
    .map(|m| (m, 0.0))
    .collect();
    let mut pool: Vec<ScoredTree> = Vec::with_capacity(remaining.len());
    while !remaining.is_empty() {
      if let Some(last) = pool.last() {
        let pool_len = pool.len() as f64;
        remaining.par_iter_mut().for_each(|(member, acc)| {
          assert!(
            !member.behavior.is_empty(),
            "behavioral score is needed for diversity"
          );
          let ddp = self.diversity.distortion(
            (member.id, &member.behavior),
            (last.id, &last.behavior),
          );
          member.score.diversity_penalty = if exponent > 0.0 {
            *acc += ddp;
            (*acc / pool_len).powf(1.0 / exponent)
          } else {
            *acc = acc.max(ddp);
            *acc
          };
        });
      }
      let next = remaining
        .iter()
        .enumerate()
        .min_by(|(_, (a, _)), (_, (b, _))| candidate_order(a, b))
        .map(|(i, _)| i)
        .expect("remaining is non-empty");
      pool.push(remaining.remove(next).0);
    }
    store.members = pool;
    store.members.sort_by(candidate_order);
  }

  /// Records candidates into the best-so-far set: a higher raw score
  /// wins outright, an equal score with lower complexity replaces, an
  /// exact tie joins the set.
  pub fn update_best_candidates(&self, candidates: &[ScoredTree]) {
    if candidates.is_empty() {
      return;
    }
    let mut store = self.write();
    let store = &mut *store;
    let mut best_sc = store.best_score.score;
    let mut best_cpx = store.best_score.complexity;
    for candidate in candidates {
      let sc = candidate.score.score;
      let cpx = candidate.score.complexity;
      if sc > best_sc || (sc == best_sc && cpx <= best_cpx) {
        if sc > best_sc || cpx < best_cpx {
          store.best_score = candidate.score;
          best_sc = sc;
          best_cpx = cpx;
          store.best.clear();
          debug!("new best score: {sc} (complexity {cpx})");
        }
        if !store.best.iter().any(|b| b.tree == candidate.tree) {
          store.best.push(candidate.clone());
        }
      }
    }
  }

  /// The best composite score seen so far.
  pub fn best_composite_score(&self) -> CompositeScore {
    self.read().best_score
  }

  /// Every candidate achieving the best composite score.
  pub fn best_candidates(&self) -> Vec<ScoredTree> {
    self.read().best.clone()
  }

  /// The shortest tree among the best candidates.
  pub fn best_tree(&self) -> Option<Tree> {
    self
      .read()
      .best
      .iter()
      .min_by(|a, b| {
        a.tree.size().cmp(&b.tree.size()).then_with(|| a.tree.cmp(&b.tree))
      })
      .map(|b| b.tree.clone())
  }

  /// Logs the best candidates at info level.
  pub fn log_best_candidates(&self) {
    let store = self.read();
    if store.best.is_empty() {
      info!("no best candidates yet");
      return;
    }
    info!(
      "best score: {} (complexity {})",
      store.best_score.score, store.best_score.complexity
    );
    for candidate in &store.best {
      info!("{}", candidate.tree);
    }
  }

  /// Number of members.
  pub fn size(&self) -> usize {
    self.read().members.len()
  }

  /// Number of merges performed so far.
  pub fn merge_count(&self) -> u64 {
    self.read().merge_count
  }

  /// Number of trees already tried as exemplars.
  pub fn visited_count(&self) -> usize {
    self.read().visited.len()
  }

  /// The members in their total order, as of this call.
  pub fn snapshot(&self) -> Vec<ScoredTree> {
    self.read().members.clone()
  }

  /// Counters of candidates the merge pipeline turned away.
  pub fn stats(&self) -> MergeStats {
    MergeStats {
      skipped: self.skipped.load(AtomicOrdering::Relaxed),
      deduped: self.deduped.load(AtomicOrdering::Relaxed),
    }
  }

  /// The pairwise diversity cache.
  pub fn diversity_cache(&self) -> &DiversityCache {
    &self.diversity
  }

  /// Streams members in the total order, at most `limit` lines.
  pub fn ostream(
    &self,
    out: &mut dyn io::Write,
    limit: Option<usize>,
    flags: &DumpFlags,
  ) -> io::Result<()> {
    let store = self.read();
    let limit = limit.unwrap_or(usize::MAX);
    // the best raw score is not necessarily ranked first
    let best = if flags.only_bests {
      store
        .members
        .iter()
        .map(|m| m.score.score)
        .fold(f64::NEG_INFINITY, f64::max)
    } else {
      f64::NEG_INFINITY
    };
    let mut printed = 0;
    for member in &store.members {
      if printed >= limit {
        break;
      }
      if flags.only_bests && member.score.score < best {
        continue;
      }
      if flags.score {
        write!(out, "{} ", member.score.score)?;
      }
      if flags.python_syntax {
        write!(out, "{}", member.tree.to_python())?;
      } else {
        write!(out, "{}", member.tree)?;
      }
      if flags.penalty {
        write!(
          out,
          " [complexity {} penalty {} diversity {}]",
          member.score.complexity,
          member.score.complexity_penalty,
          member.score.diversity_penalty
        )?;
      }
      if flags.bscore {
        write!(out, " {:?}", member.behavior)?;
      }
      writeln!(out)?;
      printed += 1;
    }
    Ok(())
  }
}

/// Spins a roulette wheel over non-negative weights.
fn roulette(weights: &[f64], sum: f64, rng: &mut StdRng) -> usize {
  let mut spin = rng.gen::<f64>() * sum;
  for (i, w) in weights.iter().enumerate() {
    if *w <= 0.0 {
      continue;
    }
    spin -= w;
    if spin <= 0.0 {
      return i;
    }
  }
  // numeric slack can leave a sliver of spin; take the last live slot
  weights
    .iter()
    .rposition(|w| *w > 0.0)
    .expect("roulette over all-zero weights")
}

/// Shrinks the population: first cuts the tail that fell below the
/// reachable score band, then enforces the dynamic cap by uniform
/// eviction outside the protected top. Returns the evicted ids, sorted,
/// for the diversity-cache purge.
fn resize(
  store: &mut Store,
  params: &SearchParams,
  range: f64,
) -> Vec<CandidateId> {
  let mut removed = Vec::new();
  if store.members.len() > params.min_pool_size {
    let floor = store.members[0].score.penalized() - range;
    let mut cut = params.min_pool_size;
    while cut < store.members.len()
      && store.members[cut].score.penalized() >= floor
    {
      cut += 1;
    }
    for member in store.members.drain(cut..) {
      store.trees.remove(&member.tree);
      removed.push(member.id);
    }
  }
  let cap = population_cap(store.merge_count);
  while store.members.len() > cap {
    let which = store.rng.gen_range(KEEP_TOP..store.members.len());
    let member = store.members.remove(which);
    store.trees.remove(&member.tree);
    removed.push(member.id);
  }
  removed.sort_unstable();
  removed
}
