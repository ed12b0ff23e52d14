//! Pareto dominance over behavioral scores, and divide-and-conquer
//! extraction of the non-dominated subset. The recursion carries an
//! explicit job budget: each split may push one half onto a worker
//! thread and hands each side half the remaining budget.

use crate::score::BehavioralScore;

/// Outcome of comparing two behavioral scores.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Dominance {
  /// The first score dominates the second.
  Dominates,
  /// The second score dominates the first.
  DominatedBy,
  /// Neither dominates the other.
  Incomparable,
}

/// Compares two behavioral scores component-wise. `x` dominates `y`
/// iff no component of `x` is behind and at least one is strictly
/// ahead. An empty vector is dominated by every non-empty one; two
/// empty vectors are incomparable.
pub fn dominates(x: &[f64], y: &[f64]) -> Dominance {
  if x.is_empty() {
    return if y.is_empty() {
      Dominance::Incomparable
    } else {
      Dominance::DominatedBy
    };
  }
  if y.is_empty() {
    return Dominance::Dominates;
  }
  let mut ahead: Option<bool> = None;
  for (a, b) in x.iter().zip(y) {
    if a > b {
      if ahead == Some(false) {
        return Dominance::Incomparable;
      }
      ahead = Some(true);
    } else if b > a {
      if ahead == Some(true) {
        return Dominance::Incomparable;
      }
      ahead = Some(false);
    }
  }
  match ahead {
    Some(true) => Dominance::Dominates,
    Some(false) => Dominance::DominatedBy,
    None => Dominance::Incomparable,
  }
}

/// Indices of the non-dominated elements of `scores`, sorted
/// ascending. The extraction is deterministic in content for any job
/// budget; `jobs` only bounds the parallelism.
pub fn non_dominated(scores: &[BehavioralScore], jobs: usize) -> Vec<usize> {
  let idxs: Vec<usize> = (0..scores.len()).collect();
  let mut result = non_dominated_rec(scores, idxs, jobs.max(1));
  result.sort_unstable();
  result
}

fn non_dominated_rec(
  scores: &[BehavioralScore],
  mut idxs: Vec<usize>,
  jobs: usize,
) -> Vec<usize> {
  if idxs.len() < 2 {
    return idxs;
  }
  let right = idxs.split_off(idxs.len() / 2);
  let left = idxs;
  let (left_nd, right_nd) = if jobs > 1 {
    rayon::join(
      || non_dominated_rec(scores, left, jobs / 2),
      || non_dominated_rec(scores, right, jobs - jobs / 2),
    )
  } else {
    (
      non_dominated_rec(scores, left, 1),
      non_dominated_rec(scores, right, 1),
    )
  };
  let (mut keep, keep_right) =
    non_dominated_disjoint(scores, &left_nd, &right_nd, jobs);
  keep.extend(keep_right);
  keep
}

/// Given two internally non-dominated index sets, returns the subsets
/// of each that survive against the other.
fn non_dominated_disjoint(
  scores: &[BehavioralScore],
  a: &[usize],
  b: &[usize],
  jobs: usize,
) -> (Vec<usize>, Vec<usize>) {
  if a.is_empty() || b.is_empty() {
    return (a.to_vec(), b.to_vec());
  }
  if a.len() == 1 {
    let x = a[0];
    let mut keep_b = Vec::new();
    let mut keep_x = true;
    for (i, &y) in b.iter().enumerate() {
      match dominates(&scores[x], &scores[y]) {
        // x falls: everything left in b survives untested
        Dominance::DominatedBy => {
          keep_x = false;
          keep_b.extend_from_slice(&b[i..]);
          break;
        }
        Dominance::Incomparable => keep_b.push(y),
        Dominance::Dominates => {}
      }
    }
    return (if keep_x { vec![x] } else { Vec::new() }, keep_b);
  }
  let (a1, a2) = a.split_at(a.len() / 2);
  if jobs > 1 {
    let ((mut r1, b1), (r2, b2)) = rayon::join(
      || non_dominated_disjoint(scores, a1, b, jobs / 2),
      || non_dominated_disjoint(scores, a2, b, jobs - jobs / 2),
    );
    r1.extend(r2);
    (r1, intersect(b1, b2))
  } else {
    let (mut r1, b1) = non_dominated_disjoint(scores, a1, b, 1);
    let (r2, b2) = non_dominated_disjoint(scores, a2, &b1, 1);
    r1.extend(r2);
    (r1, b2)
  }
}

/// Intersection of two index sets.
fn intersect(mut x: Vec<usize>, mut y: Vec<usize>) -> Vec<usize> {
  x.sort_unstable();
  y.sort_unstable();
  let mut out = Vec::with_capacity(x.len().min(y.len()));
  let (mut i, mut j) = (0, 0);
  while i < x.len() && j < y.len() {
    match x[i].cmp(&y[j]) {
      std::cmp::Ordering::Less => i += 1,
      std::cmp::Ordering::Greater => j += 1,
      std::cmp::Ordering::Equal => {
        out.push(x[i]);
        i += 1;
        j += 1;
      }
    }
  }
  out
}
