//! Reference knob builder for boolean programs: every literal already
//! in the exemplar gets a three-way knob, every junctor is offered the
//! argument literals it lacks, and threshold literals additionally get
//! a continuous refinement knob.

use std::collections::HashSet;

use super::{
  DiscAction, Knob, KnobBuilder, KnobKind, KnobRequest, Representation,
};
use crate::tree::{Arity, Tree};

/// Knob builder over the boolean algebra of [`Tree`].
#[derive(Clone, Copy, Debug)]
pub struct LogicalKnobBuilder {
  /// Initial refinement step of threshold knobs.
  pub step_size: f64,
  /// Digit depth of threshold knobs.
  pub depth: u16,
}

impl Default for LogicalKnobBuilder {
  fn default() -> Self {
    LogicalKnobBuilder {
      step_size: 1.0,
      depth: 4,
    }
  }
}

impl KnobBuilder for LogicalKnobBuilder {
  fn build(&self, request: &KnobRequest<'_>) -> Representation {
    let seed = (request.simplify_knob_building)(request.exemplar.clone());
    let seed = canonize(seed);
    let mut knobs = Vec::new();
    let mut next = 0;
    let prototype = self.decorate(&seed, request, &mut knobs, &mut next);
    Representation::new(
      request.exemplar.clone(),
      prototype,
      knobs,
      request.simplify_candidate.clone(),
    )
  }
}

impl LogicalKnobBuilder {
  fn decorate(
    &self,
    node: &Tree,
    request: &KnobRequest<'_>,
    knobs: &mut Vec<Knob>,
    next: &mut usize,
  ) -> Tree {
    let id = *next;
    *next += 1;
    if is_literal(node) {
      // a present literal: zero keeps it as written
      knobs.push(Knob {
        node: id,
        kind: KnobKind::Disc {
          actions: vec![
            DiscAction::Keep,
            DiscAction::Remove,
            DiscAction::Negate,
          ],
        },
      });
      match node {
        Tree::Gt(_, c) => self.threshold_knob(knobs, id, c.0),
        // the threshold literal under the negation sits at the next id
        Tree::Not(inner) => {
          if let Tree::Gt(_, c) = inner.as_ref() {
            self.threshold_knob(knobs, id + 1, c.0);
          }
        }
        _ => {}
      }
      *next += node.size() - 1;
      return node.clone();
    }
    match node {
      Tree::And(cs) | Tree::Or(cs) => {
        let mut children: Vec<Tree> = cs
          .iter()
          .map(|c| self.decorate(c, request, knobs, next))
          .collect();
        let present: HashSet<Arity> =
          cs.iter().filter_map(literal_arg).collect();
        for arg in 0..request.signature.arity {
          if present.contains(&arg) || request.ignore_args.contains(&arg) {
            continue;
          }
          // a candidate literal: zero leaves it absent
          knobs.push(Knob {
            node: *next,
            kind: KnobKind::Disc {
              actions: vec![
                DiscAction::Remove,
                DiscAction::Keep,
                DiscAction::Negate,
              ],
            },
          });
          *next += 1;
          children.push(Tree::Arg(arg));
        }
        match node {
          Tree::And(_) => Tree::And(children),
          _ => Tree::Or(children),
        }
      }
      Tree::Not(c) => Tree::not(self.decorate(c, request, knobs, next)),
      leaf => leaf.clone(),
    }
  }

  fn threshold_knob(&self, knobs: &mut Vec<Knob>, node: usize, center: f64) {
    knobs.push(Knob {
      node,
      kind: KnobKind::Contin {
        center,
        step: self.step_size,
        depth: self.depth,
      },
    });
  }
}

/// Junctor roots decorate in place; anything else is wrapped so the
/// builder always has a junctor to offer candidate literals to.
fn canonize(tree: Tree) -> Tree {
  match tree {
    Tree::And(_) | Tree::Or(_) => tree,
    other => Tree::And(vec![other]),
  }
}

fn is_literal(tree: &Tree) -> bool {
  match tree {
    Tree::Arg(_) | Tree::Gt(..) => true,
    Tree::Not(inner) => matches!(inner.as_ref(), Tree::Arg(_) | Tree::Gt(..)),
    _ => false,
  }
}

fn literal_arg(tree: &Tree) -> Option<Arity> {
  match tree {
    Tree::Arg(i) | Tree::Gt(i, _) => Some(*i),
    Tree::Not(inner) => literal_arg(inner),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{representation::Signature, simplify};

  fn request<'a>(
    exemplar: &'a Tree,
    signature: &'a Signature,
    ignore: &'a HashSet<Arity>,
    rule: &'a crate::simplify::SimplifyRule,
  ) -> KnobRequest<'a> {
    KnobRequest {
      exemplar,
      signature,
      ignore_args: ignore,
      perceptions: &[],
      actions: &[],
      simplify_candidate: rule,
      simplify_knob_building: rule,
    }
  }

  #[test]
  fn test_zero_instance_roundtrip() {
    let exemplar = Tree::And(vec![Tree::Arg(0), Tree::not(Tree::Arg(1))]);
    let signature = Signature { arity: 4 };
    let ignore = HashSet::new();
    let rule = simplify::logical();
    let rep = LogicalKnobBuilder::default()
      .build(&request(&exemplar, &signature, &ignore, &rule));
    let zero = rep.fields().zero_instance();
    assert_eq!(rep.candidate(&zero), simplify::reduce(exemplar));
  }

  #[test]
  fn test_literal_and_candidate_knobs() {
    let exemplar = Tree::And(vec![Tree::Arg(0), Tree::Arg(1)]);
    let signature = Signature { arity: 4 };
    let ignore = HashSet::new();
    let rule = simplify::logical();
    let rep = LogicalKnobBuilder::default()
      .build(&request(&exemplar, &signature, &ignore, &rule));
    // two present literals plus candidates for the absent $2 and $3
    assert_eq!(rep.fields().len(), 4);

    let mut inst = rep.fields().zero_instance();
    rep.fields().disc_set(2, 2, &mut inst); // $2 enters negated
    assert_eq!(
      rep.candidate(&inst),
      simplify::reduce(Tree::And(vec![
        Tree::Arg(0),
        Tree::Arg(1),
        Tree::not(Tree::Arg(2)),
      ]))
    );
  }

  #[test]
  fn test_ignored_arguments_get_no_knobs() {
    let exemplar = Tree::And(vec![Tree::Arg(0)]);
    let signature = Signature { arity: 3 };
    let ignore = HashSet::from([1]);
    let rule = simplify::logical();
    let rep = LogicalKnobBuilder::default()
      .build(&request(&exemplar, &signature, &ignore, &rule));
    // knob on $0 plus a candidate for $2 only
    assert_eq!(rep.fields().len(), 2);
  }

  #[test]
  fn test_threshold_literal_gets_contin_knob() {
    let exemplar = Tree::And(vec![Tree::gt(0, 0.5)]);
    let signature = Signature { arity: 1 };
    let ignore = HashSet::new();
    let rule = simplify::logical();
    let builder = LogicalKnobBuilder {
      step_size: 0.25,
      depth: 3,
    };
    let rep =
      builder.build(&request(&exemplar, &signature, &ignore, &rule));
    assert!(rep
      .knobs()
      .iter()
      .any(|k| matches!(k.kind, KnobKind::Contin { .. })));
  }

  #[test]
  fn test_unexpandable_exemplar() {
    let exemplar = Tree::True;
    let signature = Signature { arity: 0 };
    let ignore = HashSet::new();
    let rule = simplify::logical();
    let rep = LogicalKnobBuilder::default()
      .build(&request(&exemplar, &signature, &ignore, &rule));
    assert!(rep.fields().is_empty());
  }
}
