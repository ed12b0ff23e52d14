//! A knob-decorated program. A [`Representation`] couples a prototype
//! tree with the [`FieldSet`] describing its knobs and can materialize
//! a concrete candidate from any [`Instance`] of that layout.

pub mod logical;

use std::collections::{HashMap, HashSet};

use crate::{
  field::{DiscValue, Field, FieldSet, Instance, Trit},
  simplify::SimplifyRule,
  tree::{Arity, NodeId, Tree},
};

/// Setting of a discrete knob: what happens to the addressed subtree.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DiscAction {
  /// Leave the subtree as written.
  Keep,
  /// Remove the subtree.
  Remove,
  /// Negate the subtree.
  Negate,
}

/// The parameterization a knob applies at its tree location.
#[derive(Clone, Debug)]
pub enum KnobKind {
  /// Chooses one of at least two actions for the subtree.
  Disc {
    /// Action per discrete setting; the zero setting comes first.
    actions: Vec<DiscAction>,
  },
  /// Refines the threshold of a `Gt` literal. Every `Left`/`Right`
  /// digit moves the value by the current step and halves the step.
  Contin {
    /// Threshold at the zero setting.
    center: f64,
    /// Initial refinement step.
    step: f64,
    /// Maximum number of refinement digits.
    depth: u16,
  },
  /// Substitutes the subtree with an entry of a term table.
  Term {
    /// Alternative subtrees; the zero setting comes first.
    table: Vec<Tree>,
  },
}

/// A parameterization point attached to one prototype node.
#[derive(Clone, Debug)]
pub struct Knob {
  /// Preorder index of the addressed node in the prototype.
  pub node: NodeId,
  /// What the knob does there.
  pub kind: KnobKind,
}

impl Knob {
  fn field(&self) -> Field {
    match &self.kind {
      KnobKind::Disc { actions } => Field::Disc {
        card: actions.len() as DiscValue,
      },
      KnobKind::Contin { depth, .. } => Field::Contin { depth: *depth },
      KnobKind::Term { table } => Field::Term {
        card: table.len() as DiscValue,
      },
    }
  }
}

/// Type signature of the programs being searched: the number of input
/// arguments. The output is boolean.
#[derive(Clone, Copy, Debug)]
pub struct Signature {
  /// Number of input arguments.
  pub arity: Arity,
}

/// Everything a knob builder gets to work with.
pub struct KnobRequest<'a> {
  /// The exemplar to decorate.
  pub exemplar: &'a Tree,
  /// Signature of the search.
  pub signature: &'a Signature,
  /// Arguments the builder must not introduce.
  pub ignore_args: &'a HashSet<Arity>,
  /// Term table of perception subtrees, if the domain has any.
  pub perceptions: &'a [Tree],
  /// Term table of action subtrees, if the domain has any.
  pub actions: &'a [Tree],
  /// Rule applied to materialized candidates.
  pub simplify_candidate: &'a SimplifyRule,
  /// Rule applied to the exemplar before decorating it.
  pub simplify_knob_building: &'a SimplifyRule,
}

/// Decorates an exemplar with knobs. Injected at construction; the
/// search core never builds representations itself.
pub trait KnobBuilder: Send + Sync {
  /// Builds a representation for the exemplar. An empty field set in
  /// the result means the exemplar is not expandable.
  fn build(&self, request: &KnobRequest<'_>) -> Representation;
}

impl<F> KnobBuilder for F
where
  F: Fn(&KnobRequest<'_>) -> Representation + Send + Sync,
{
  fn build(&self, request: &KnobRequest<'_>) -> Representation {
    self(request)
  }
}

/// A prototype tree, its knobs and their packed layout. Owns its field
/// set exclusively; the exemplar is an immutable snapshot.
pub struct Representation {
  exemplar: Tree,
  prototype: Tree,
  fields: FieldSet,
  knobs: Vec<Knob>,
  simplify: SimplifyRule,
}

impl Representation {
  /// Assembles a representation; the field layout is derived from
  /// `knobs`, in order.
  ///
  /// # Panics
  ///
  /// Panics if a knob addresses a node outside the prototype or a
  /// discrete knob offers fewer than two actions.
  pub fn new(
    exemplar: Tree,
    prototype: Tree,
    knobs: Vec<Knob>,
    simplify: SimplifyRule,
  ) -> Self {
    let size = prototype.size();
    for knob in &knobs {
      assert!(
        knob.node < size,
        "knob addresses node {} of a {}-node prototype",
        knob.node,
        size
      );
    }
    let fields = FieldSet::new(knobs.iter().map(Knob::field).collect());
    Representation {
      exemplar,
      prototype,
      fields,
      knobs,
      simplify,
    }
  }

  /// The undecorated exemplar this representation was built from.
  pub fn exemplar(&self) -> &Tree {
    &self.exemplar
  }

  /// The decorated skeleton the knobs edit.
  pub fn prototype(&self) -> &Tree {
    &self.prototype
  }

  /// Packed layout of the knobs.
  pub fn fields(&self) -> &FieldSet {
    &self.fields
  }

  /// Knobs in field order.
  pub fn knobs(&self) -> &[Knob] {
    &self.knobs
  }

  /// Materializes the concrete tree a knob assignment encodes. Pure and
  /// deterministic; no simplification is applied.
  pub fn materialize(&self, instance: &Instance) -> Tree {
    let mut disc: HashMap<NodeId, DiscAction> = HashMap::new();
    let mut thresh: HashMap<NodeId, f64> = HashMap::new();
    let mut replace: HashMap<NodeId, &Tree> = HashMap::new();
    for (i, knob) in self.knobs.iter().enumerate() {
      match &knob.kind {
        KnobKind::Disc { actions } => {
          let setting = self.fields.disc_get(i, instance) as usize;
          disc.insert(knob.node, actions[setting]);
        }
        KnobKind::Contin { center, step, .. } => {
          let mut value = *center;
          let mut step = *step;
          for digit in self.fields.contin_get(i, instance) {
            match digit {
              Trit::Left => value -= step,
              Trit::Right => value += step,
              Trit::Stop => unreachable!("stop digit inside a decoded value"),
            }
            step *= 0.5;
          }
          thresh.insert(knob.node, value);
        }
        KnobKind::Term { table } => {
          let setting = self.fields.disc_get(i, instance) as usize;
          replace.insert(knob.node, &table[setting]);
        }
      }
    }
    let mut next = 0;
    rebuild(&self.prototype, &disc, &thresh, &replace, &mut next)
      .unwrap_or(Tree::True)
  }

  /// Materializes and simplifies a candidate.
  pub fn candidate(&self, instance: &Instance) -> Tree {
    (self.simplify)(self.materialize(instance))
  }
}

/// Rebuilds the prototype applying knob edits. The preorder counter
/// advances over every prototype node, including nodes whose result is
/// dropped, so knob addresses stay stable under removals.
fn rebuild(
  node: &Tree,
  disc: &HashMap<NodeId, DiscAction>,
  thresh: &HashMap<NodeId, f64>,
  replace: &HashMap<NodeId, &Tree>,
  next: &mut NodeId,
) -> Option<Tree> {
  let id = *next;
  *next += 1;
  let built = match node {
    Tree::And(cs) => Some(Tree::And(
      cs.iter()
        .filter_map(|c| rebuild(c, disc, thresh, replace, next))
        .collect(),
    )),
    Tree::Or(cs) => Some(Tree::Or(
      cs.iter()
        .filter_map(|c| rebuild(c, disc, thresh, replace, next))
        .collect(),
    )),
    Tree::Not(c) => rebuild(c, disc, thresh, replace, next).map(Tree::not),
    leaf => Some(leaf.clone()),
  };
  let built = match replace.get(&id) {
    Some(subtree) => Some((*subtree).clone()),
    None => built,
  };
  let built = match (thresh.get(&id), built) {
    (Some(&value), Some(Tree::Gt(arg, _))) => Some(Tree::gt(arg, value)),
    (Some(_), _) => {
      panic!("continuous knob must address a threshold literal")
    }
    (None, built) => built,
  };
  match disc.get(&id) {
    None | Some(DiscAction::Keep) => built,
    Some(DiscAction::Remove) => None,
    Some(DiscAction::Negate) => built.map(Tree::not),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::simplify;

  // and($0 not($1) gt(2 0.5)), ids: and=0, $0=1, not=2, $1=3, gt=4
  fn proto() -> Tree {
    Tree::And(vec![
      Tree::Arg(0),
      Tree::not(Tree::Arg(1)),
      Tree::gt(2, 0.5),
    ])
  }

  fn three_way(node: NodeId) -> Knob {
    Knob {
      node,
      kind: KnobKind::Disc {
        actions: vec![DiscAction::Keep, DiscAction::Remove, DiscAction::Negate],
      },
    }
  }

  fn rep() -> Representation {
    let knobs = vec![
      three_way(1),
      three_way(2),
      three_way(4),
      Knob {
        node: 4,
        kind: KnobKind::Contin {
          center: 0.5,
          step: 0.25,
          depth: 3,
        },
      },
    ];
    Representation::new(proto(), proto(), knobs, simplify::identity())
  }

  #[test]
  fn test_zero_instance_materializes_exemplar() {
    let rep = rep();
    let zero = rep.fields().zero_instance();
    assert_eq!(rep.materialize(&zero), proto());
  }

  #[test]
  fn test_disc_actions() {
    let rep = rep();
    let mut inst = rep.fields().zero_instance();
    rep.fields().disc_set(0, 1, &mut inst); // remove $0
    rep.fields().disc_set(1, 2, &mut inst); // negate not($1)
    assert_eq!(
      rep.materialize(&inst),
      Tree::And(vec![
        Tree::not(Tree::not(Tree::Arg(1))),
        Tree::gt(2, 0.5),
      ])
    );
  }

  #[test]
  fn test_contin_refinement() {
    let rep = rep();
    let mut inst = rep.fields().zero_instance();
    // 0.5 - 0.25 + 0.125 = 0.375
    rep
      .fields()
      .contin_set(3, &[Trit::Left, Trit::Right], &mut inst);
    let tree = rep.materialize(&inst);
    assert_eq!(
      tree,
      Tree::And(vec![
        Tree::Arg(0),
        Tree::not(Tree::Arg(1)),
        Tree::gt(2, 0.375),
      ])
    );
  }

  #[test]
  fn test_term_substitution() {
    let table = vec![Tree::Arg(0), Tree::Or(vec![Tree::Arg(3), Tree::Arg(4)])];
    let knobs = vec![Knob {
      node: 1,
      kind: KnobKind::Term { table },
    }];
    let rep =
      Representation::new(proto(), proto(), knobs, simplify::identity());
    let mut inst = rep.fields().zero_instance();
    rep.fields().disc_set(0, 1, &mut inst);
    assert_eq!(
      rep.materialize(&inst),
      Tree::And(vec![
        Tree::Or(vec![Tree::Arg(3), Tree::Arg(4)]),
        Tree::not(Tree::Arg(1)),
        Tree::gt(2, 0.5),
      ])
    );
  }

  #[test]
  fn test_node_ids_stable_under_removal() {
    // removing an earlier subtree must not shift later knob addresses
    let rep = Representation::new(
      proto(),
      proto(),
      vec![three_way(2), three_way(4)],
      simplify::identity(),
    );
    let mut inst = rep.fields().zero_instance();
    rep.fields().disc_set(0, 1, &mut inst); // remove not($1)
    rep.fields().disc_set(1, 2, &mut inst); // negate the threshold literal
    assert_eq!(
      rep.materialize(&inst),
      Tree::And(vec![Tree::Arg(0), Tree::not(Tree::gt(2, 0.5))])
    );
  }

  #[test]
  fn test_candidate_simplifies() {
    let rep = Representation::new(
      proto(),
      proto(),
      vec![three_way(1), three_way(2), three_way(4)],
      simplify::logical(),
    );
    let mut inst = rep.fields().zero_instance();
    rep.fields().disc_set(1, 1, &mut inst);
    rep.fields().disc_set(2, 1, &mut inst);
    // and($0) collapses to $0
    assert_eq!(rep.candidate(&inst), Tree::Arg(0));
  }

  #[test]
  #[should_panic(expected = "knob addresses node")]
  fn test_out_of_range_knob() {
    Representation::new(
      proto(),
      proto(),
      vec![three_way(17)],
      simplify::identity(),
    );
  }
}
