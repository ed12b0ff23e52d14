//! Candidate simplification. Simplification is an injected collaborator:
//! the search core only ever calls a [`SimplifyRule`], and any rule with
//! the right signature can be plugged in. The [`logical`] rule shipped
//! here covers the boolean algebra of [`Tree`].

use std::sync::Arc;

use crate::tree::Tree;

/// A pure candidate reduction rule.
pub type SimplifyRule = Arc<dyn Fn(Tree) -> Tree + Send + Sync>;

/// A rule that leaves candidates untouched.
pub fn identity() -> SimplifyRule {
  Arc::new(|tree| tree)
}

/// The default logical reduction wrapped as a rule.
pub fn logical() -> SimplifyRule {
  Arc::new(reduce)
}

/// Reduces a boolean program: folds constants, removes double
/// negations, flattens nested junctors of the same kind and puts
/// children into canonical order so that equivalent candidates compare
/// equal structurally.
pub fn reduce(tree: Tree) -> Tree {
  match tree {
    Tree::Not(c) => match reduce(*c) {
      Tree::True => Tree::False,
      Tree::False => Tree::True,
      Tree::Not(inner) => *inner,
      other => Tree::not(other),
    },
    Tree::And(cs) => {
      let mut out = Vec::with_capacity(cs.len());
      for c in cs {
        match reduce(c) {
          Tree::True => {}
          Tree::False => return Tree::False,
          Tree::And(nested) => out.extend(nested),
          other => out.push(other),
        }
      }
      canonical(out, Tree::And, Tree::True)
    }
    Tree::Or(cs) => {
      let mut out = Vec::with_capacity(cs.len());
      for c in cs {
        match reduce(c) {
          Tree::False => {}
          Tree::True => return Tree::True,
          Tree::Or(nested) => out.extend(nested),
          other => out.push(other),
        }
      }
      canonical(out, Tree::Or, Tree::False)
    }
    leaf => leaf,
  }
}

/// Sorts and dedups junctor children, collapsing degenerate junctors.
fn canonical(
  mut children: Vec<Tree>,
  junctor: fn(Vec<Tree>) -> Tree,
  empty: Tree,
) -> Tree {
  children.sort_unstable();
  children.dedup();
  match children.len() {
    0 => empty,
    1 => children.pop().unwrap_or(empty),
    _ => junctor(children),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_constant_folding() {
    assert_eq!(reduce(Tree::not(Tree::True)), Tree::False);
    assert_eq!(
      reduce(Tree::And(vec![Tree::Arg(0), Tree::False])),
      Tree::False
    );
    assert_eq!(reduce(Tree::And(vec![Tree::True, Tree::Arg(0)])), Tree::Arg(0));
    assert_eq!(reduce(Tree::Or(vec![])), Tree::False);
    assert_eq!(reduce(Tree::And(vec![])), Tree::True);
  }

  #[test]
  fn test_double_negation() {
    let t = Tree::not(Tree::not(Tree::Arg(2)));
    assert_eq!(reduce(t), Tree::Arg(2));
  }

  #[test]
  fn test_flatten_and_canonical_order() {
    let a = Tree::And(vec![
      Tree::Arg(1),
      Tree::And(vec![Tree::Arg(0), Tree::Arg(1)]),
    ]);
    let b = Tree::And(vec![Tree::Arg(0), Tree::Arg(1)]);
    assert_eq!(reduce(a), reduce(b));
  }

  #[test]
  fn test_idempotent() {
    let t = Tree::Or(vec![
      Tree::And(vec![Tree::Arg(3), Tree::not(Tree::not(Tree::Arg(1)))]),
      Tree::False,
      Tree::gt(0, 0.25),
    ]);
    let once = reduce(t.clone());
    assert_eq!(reduce(once.clone()), once);
  }
}
