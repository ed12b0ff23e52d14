//! Symbolic program trees: a boolean algebra over input arguments with
//! tunable numeric thresholds.

use std::{collections::HashSet, fmt};

use ordered_float::OrderedFloat;

/// Index of an input argument.
pub type Arity = u32;

/// Preorder index of a node within a tree. Knobs address tree locations
/// with these indices.
pub type NodeId = usize;

/// A candidate program. Structural equality, hashing and ordering are
/// derived, so trees can live in hash sets and act as ordering
/// tie-breakers.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Tree {
  /// Conjunction of zero or more subtrees. An empty conjunction is true.
  And(Vec<Tree>),
  /// Disjunction of zero or more subtrees. An empty disjunction is false.
  Or(Vec<Tree>),
  /// Negation.
  Not(Box<Tree>),
  /// Numeric input compared against a tunable threshold.
  Gt(Arity, OrderedFloat<f64>),
  /// Boolean input argument.
  Arg(Arity),
  /// Constant truth.
  True,
  /// Constant falsity.
  False,
}

impl Tree {
  /// Negation of `tree`.
  pub fn not(tree: Tree) -> Tree {
    Tree::Not(Box::new(tree))
  }

  /// Threshold literal `input[arg] > threshold`.
  pub fn gt(arg: Arity, threshold: f64) -> Tree {
    Tree::Gt(arg, OrderedFloat(threshold))
  }

  /// Direct children of this node.
  pub fn children(&self) -> &[Tree] {
    match self {
      Tree::And(cs) | Tree::Or(cs) => cs,
      Tree::Not(c) => std::slice::from_ref(c),
      _ => &[],
    }
  }

  /// Total number of nodes, the constants included. Preorder node ids
  /// of a tree lie in `0..size()`.
  pub fn size(&self) -> usize {
    1 + self.children().iter().map(Tree::size).sum::<usize>()
  }

  /// Complexity of the program: the number of nodes that are not
  /// constants.
  pub fn complexity(&self) -> u32 {
    let own = match self {
      Tree::True | Tree::False => 0,
      _ => 1,
    };
    own + self.children().iter().map(Tree::complexity).sum::<u32>()
  }

  /// Set of argument indices referenced anywhere in the tree.
  pub fn arguments(&self) -> HashSet<Arity> {
    fn walk(tree: &Tree, acc: &mut HashSet<Arity>) {
      match tree {
        Tree::Arg(i) | Tree::Gt(i, _) => {
          acc.insert(*i);
        }
        _ => tree.children().iter().for_each(|c| walk(c, acc)),
      }
    }
    let mut acc = HashSet::new();
    walk(self, &mut acc);
    acc
  }

  /// Evaluates the program on a row of inputs. A plain argument is
  /// truthy iff its input is nonzero; a threshold literal compares the
  /// input numerically. Missing inputs read as zero.
  pub fn eval(&self, inputs: &[f64]) -> bool {
    match self {
      Tree::And(cs) => cs.iter().all(|c| c.eval(inputs)),
      Tree::Or(cs) => cs.iter().any(|c| c.eval(inputs)),
      Tree::Not(c) => !c.eval(inputs),
      Tree::Gt(i, c) => inputs.get(*i as usize).copied().unwrap_or(0.0) > c.0,
      Tree::Arg(i) => inputs.get(*i as usize).copied().unwrap_or(0.0) != 0.0,
      Tree::True => true,
      Tree::False => false,
    }
  }

  /// Renders the program in Python syntax.
  pub fn to_python(&self) -> String {
    fn join(cs: &[Tree], sep: &str, empty: &str) -> String {
      if cs.is_empty() {
        return empty.into();
      }
      let parts: Vec<_> = cs.iter().map(Tree::to_python).collect();
      format!("({})", parts.join(sep))
    }
    match self {
      Tree::And(cs) => join(cs, " and ", "True"),
      Tree::Or(cs) => join(cs, " or ", "False"),
      Tree::Not(c) => format!("(not {})", c.to_python()),
      Tree::Gt(i, c) => format!("(x{} > {})", i, c.0),
      Tree::Arg(i) => format!("x{}", i),
      Tree::True => "True".into(),
      Tree::False => "False".into(),
    }
  }
}

impl fmt::Display for Tree {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fn junctor(
      f: &mut fmt::Formatter<'_>,
      name: &str,
      cs: &[Tree],
    ) -> fmt::Result {
      write!(f, "{}(", name)?;
      for (i, c) in cs.iter().enumerate() {
        if i > 0 {
          write!(f, " ")?;
        }
        write!(f, "{}", c)?;
      }
      write!(f, ")")
    }
    match self {
      Tree::And(cs) => junctor(f, "and", cs),
      Tree::Or(cs) => junctor(f, "or", cs),
      Tree::Not(c) => write!(f, "not({})", c),
      Tree::Gt(i, c) => write!(f, "gt(${} {})", i, c.0),
      Tree::Arg(i) => write!(f, "${}", i),
      Tree::True => write!(f, "true"),
      Tree::False => write!(f, "false"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample() -> Tree {
    Tree::And(vec![
      Tree::Arg(0),
      Tree::not(Tree::Arg(1)),
      Tree::Or(vec![Tree::gt(2, 0.5), Tree::False]),
    ])
  }

  #[test]
  fn test_size_and_complexity() {
    let t = sample();
    assert_eq!(t.size(), 7);
    // `false` is a constant and doesn't count
    assert_eq!(t.complexity(), 6);
    assert_eq!(Tree::True.complexity(), 0);
  }

  #[test]
  fn test_arguments() {
    let args = sample().arguments();
    assert_eq!(args, HashSet::from([0, 1, 2]));
  }

  #[test]
  fn test_eval() {
    let t = sample();
    assert!(t.eval(&[1.0, 0.0, 0.7]));
    assert!(!t.eval(&[1.0, 1.0, 0.7]));
    assert!(!t.eval(&[1.0, 0.0, 0.5]));
    assert!(!t.eval(&[0.0, 0.0, 0.7]));
    // missing inputs read as zero
    assert!(!Tree::Arg(5).eval(&[]));
  }

  #[test]
  fn test_display() {
    assert_eq!(
      sample().to_string(),
      "and($0 not($1) or(gt($2 0.5) false))"
    );
    assert_eq!(Tree::And(vec![]).to_string(), "and()");
  }

  #[test]
  fn test_python() {
    assert_eq!(
      sample().to_python(),
      "(x0 and (not x1) and ((x2 > 0.5) or False))"
    );
    assert_eq!(Tree::Or(vec![]).to_python(), "False");
  }

  #[test]
  fn test_structural_order_is_total() {
    let mut trees = vec![Tree::True, sample(), Tree::Arg(3), Tree::False];
    trees.sort();
    trees.dedup();
    assert_eq!(trees.len(), 4);
  }
}
