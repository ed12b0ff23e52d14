//! Metapopulation evolutionary search over symbolic program trees.
//!
//! The search keeps a score-ordered population of candidate programs.
//! Each iteration draws an exemplar by Boltzmann roulette, decorates it
//! with discrete and continuous knobs, runs a numerical optimizer over
//! the packed knob settings, and folds the winners back into the
//! population, pruning by score and optionally by Pareto dominance and
//! diversity.

#![warn(missing_docs)]

pub mod deme;
pub mod diversity;
pub mod dominance;
pub mod expander;
pub mod field;
pub mod metapop;
pub mod optimizer;
pub mod representation;
pub mod score;
pub mod search;
pub mod simplify;
pub mod tree;
