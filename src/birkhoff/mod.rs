//! Discrete permutations from soft ones.
//!
//! A doubly stochastic matrix can be projected to its nearest hard permutation
//! (Hungarian), split into a convex combination of hard permutations
//! (Birkhoff–von Neumann), or used as logits for Gumbel-matching samples.

pub mod decompose;
pub mod gumbel;
pub mod matching;

pub use decompose::{BirkhoffDecomposer, BirkhoffTerm, DecomposerConfig, Decomposition};
pub use gumbel::{gumbel_matching, GumbelSample};
pub use matching::{
    bottleneck_matching, hungarian, perfect_matching, project_to_permutation,
    project_to_permutation_batch,
};
