//! Doubly stochastic normalization.
//!
//! An unconstrained score matrix is mapped onto the Birkhoff polytope with a
//! stick-breaking construction: cells are filled one at a time, each taking a
//! sigmoid-controlled share of the mass its row and column still have to
//! give. Unlike Sinkhorn iteration this hits exact marginals after a single
//! pass.

pub mod noise;
pub mod stick_breaking;

pub use noise::perturb;
pub use stick_breaking::{permutable_mask, validity_mask, NormalizerConfig, StickBreaking};
