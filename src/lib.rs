//! # ordergen
//!
//! **Permutation algebra and order-aware search** for sequence models that
//! learn *where* to insert each token as well as *which* token to emit.
//!
//! ## Components
//!
//! 1. **Codec**: permutation matrix ⇄ relative positions ⇄ pointer labels
//! 2. **Fixed orders**: left-to-right, right-to-left, common-first, rare-first
//! 3. **Stick-breaking**: scores + validity mask → doubly stochastic matrix
//! 4. **Birkhoff**: soft permutation → weighted hard permutations, Hungarian projection
//! 5. **Search**: beam search, nucleus sampling and order search over (token, slot) pairs
//! 6. **Analysis**: rank correlation, edit distance, per-word order statistics
//!
//! ## Conventions
//!
//! - Permutation matrices are indexed `[generation step, absolute position]`.
//! - Batches are `Array3<f32>` shaped `[batch, L, L]`.
//! - Relative positions use classes `BEFORE = 0`, `SELF = 1`, `AFTER = 2`.

pub mod analysis;
pub mod birkhoff;
pub mod error;
pub mod normalize;
pub mod permutation;
pub mod search;

pub use error::{OrderError, Result};

/// Crate-wide constants.
pub mod config {
    /// Padding token id.
    pub const PAD_ID: usize = 0;

    /// Unknown-word token id.
    pub const UNK_ID: usize = 1;

    /// Start-of-sequence token id.
    pub const START_ID: usize = 2;

    /// End-of-sequence token id.
    pub const END_ID: usize = 3;

    /// Number of reserved ids at the bottom of the vocabulary.
    pub const NUM_RESERVED: usize = 4;

    /// Number of relation classes in a relative-position tensor.
    pub const NUM_RELATIONS: usize = 3;

    /// Relation class: step `i` is left of step `j`.
    pub const REL_BEFORE: usize = 0;

    /// Relation class: `i == j`.
    pub const REL_SELF: usize = 1;

    /// Relation class: step `i` is right of step `j`.
    pub const REL_AFTER: usize = 2;

    /// Row/column sum tolerance when validating permutation matrices.
    pub const PERMUTATION_TOLERANCE: f32 = 1e-4;

    /// Row/column sum tolerance guaranteed by the normalizer.
    pub const NORMALIZER_TOLERANCE: f32 = 1e-5;

    /// Residual mass tolerated by the Birkhoff decomposer.
    pub const BIRKHOFF_TOLERANCE: f32 = 1e-3;

    /// Entries at or below this are treated as zero in a Birkhoff residual.
    pub const BIRKHOFF_ZERO_EPS: f32 = 1e-7;

    /// Default beam width.
    pub const DEFAULT_BEAM_SIZE: usize = 4;

    /// Default decode iteration cap.
    pub const DEFAULT_MAX_ITERATIONS: usize = 40;

    /// Default nucleus probability mass.
    pub const DEFAULT_NUCLEUS_PROBABILITY: f32 = 0.95;

    /// Returns whether a token id is one of the reserved ids.
    pub fn is_reserved(token: usize) -> bool {
        token < NUM_RESERVED
    }

    /// Returns whether a token takes part in reordering (not pad/start/end).
    pub fn is_permutable(token: usize) -> bool {
        token != PAD_ID && token != START_ID && token != END_ID
    }
}
