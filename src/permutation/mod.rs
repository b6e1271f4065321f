//! Permutation algebra.
//!
//! A generation order can be written three equivalent ways:
//! - an absolute permutation matrix `P[step, position]`
//! - a pairwise relative-position tensor (before / self / after)
//! - per-step pointer labels naming the token each new token is inserted after
//!
//! This module converts between them and provides the fixed orders used as
//! baselines and teacher-forcing targets.

pub mod codec;
pub mod orders;
pub mod relative;

pub use codec::{
    is_hard, left_to_right_relative, left_to_right_relative_batch, matrix_to_order,
    matrix_to_pointer, matrix_to_pointer_batch, matrix_to_relative, matrix_to_relative_batch,
    permutation_matrix, relative_to_absolute, relative_to_absolute_batch, step_ranks,
    validate_doubly_stochastic,
};
pub use orders::FixedOrder;
pub use relative::RelativePositions;
