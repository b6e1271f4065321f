//! Error taxonomy shared by every component.
//!
//! Decoders never fail because generation ran out of iterations; that case is
//! reported through [`DecodedSequence::truncated`](crate::search::DecodedSequence).

use thiserror::Error;

use crate::birkhoff::Decomposition;

/// Unified error type for permutation and search operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Input is not square, has the wrong rank, or batch dimensions disagree.
    #[error("shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch { expected: String, found: String },

    /// A matrix that must be a (hard or doubly stochastic) permutation is not.
    #[error("invalid permutation: {reason}")]
    InvalidPermutation { reason: String },

    /// A row or column of the validity mask has no valid entry.
    #[error("row {row} has no valid entries")]
    EmptyRow { row: usize },

    /// A score feeding a valid cell is NaN or infinite.
    #[error("non-finite score at ({row}, {col})")]
    NonFiniteScore { row: usize, col: usize },

    /// Birkhoff decomposition stopped with residual mass above tolerance.
    #[error("decomposition did not converge: residual mass {residual:.3e} after {} terms", partial.len())]
    NonConvergent { partial: Decomposition, residual: f32 },
}

impl OrderError {
    pub(crate) fn shape(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidPermutation {
            reason: reason.into(),
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, OrderError>;
