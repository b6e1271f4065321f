//! Scoring sources for order-aware search.

use ndarray::{Array2, ArrayView2};

use crate::error::{OrderError, Result};
use crate::permutation::RelativePositions;

/// Produces joint (token, slot) log-probabilities for a partial hypothesis.
///
/// The returned array is `[vocab_size, tokens.len()]`: entry `[v, k]` scores
/// emitting token `v` immediately after the token generated at step `k`.
pub trait OrderScorer: Sync {
    fn score(&self, tokens: &[usize], relative: &RelativePositions, step: usize) -> Array2<f32>;
}

impl<F> OrderScorer for F
where
    F: Fn(&[usize], &RelativePositions, usize) -> Array2<f32> + Sync,
{
    fn score(&self, tokens: &[usize], relative: &RelativePositions, step: usize) -> Array2<f32> {
        self(tokens, relative, step)
    }
}

/// Call `scorer` and check the output shape.
pub(crate) fn checked_scores<S: OrderScorer + ?Sized>(
    scorer: &S,
    tokens: &[usize],
    relative: &RelativePositions,
    vocab_size: usize,
) -> Result<Array2<f32>> {
    let step = tokens.len();
    let scores = scorer.score(tokens, relative, step);
    if scores.dim() != (vocab_size, tokens.len()) {
        return Err(OrderError::shape(
            format!("[{}, {}]", vocab_size, tokens.len()),
            format!("{:?}", scores.shape()),
        ));
    }
    Ok(scores)
}

/// Log-softmax over every entry of `scores`.
///
/// Non-finite entries stay at negative infinity.
pub fn log_softmax(scores: ArrayView2<f32>) -> Array2<f32> {
    let max = scores
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return Array2::from_elem(scores.dim(), f32::NEG_INFINITY);
    }
    let sum: f64 = scores
        .iter()
        .filter(|v| v.is_finite())
        .map(|&v| f64::from(v - max).exp())
        .sum();
    let lse = max + sum.ln() as f32;
    scores.mapv(|v| if v.is_finite() { v - lse } else { f32::NEG_INFINITY })
}

/// Scorer that follows a known sentence in a known generation order.
///
/// At step `n` it puts `confidence` of the mass on the token at
/// `order[n]`, inserted right of the already generated token nearest to its
/// left, and spreads the rest uniformly. `confidence = 1` makes every other
/// choice impossible.
#[derive(Clone, Debug)]
pub struct OracleScorer {
    target: Vec<usize>,
    order: Vec<usize>,
    vocab_size: usize,
    confidence: f32,
}

impl OracleScorer {
    pub fn new(target: Vec<usize>, order: Vec<usize>, vocab_size: usize, confidence: f32) -> Result<Self> {
        if target.len() != order.len() {
            return Err(OrderError::shape(
                format!("order of length {}", target.len()),
                format!("length {}", order.len()),
            ));
        }
        if let Some(&tok) = target.iter().find(|&&t| t >= vocab_size) {
            return Err(OrderError::shape(
                format!("token ids < {}", vocab_size),
                format!("token {}", tok),
            ));
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(OrderError::invalid(format!(
                "confidence {} outside [0, 1]",
                confidence
            )));
        }
        Ok(Self {
            target,
            order,
            vocab_size,
            confidence,
        })
    }

    /// Slot at which the oracle inserts step `n` given its own first `n` steps.
    fn oracle_slot(&self, n: usize) -> usize {
        let pos = self.order[n];
        (0..n)
            .filter(|&k| self.order[k] < pos)
            .max_by_key(|&k| self.order[k])
            .unwrap_or(0)
    }
}

impl OrderScorer for OracleScorer {
    fn score(&self, tokens: &[usize], _relative: &RelativePositions, _step: usize) -> Array2<f32> {
        let n = tokens.len();
        let cells = self.vocab_size * n;
        if n >= self.order.len() || cells == 0 {
            return Array2::from_elem((self.vocab_size, n), -(cells.max(1) as f32).ln());
        }

        let token = self.target[self.order[n]];
        let slot = self.oracle_slot(n);
        let rest = if cells > 1 {
            ((1.0 - self.confidence) / (cells - 1) as f32).ln()
        } else {
            f32::NEG_INFINITY
        };
        let mut scores = Array2::from_elem((self.vocab_size, n), rest);
        scores[[token, slot]] = self.confidence.ln();
        scores
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{END_ID, START_ID};

    #[test]
    fn test_closure_scorer_shape_checked() {
        let scorer = |tokens: &[usize], _: &RelativePositions, _: usize| {
            Array2::<f32>::zeros((6, tokens.len() + 1))
        };
        let err = checked_scores(&scorer, &[START_ID], &RelativePositions::start(), 6);
        assert!(matches!(err, Err(OrderError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_log_softmax_normalizes() {
        let s = Array2::from_shape_vec((2, 2), vec![1.0f32, 2.0, f32::NEG_INFINITY, 3.0]).unwrap();
        let ls = log_softmax(s.view());
        let total: f32 = ls.iter().map(|v| v.exp()).sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert_eq!(ls[[1, 0]], f32::NEG_INFINITY);
    }

    #[test]
    fn test_oracle_follows_order() {
        // start, 5, 6, end generated as start, 6, 5, end
        let oracle = OracleScorer::new(vec![START_ID, 5, 6, END_ID], vec![0, 2, 1, 3], 8, 1.0).unwrap();
        let rel = RelativePositions::start();

        let s = oracle.score(&[START_ID], &rel, 1);
        assert_eq!(s[[6, 0]], 0.0);
        assert_eq!(s[[5, 0]], f32::NEG_INFINITY);

        // 5 goes left of 6, so right after start
        let s = oracle.score(&[START_ID, 6], &rel, 2);
        assert_eq!(s[[5, 0]], 0.0);

        // end goes right of 6 (step 1)
        let s = oracle.score(&[START_ID, 6, 5], &rel, 3);
        assert_eq!(s[[END_ID, 1]], 0.0);
    }

    #[test]
    fn test_oracle_rejects_bad_confidence() {
        assert!(OracleScorer::new(vec![START_ID, END_ID], vec![0, 1], 4, 1.5).is_err());
        assert!(OracleScorer::new(vec![START_ID, 9], vec![0, 1], 4, 0.5).is_err());
    }
}
