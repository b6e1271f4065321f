//! Searching for a good generation order of a known sentence.
//!
//! The beam may only insert target tokens that have not been placed yet, each
//! at the one slot that keeps the placed tokens in target order. The scorer
//! decides which of them to place first.

use ndarray::Array2;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{END_ID, START_ID};
use crate::error::{OrderError, Result};
use crate::permutation::permutation_matrix;
use crate::search::beam::{BeamSearch, Choice};
use crate::search::hypothesis::Hypothesis;
use crate::search::scorer::OrderScorer;
use crate::search::DecodedSequence;

/// One generation order found for the target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FoundOrder {
    /// Target position generated at each step, padding included.
    pub order: Vec<usize>,
    /// Hard permutation matrix `[L, L]` of `order`.
    pub permutation: Array2<f32>,
    /// The beam entry that produced `order`.
    pub sequence: DecodedSequence,
}

/// Every order left on the beam, best first.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderSearchResult {
    pub orders: Vec<FoundOrder>,
}

impl OrderSearchResult {
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn best(&self) -> Option<&FoundOrder> {
        self.orders.first()
    }

    /// Choose one order uniformly, e.g. as a training target.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&FoundOrder> {
        self.orders.choose(rng)
    }
}

/// Unplaced target positions with their consistent slots.
fn target_choices(h: &Hypothesis, scores: &Array2<f32>, target: &[usize]) -> Vec<Choice> {
    let n = target.len();
    let placed = h.sources();
    let mut is_placed = vec![false; n];
    for &p in placed {
        is_placed[p] = true;
    }
    let content_left = (1..n - 1).any(|i| !is_placed[i]);
    let slots = h.num_slots();

    let mut seen: Vec<usize> = Vec::new();
    let mut choices = Vec::new();
    for i in 1..n {
        if is_placed[i] || (i == n - 1 && content_left) {
            continue;
        }
        let slot = (0..placed.len())
            .filter(|&k| placed[k] < i)
            .max_by_key(|&k| placed[k])
            .unwrap_or(0);
        let token = target[i];
        let joint = token * slots + slot;
        if seen.contains(&joint) {
            continue;
        }
        seen.push(joint);
        choices.push(Choice {
            token,
            slot,
            source: i,
            log_prob: scores[[token, slot]],
        });
    }
    choices
}

fn found_order(h: &Hypothesis, len: usize, total: usize) -> Result<FoundOrder> {
    let mut order = h.sources().to_vec();
    let mut used = vec![false; total];
    for &p in &order {
        used[p] = true;
    }
    // truncated hypotheses finish left to right; padding keeps the identity
    order.extend((0..len).filter(|&p| !used[p]));
    order.extend(len..total);

    Ok(FoundOrder {
        permutation: permutation_matrix(&order)?,
        order,
        sequence: h.to_decoded()?,
    })
}

impl BeamSearch {
    /// Beam search restricted to reordering `target`.
    ///
    /// `target` is `[start, content.., end, pad..]`. Every beam entry is
    /// returned, best first.
    pub fn search_order<S: OrderScorer + ?Sized>(
        &self,
        scorer: &S,
        target: &[usize],
    ) -> Result<OrderSearchResult> {
        let len = target
            .iter()
            .position(|&t| t == END_ID)
            .map(|i| i + 1)
            .ok_or_else(|| OrderError::invalid("target has no end token"))?;
        if target.first() != Some(&START_ID) {
            return Err(OrderError::invalid("target must begin with the start token"));
        }
        if let Some(&tok) = target[..len].iter().find(|&&t| t >= self.config.vocab_size) {
            return Err(OrderError::shape(
                format!("token ids < {}", self.config.vocab_size),
                format!("token {}", tok),
            ));
        }

        let sentence = &target[..len];
        let beam = self.run(scorer, |h, scores| target_choices(h, scores, sentence))?;
        let orders = beam
            .iter()
            .map(|h| found_order(h, len, target.len()))
            .collect::<Result<_>>()?;
        Ok(OrderSearchResult { orders })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PAD_ID;
    use crate::permutation::{is_hard, RelativePositions};
    use crate::search::BeamSearchConfig;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const VOCAB: usize = 12;

    // larger token ids score higher, and more so early on; slot ignored
    fn prefer_large(tokens: &[usize], _: &RelativePositions, _: usize) -> Array2<f32> {
        let weight = (VOCAB - tokens.len()) as f32;
        Array2::from_shape_fn((VOCAB, tokens.len()), |(v, _)| v as f32 * 0.1 * weight)
    }

    fn target() -> Vec<usize> {
        vec![START_ID, 7, 5, 9, END_ID, PAD_ID]
    }

    #[test]
    fn test_orders_reproduce_target() {
        let config = BeamSearchConfig::new(VOCAB).with_beam_size(3);
        let result = BeamSearch::new(config)
            .search_order(&prefer_large, &target())
            .unwrap();
        assert_eq!(result.len(), 3);
        for found in &result.orders {
            assert_eq!(found.sequence.ordered, target()[..5].to_vec());
            assert!(is_hard(found.permutation.view(), 1e-6));
            assert_eq!(found.permutation[[5, 5]], 1.0);
            assert_eq!(found.order[0], 0);
            assert_eq!(found.order[4], 4);
            assert!(!found.sequence.truncated);
        }
    }

    #[test]
    fn test_best_follows_scorer() {
        let config = BeamSearchConfig::new(VOCAB).with_beam_size(2);
        let result = BeamSearch::new(config)
            .search_order(&prefer_large, &target())
            .unwrap();
        // 9, then 7, then 5
        assert_eq!(result.best().unwrap().order, vec![0, 3, 1, 2, 4, 5]);
    }

    #[test]
    fn test_duplicates_collapse() {
        let target = vec![START_ID, 6, 6, END_ID];
        let config = BeamSearchConfig::new(VOCAB).with_beam_size(4);
        let result = BeamSearch::new(config)
            .search_order(&prefer_large, &target)
            .unwrap();
        // placing either 6 first is the same joint choice
        assert_eq!(result.len(), 1);
        assert_eq!(result.orders[0].order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_pick_and_errors() {
        let search = BeamSearch::new(BeamSearchConfig::new(VOCAB));
        let result = search.search_order(&prefer_large, &target()).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        assert!(result.pick(&mut rng).is_some());
        assert!(OrderSearchResult::default().pick(&mut rng).is_none());

        assert!(search.search_order(&prefer_large, &[START_ID, 5]).is_err());
        assert!(search.search_order(&prefer_large, &[5, END_ID]).is_err());
        assert!(search.search_order(&prefer_large, &[START_ID, 40, END_ID]).is_err());
    }

    #[test]
    fn test_truncated_order_is_still_a_permutation() {
        let config = BeamSearchConfig::new(VOCAB).with_max_iterations(1);
        let result = BeamSearch::new(config)
            .search_order(&prefer_large, &target())
            .unwrap();
        let best = result.best().unwrap();
        assert!(best.sequence.truncated);
        assert_eq!(best.order, vec![0, 3, 1, 2, 4, 5]);
    }
}
