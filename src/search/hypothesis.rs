//! Search hypotheses.

use crate::config::{END_ID, START_ID};
use crate::error::Result;
use crate::permutation::{relative_to_absolute, RelativePositions};
use crate::search::DecodedSequence;

/// A partial or finished decode.
///
/// Immutable: [`Hypothesis::extend`] returns a new value and leaves `self`
/// untouched, so beam entries never alias each other's state.
#[derive(Clone, Debug, PartialEq)]
pub struct Hypothesis {
    tokens: Vec<usize>,
    slots: Vec<usize>,
    sources: Vec<usize>,
    log_prob: f32,
    relative: RelativePositions,
    last_choice: usize,
    finished: bool,
}

impl Hypothesis {
    /// The lone start token.
    pub fn start() -> Self {
        Self {
            tokens: vec![START_ID],
            slots: Vec::new(),
            sources: vec![0],
            log_prob: 0.0,
            relative: RelativePositions::start(),
            last_choice: 0,
            finished: false,
        }
    }

    /// Insert `token` right of step `slot`.
    ///
    /// `source` is the target position the token was copied from; free
    /// decoding passes the new step index.
    pub fn extend(&self, token: usize, slot: usize, source: usize, log_prob: f32) -> Result<Self> {
        let relative = self.relative.insert_after(slot)?;
        let last_choice = token * self.num_slots() + slot;

        let mut tokens = self.tokens.clone();
        tokens.push(token);
        let mut slots = self.slots.clone();
        slots.push(slot);
        let mut sources = self.sources.clone();
        sources.push(source);

        Ok(Self {
            tokens,
            slots,
            sources,
            log_prob: self.log_prob + log_prob,
            relative,
            last_choice,
            finished: token == END_ID,
        })
    }

    /// Tokens in generation order, start first.
    pub fn tokens(&self) -> &[usize] {
        &self.tokens
    }

    /// Insertion slot of each step after the start token.
    pub fn slots(&self) -> &[usize] {
        &self.slots
    }

    pub(crate) fn sources(&self) -> &[usize] {
        &self.sources
    }

    pub fn log_prob(&self) -> f32 {
        self.log_prob
    }

    pub fn relative(&self) -> &RelativePositions {
        &self.relative
    }

    /// Joint index `token · slots + slot` of the last choice.
    pub fn last_choice(&self) -> usize {
        self.last_choice
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of slots available to the next step.
    pub fn num_slots(&self) -> usize {
        self.tokens.len()
    }

    /// Generated length including the start token.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn to_decoded(&self) -> Result<DecodedSequence> {
        let positions = relative_to_absolute(self.relative.to_one_hot().view())?;
        let mut ordered = vec![0; self.tokens.len()];
        for (&token, &pos) in self.tokens.iter().zip(&positions) {
            ordered[pos] = token;
        }
        Ok(DecodedSequence {
            tokens: self.tokens.clone(),
            slots: self.slots.clone(),
            positions,
            ordered,
            log_prob: self.log_prob,
            truncated: !self.finished,
            relative: self.relative.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extend_leaves_parent_untouched() {
        let root = Hypothesis::start();
        let child = root.extend(7, 0, 1, -0.5).unwrap();
        assert_eq!(root.tokens(), &[START_ID]);
        assert_eq!(child.tokens(), &[START_ID, 7]);
        assert_eq!(child.log_prob(), -0.5);
        assert_eq!(child.last_choice(), 7);
        assert!(!child.is_finished());
    }

    #[test]
    fn test_decoded_positions() {
        // start, a after start, b after start (b left of a), end after a
        let h = Hypothesis::start()
            .extend(10, 0, 1, 0.0)
            .and_then(|h| h.extend(11, 0, 2, 0.0))
            .and_then(|h| h.extend(END_ID, 1, 3, 0.0))
            .unwrap();
        assert!(h.is_finished());
        let d = h.to_decoded().unwrap();
        assert_eq!(d.positions, vec![0, 2, 1, 3]);
        assert_eq!(d.ordered, vec![START_ID, 11, 10, END_ID]);
        assert!(!d.truncated);
    }

    #[test]
    fn test_bad_slot() {
        assert!(Hypothesis::start().extend(5, 1, 1, 0.0).is_err());
    }
}
