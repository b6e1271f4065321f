//! Order-aware search.
//!
//! At every step the decoder picks a token *and* the slot it is inserted at:
//! slot `k` places the new token immediately right of the token generated at
//! step `k`. Each hypothesis carries the pairwise relative positions of its
//! steps, grown by one row and column per insertion.
//!
//! Three drivers share the same hypothesis type and scorer interface:
//! - [`BeamSearch::decode`]: fixed-width best-first search
//! - [`NucleusSampler::sample`]: top-p sampling, one seeded stream per sample
//! - [`BeamSearch::search_order`]: best generation order for a known sentence

pub mod beam;
pub mod hypothesis;
pub mod nucleus;
pub mod order_search;
pub mod scorer;

use serde::{Deserialize, Serialize};

use crate::permutation::RelativePositions;

pub use beam::{BeamSearch, BeamSearchConfig};
pub use hypothesis::Hypothesis;
pub use nucleus::{NucleusConfig, NucleusSampler};
pub use order_search::{FoundOrder, OrderSearchResult};
pub use scorer::{log_softmax, OracleScorer, OrderScorer};

/// A finished (or truncated) decode, ready for reporting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecodedSequence {
    /// Tokens in generation order, start token first.
    pub tokens: Vec<usize>,
    /// Insertion slot of each step after the start token.
    pub slots: Vec<usize>,
    /// Absolute position of each generated token.
    pub positions: Vec<usize>,
    /// Tokens in left-to-right order.
    pub ordered: Vec<usize>,
    /// Sum of the model log-probabilities of every choice.
    pub log_prob: f32,
    /// Generation stopped at the iteration cap before an end token.
    pub truncated: bool,
    /// Pairwise relative positions implied by the insertions.
    pub relative: RelativePositions,
}

impl DecodedSequence {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
