//! Where in the generation order each word tends to appear.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::is_permutable;
use crate::search::DecodedSequence;

/// Mean generation location of one token.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WordOrderSummary {
    /// Token id.
    pub token: usize,
    /// Mean of `step / (len - 1)`: 0 is generated first, 1 last.
    pub mean_location: f64,
    /// Occurrences across all updates.
    pub count: usize,
}

/// Running per-token generation locations.
///
/// Create once per run, `update` per decoded example, `finalize` at the end.
#[derive(Clone, Debug, Default)]
pub struct WordOrderStatistics {
    totals: HashMap<usize, (f64, usize)>,
    sequences: usize,
}

impl WordOrderStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, decoded: &DecodedSequence) {
        let len = decoded.tokens.len();
        if len < 2 {
            return;
        }
        self.sequences += 1;
        let denom = (len - 1) as f64;
        for (step, &token) in decoded.tokens.iter().enumerate() {
            if !is_permutable(token) {
                continue;
            }
            let entry = self.totals.entry(token).or_insert((0.0, 0));
            entry.0 += step as f64 / denom;
            entry.1 += 1;
        }
    }

    /// Fold in statistics gathered elsewhere, e.g. on another thread.
    pub fn merge(&mut self, other: WordOrderStatistics) {
        self.sequences += other.sequences;
        for (token, (sum, count)) in other.totals {
            let entry = self.totals.entry(token).or_insert((0.0, 0));
            entry.0 += sum;
            entry.1 += count;
        }
    }

    pub fn num_sequences(&self) -> usize {
        self.sequences
    }

    /// Per-token means, earliest generated first (ties by token id).
    pub fn finalize(self) -> Vec<WordOrderSummary> {
        let mut out: Vec<WordOrderSummary> = self
            .totals
            .into_iter()
            .map(|(token, (sum, count))| WordOrderSummary {
                token,
                mean_location: sum / count as f64,
                count,
            })
            .collect();
        out.sort_by(|a, b| {
            a.mean_location
                .total_cmp(&b.mean_location)
                .then(a.token.cmp(&b.token))
        });
        out
    }
}
