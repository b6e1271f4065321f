//! Beam search over joint (token, slot) choices.

use std::cmp::Ordering;

use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{DEFAULT_BEAM_SIZE, DEFAULT_MAX_ITERATIONS};
use crate::error::Result;
use crate::search::hypothesis::Hypothesis;
use crate::search::scorer::{checked_scores, OrderScorer};
use crate::search::DecodedSequence;

/// Beam search settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BeamSearchConfig {
    /// Hypotheses kept after every step (`K`).
    pub beam_size: usize,
    /// Steps before live hypotheses are returned as truncated.
    pub max_iterations: usize,
    /// Rows the scorer must return.
    pub vocab_size: usize,
    /// Return every beam entry instead of only the best.
    pub return_all: bool,
}

impl BeamSearchConfig {
    pub fn new(vocab_size: usize) -> Self {
        Self {
            beam_size: DEFAULT_BEAM_SIZE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            vocab_size,
            return_all: false,
        }
    }

    pub fn with_beam_size(mut self, beam_size: usize) -> Self {
        self.beam_size = beam_size;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_return_all(mut self, return_all: bool) -> Self {
        self.return_all = return_all;
        self
    }
}

/// One scored continuation proposed for a hypothesis.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Choice {
    pub token: usize,
    pub slot: usize,
    pub source: usize,
    pub log_prob: f32,
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    parent: usize,
    /// `None` carries a finished parent over unchanged.
    choice: Option<Choice>,
    total: f32,
    joint: usize,
    len: usize,
    enumeration: usize,
}

/// Best first: score, then joint index, then length, then enumeration order.
fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.total
        .total_cmp(&a.total)
        .then(a.joint.cmp(&b.joint))
        .then(a.len.cmp(&b.len))
        .then(a.enumeration.cmp(&b.enumeration))
}

fn keep_best(candidates: &mut Vec<Candidate>, k: usize) {
    if candidates.len() > k {
        candidates.select_nth_unstable_by(k - 1, rank);
        candidates.truncate(k);
    }
    candidates.sort_by(rank);
}

/// Every finite entry of the score matrix as a free insertion.
fn free_choices(h: &Hypothesis, scores: &Array2<f32>) -> Vec<Choice> {
    let source = h.len();
    scores
        .indexed_iter()
        .filter(|(_, s)| s.is_finite())
        .map(|((token, slot), &log_prob)| Choice {
            token,
            slot,
            source,
            log_prob,
        })
        .collect()
}

/// Fixed-width best-first decoder.
#[derive(Clone, Debug)]
pub struct BeamSearch {
    pub config: BeamSearchConfig,
}

impl BeamSearch {
    pub fn new(config: BeamSearchConfig) -> Self {
        Self { config }
    }

    /// Decode one sequence; best hypothesis first.
    pub fn decode<S: OrderScorer + ?Sized>(&self, scorer: &S) -> Result<Vec<DecodedSequence>> {
        let beam = self.run(scorer, free_choices)?;
        let keep = if self.config.return_all { beam.len() } else { 1 };
        beam.iter().take(keep).map(Hypothesis::to_decoded).collect()
    }

    /// Decode one sequence per scorer in parallel.
    pub fn decode_batch<S: OrderScorer>(&self, scorers: &[S]) -> Result<Vec<Vec<DecodedSequence>>> {
        scorers.par_iter().map(|s| self.decode(s)).collect()
    }

    /// Shared beam loop. `expand` lists the allowed continuations of a live
    /// hypothesis given its score matrix.
    pub(crate) fn run<S, E>(&self, scorer: &S, expand: E) -> Result<Vec<Hypothesis>>
    where
        S: OrderScorer + ?Sized,
        E: Fn(&Hypothesis, &Array2<f32>) -> Vec<Choice> + Sync,
    {
        let k = self.config.beam_size.max(1);
        let mut beam = vec![Hypothesis::start()];
        let mut iterations = 0;

        while iterations < self.config.max_iterations && !beam.iter().all(Hypothesis::is_finished) {
            iterations += 1;

            let per_parent: Vec<Vec<Candidate>> = beam
                .par_iter()
                .enumerate()
                .map(|(parent, h)| {
                    if h.is_finished() {
                        return Ok(vec![Candidate {
                            parent,
                            choice: None,
                            total: h.log_prob(),
                            joint: h.last_choice(),
                            len: h.len(),
                            enumeration: 0,
                        }]);
                    }
                    let scores = checked_scores(scorer, h.tokens(), h.relative(), self.config.vocab_size)?;
                    let slots = h.num_slots();
                    let mut candidates: Vec<Candidate> = expand(h, &scores)
                        .into_iter()
                        .filter_map(|choice| {
                            let total = h.log_prob() + choice.log_prob;
                            total.is_finite().then_some(Candidate {
                                parent,
                                choice: Some(choice),
                                total,
                                joint: choice.token * slots + choice.slot,
                                len: h.len() + 1,
                                enumeration: 0,
                            })
                        })
                        .collect();
                    keep_best(&mut candidates, k);
                    Ok(candidates)
                })
                .collect::<Result<_>>()?;

            let mut merged: Vec<Candidate> = per_parent
                .into_iter()
                .flatten()
                .enumerate()
                .map(|(i, mut c)| {
                    c.enumeration = i;
                    c
                })
                .collect();
            if merged.is_empty() {
                warn!(iteration = iterations, "no finite continuation left");
                break;
            }
            keep_best(&mut merged, k);

            beam = merged
                .iter()
                .map(|c| match c.choice {
                    None => Ok(beam[c.parent].clone()),
                    Some(ch) => beam[c.parent].extend(ch.token, ch.slot, ch.source, ch.log_prob),
                })
                .collect::<Result<_>>()?;
        }

        let live = beam.iter().filter(|h| !h.is_finished()).count();
        if live > 0 {
            warn!(live, iterations, "beam search truncated at iteration cap");
        }
        debug!(
            iterations,
            beam = beam.len(),
            best = beam.first().map(Hypothesis::log_prob),
            "beam search finished"
        );
        Ok(beam)
    }
}
