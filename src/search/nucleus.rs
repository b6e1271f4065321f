//! Nucleus (top-p) sampling over joint (token, slot) choices.

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{DEFAULT_MAX_ITERATIONS, DEFAULT_NUCLEUS_PROBABILITY};
use crate::error::{OrderError, Result};
use crate::search::hypothesis::Hypothesis;
use crate::search::scorer::{checked_scores, log_softmax, OrderScorer};
use crate::search::DecodedSequence;

/// Nucleus sampling settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NucleusConfig {
    /// Independent sequences drawn per call.
    pub num_samples: usize,
    /// Probability mass kept at each step; `>= 1` keeps the full distribution.
    pub probability: f32,
    /// Steps before a sample is returned as truncated.
    pub max_iterations: usize,
    /// Rows the scorer must return.
    pub vocab_size: usize,
}

impl NucleusConfig {
    pub fn new(vocab_size: usize) -> Self {
        Self {
            num_samples: 1,
            probability: DEFAULT_NUCLEUS_PROBABILITY,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            vocab_size,
        }
    }

    pub fn with_num_samples(mut self, num_samples: usize) -> Self {
        self.num_samples = num_samples;
        self
    }

    pub fn with_probability(mut self, probability: f32) -> Self {
        self.probability = probability;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

/// Length of the smallest best-first prefix whose mass exceeds `p`.
fn nucleus_len(ranked: &[(usize, f32)], p: f32) -> usize {
    if p >= 1.0 {
        return ranked.len();
    }
    let mut mass = 0.0f32;
    for (i, &(_, log_prob)) in ranked.iter().enumerate() {
        mass += log_prob.exp();
        if mass > p {
            return i + 1;
        }
    }
    ranked.len()
}

/// Independent top-p samples from an order-aware scorer.
#[derive(Clone, Debug)]
pub struct NucleusSampler {
    pub config: NucleusConfig,
}

impl NucleusSampler {
    pub fn new(config: NucleusConfig) -> Self {
        Self { config }
    }

    /// Draw `num_samples` sequences.
    ///
    /// One seed per sample is taken from `rng` up front, so the result does
    /// not depend on how rayon schedules the samples.
    pub fn sample<S, R>(&self, scorer: &S, rng: &mut R) -> Result<Vec<DecodedSequence>>
    where
        S: OrderScorer + ?Sized,
        R: Rng + ?Sized,
    {
        let seeds: Vec<u64> = (0..self.config.num_samples).map(|_| rng.gen()).collect();
        seeds
            .into_par_iter()
            .map(|seed| self.sample_one(scorer, &mut StdRng::seed_from_u64(seed))?.to_decoded())
            .collect()
    }

    /// [`NucleusSampler::sample`] for one scorer per batch element.
    pub fn decode_batch<S, R>(&self, scorers: &[S], rng: &mut R) -> Result<Vec<Vec<DecodedSequence>>>
    where
        S: OrderScorer,
        R: Rng + ?Sized,
    {
        let seeds: Vec<u64> = scorers.iter().map(|_| rng.gen()).collect();
        scorers
            .par_iter()
            .zip(seeds)
            .map(|(scorer, seed)| self.sample(scorer, &mut StdRng::seed_from_u64(seed)))
            .collect()
    }

    fn sample_one<S: OrderScorer + ?Sized>(&self, scorer: &S, rng: &mut StdRng) -> Result<Hypothesis> {
        let mut h = Hypothesis::start();
        for _ in 0..self.config.max_iterations {
            if h.is_finished() {
                break;
            }
            let scores = checked_scores(scorer, h.tokens(), h.relative(), self.config.vocab_size)?;
            let log_probs = log_softmax(scores.view());

            // joint index is the row-major offset: token * slots + slot
            let mut ranked: Vec<(usize, f32)> = log_probs
                .iter()
                .copied()
                .enumerate()
                .filter(|(_, lp)| lp.is_finite())
                .collect();
            if ranked.is_empty() {
                break;
            }
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

            let kept = &ranked[..nucleus_len(&ranked, self.config.probability)];
            let top = kept[0].1;
            let dist = WeightedIndex::new(kept.iter().map(|&(_, lp)| (lp - top).exp()))
                .map_err(|e| OrderError::invalid(format!("nucleus weights: {}", e)))?;
            let (joint, log_prob) = kept[dist.sample(rng)];

            let slots = h.num_slots();
            h = h.extend(joint / slots, joint % slots, h.len(), log_prob)?;
        }
        debug!(
            len = h.len(),
            log_prob = h.log_prob(),
            finished = h.is_finished(),
            "nucleus sample"
        );
        Ok(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{END_ID, START_ID};
    use crate::permutation::RelativePositions;
    use ndarray::Array2;

    const VOCAB: usize = 8;

    // first step: tokens 4..8 at slot 0 with probabilities 0.1..0.4
    fn first_step(tokens: &[usize], _: &RelativePositions, _: usize) -> Array2<f32> {
        let mut s = Array2::from_elem((VOCAB, tokens.len()), f32::NEG_INFINITY);
        for (i, p) in [0.1f32, 0.2, 0.3, 0.4].iter().enumerate() {
            s[[4 + i, 0]] = p.ln();
        }
        s
    }

    #[test]
    fn test_full_mass_is_multinomial() {
        let config = NucleusConfig::new(VOCAB)
            .with_num_samples(4000)
            .with_probability(1.0)
            .with_max_iterations(1);
        let mut rng = StdRng::seed_from_u64(11);
        let out = NucleusSampler::new(config).sample(&first_step, &mut rng).unwrap();

        let mut counts = [0usize; 4];
        for d in &out {
            assert!(d.truncated);
            counts[d.tokens[1] - 4] += 1;
        }
        for (i, &c) in counts.iter().enumerate() {
            let freq = c as f32 / out.len() as f32;
            let expected = 0.1 * (i + 1) as f32;
            assert!((freq - expected).abs() < 0.03, "token {}: {}", i + 4, freq);
        }
    }

    #[test]
    fn test_small_nucleus_keeps_top_choice() {
        let config = NucleusConfig::new(VOCAB)
            .with_num_samples(50)
            .with_probability(0.3)
            .with_max_iterations(1);
        let mut rng = StdRng::seed_from_u64(0);
        let out = NucleusSampler::new(config).sample(&first_step, &mut rng).unwrap();
        for d in &out {
            assert_eq!(d.tokens[1], 7);
            // model probability, not the renormalized one
            assert!((d.log_prob - 0.4f32.ln()).abs() < 1e-5);
        }
    }

    #[test]
    fn test_seeded_and_reproducible() {
        let scorer = |tokens: &[usize], _: &RelativePositions, _: usize| {
            let mut s = Array2::<f32>::zeros((VOCAB, tokens.len()));
            s[[END_ID, 0]] = 1.0;
            s
        };
        let sampler = NucleusSampler::new(NucleusConfig::new(VOCAB).with_num_samples(16));
        let a = sampler.sample(&scorer, &mut StdRng::seed_from_u64(42)).unwrap();
        let b = sampler.sample(&scorer, &mut StdRng::seed_from_u64(42)).unwrap();
        assert_eq!(a, b);
        assert!(a.iter().all(|d| d.tokens[0] == START_ID));
    }

    #[test]
    fn test_nucleus_len() {
        let ranked = vec![(0, 0.5f32.ln()), (1, 0.3f32.ln()), (2, 0.2f32.ln())];
        assert_eq!(nucleus_len(&ranked, 0.4), 1);
        assert_eq!(nucleus_len(&ranked, 0.6), 2);
        assert_eq!(nucleus_len(&ranked, 1.0), 3);
        assert_eq!(nucleus_len(&ranked, 0.0), 1);
    }

    #[test]
    fn test_nucleus_must_exceed_threshold() {
        let ranked = vec![(0, 0.5f32.ln()), (1, 0.3f32.ln()), (2, 0.2f32.ln())];
        // the first entry alone holds exactly p, which is not enough
        let p = ranked[0].1.exp();
        assert_eq!(nucleus_len(&ranked, p), 2);
    }

    #[test]
    fn test_zero_iterations_returns_start() {
        let config = NucleusConfig::new(VOCAB)
            .with_num_samples(3)
            .with_max_iterations(0);
        let out = NucleusSampler::new(config)
            .sample(&first_step, &mut StdRng::seed_from_u64(9))
            .unwrap();
        assert_eq!(out.len(), 3);
        for d in &out {
            assert_eq!(d.tokens, vec![START_ID]);
            assert_eq!(d.positions, vec![0]);
            assert!(d.truncated);
            assert_eq!(d.log_prob, 0.0);
        }
    }

    #[test]
    fn test_batch() {
        let sampler = NucleusSampler::new(NucleusConfig::new(VOCAB).with_num_samples(3).with_max_iterations(2));
        let scorers = [first_step, first_step];
        let out = sampler
            .decode_batch(&scorers, &mut StdRng::seed_from_u64(1))
            .unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|samples| samples.len() == 3));
    }
}
