//! Gumbel-matching sampler for hard permutations.

use ndarray::ArrayView2;
use rand::Rng;
use rand_distr::{Distribution, Gumbel};
use serde::{Deserialize, Serialize};

use crate::birkhoff::matching::hungarian;
use crate::error::{OrderError, Result};

/// One permutation drawn by Gumbel matching.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GumbelSample {
    /// `permutation[row] = column`.
    pub permutation: Vec<usize>,
    /// Unnormalized score `⟨X, P⟩_F` of the sampled permutation.
    pub log_score: f32,
}

/// Draw `num_samples` permutations by perturbing `logits / temperature` with
/// standard Gumbel noise and solving the assignment problem.
pub fn gumbel_matching<R: Rng + ?Sized>(
    logits: ArrayView2<f32>,
    num_samples: usize,
    temperature: f32,
    rng: &mut R,
) -> Result<Vec<GumbelSample>> {
    if temperature.is_nan() || temperature <= 0.0 {
        return Err(OrderError::invalid(format!(
            "temperature must be positive, got {}",
            temperature
        )));
    }
    let gumbel = Gumbel::new(0.0f32, 1.0)
        .map_err(|e| OrderError::invalid(format!("gumbel noise: {}", e)))?;

    let mut samples = Vec::with_capacity(num_samples);
    for _ in 0..num_samples {
        let noisy = logits.mapv(|x| x / temperature + gumbel.sample(&mut *rng));
        let permutation = hungarian(noisy.view())?;
        let log_score = permutation
            .iter()
            .enumerate()
            .map(|(row, &col)| logits[[row, col]])
            .sum();
        samples.push(GumbelSample {
            permutation,
            log_score,
        });
    }
    Ok(samples)
}
