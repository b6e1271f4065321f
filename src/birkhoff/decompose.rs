//! Birkhoff–von Neumann decomposition of doubly stochastic matrices.

use ndarray::{Array2, ArrayView2};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::birkhoff::matching::bottleneck_matching;
use crate::config::{BIRKHOFF_TOLERANCE, BIRKHOFF_ZERO_EPS, PERMUTATION_TOLERANCE};
use crate::error::{OrderError, Result};
use crate::permutation::codec::{permutation_matrix, validate_doubly_stochastic};

/// One weighted hard permutation, `permutation[row] = column`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BirkhoffTerm {
    pub permutation: Vec<usize>,
    /// Convex weight; the weights of a decomposition sum to one.
    pub weight: f32,
}

impl BirkhoffTerm {
    pub fn matrix(&self) -> Result<Array2<f32>> {
        permutation_matrix(&self.permutation)
    }
}

/// Convex combination of permutation matrices, in extraction order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Decomposition {
    /// Side length of the decomposed matrix.
    pub size: usize,
    pub terms: Vec<BirkhoffTerm>,
}

impl Decomposition {
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn total_weight(&self) -> f32 {
        self.terms.iter().map(|t| t.weight).sum()
    }

    /// `Σ weight · permutation` as a dense matrix.
    pub fn reconstruct(&self) -> Array2<f32> {
        let mut out = Array2::zeros((self.size, self.size));
        for term in &self.terms {
            for (row, &col) in term.permutation.iter().enumerate() {
                out[[row, col]] += term.weight;
            }
        }
        out
    }

    /// Draw one term with probability proportional to its weight.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&BirkhoffTerm> {
        let dist = WeightedIndex::new(self.terms.iter().map(|t| t.weight)).ok()?;
        self.terms.get(dist.sample(rng))
    }
}

/// Decomposer settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecomposerConfig {
    /// Term cap; `None` means the matrix side length. Never above `L² − 2L + 2`.
    pub max_terms: Option<usize>,
    /// Residual mass that may be folded into the last term.
    pub tolerance: f32,
    /// Residual entries at or below this count as zero.
    pub zero_eps: f32,
}

impl Default for DecomposerConfig {
    fn default() -> Self {
        Self {
            max_terms: None,
            tolerance: BIRKHOFF_TOLERANCE,
            zero_eps: BIRKHOFF_ZERO_EPS,
        }
    }
}

impl DecomposerConfig {
    pub fn with_max_terms(mut self, max_terms: usize) -> Self {
        self.max_terms = Some(max_terms);
        self
    }
}

/// Greedy bottleneck decomposer.
#[derive(Clone, Debug, Default)]
pub struct BirkhoffDecomposer {
    pub config: DecomposerConfig,
}

impl BirkhoffDecomposer {
    pub fn new(config: DecomposerConfig) -> Self {
        Self { config }
    }

    /// Marcus–Ree bound on the number of terms for an `n × n` matrix.
    pub fn term_bound(n: usize) -> usize {
        if n == 0 {
            0
        } else {
            n * n - 2 * n + 2
        }
    }

    fn term_cap(&self, n: usize) -> usize {
        self.config
            .max_terms
            .unwrap_or(n)
            .clamp(1, Self::term_bound(n).max(1))
    }

    /// Split `p` into weighted hard permutations.
    ///
    /// Each round extracts the matching with the largest minimum entry of the
    /// residual and subtracts it at that weight.
    pub fn decompose(&self, p: ArrayView2<f32>) -> Result<Decomposition> {
        let checked = validate_doubly_stochastic(p, PERMUTATION_TOLERANCE)?;
        let n = checked.nrows();
        let cap = self.term_cap(n);
        let eps = f64::from(self.config.zero_eps);

        let mut residual = checked.mapv(f64::from);
        let mut remaining = 1.0f64;
        let mut decomposition = Decomposition {
            size: n,
            terms: Vec::new(),
        };

        while decomposition.len() < cap && remaining > eps * n as f64 {
            let Some((perm, weight)) = bottleneck_matching(residual.view(), eps) else {
                break;
            };
            for (row, &col) in perm.iter().enumerate() {
                let cell = &mut residual[[row, col]];
                *cell -= weight;
                if *cell <= eps {
                    *cell = 0.0;
                }
            }
            remaining -= weight;
            decomposition.terms.push(BirkhoffTerm {
                permutation: perm,
                weight: weight as f32,
            });
        }

        let residual_mass = remaining.max(0.0) as f32;
        if decomposition.is_empty() || residual_mass > self.config.tolerance {
            warn!(
                terms = decomposition.len(),
                residual = residual_mass,
                "birkhoff decomposition did not converge"
            );
            return Err(OrderError::NonConvergent {
                partial: decomposition,
                residual: residual_mass,
            });
        }

        if let Some(last) = decomposition.terms.last_mut() {
            last.weight += residual_mass;
        }
        debug!(
            terms = decomposition.len(),
            residual = residual_mass,
            "birkhoff decomposition"
        );
        Ok(decomposition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::StickBreaking;
    use ndarray::array;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn max_abs_diff(a: &Array2<f32>, b: &Array2<f32>) -> f32 {
        (a - b).iter().fold(0.0f32, |m, v| m.max(v.abs()))
    }

    #[test]
    fn test_hard_permutation_is_single_term() {
        let p = permutation_matrix(&[1, 2, 0, 3]).unwrap();
        let d = BirkhoffDecomposer::default().decompose(p.view()).unwrap();
        assert_eq!(d.len(), 1);
        assert_eq!(d.terms[0].permutation, vec![1, 2, 0, 3]);
        assert!((d.terms[0].weight - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_uniform_matrix() {
        let p = Array2::from_elem((3, 3), 1.0f32 / 3.0);
        let d = BirkhoffDecomposer::default().decompose(p.view()).unwrap();
        assert_eq!(d.len(), 3);
        assert!((d.total_weight() - 1.0).abs() < 1e-3);
        assert!(max_abs_diff(&d.reconstruct(), &p) < 1e-3);
    }

    #[test]
    fn test_soft_matrix_reconstructs() {
        let p = array![
            [0.5f32, 0.3, 0.2, 0.0],
            [0.2, 0.5, 0.0, 0.3],
            [0.3, 0.0, 0.5, 0.2],
            [0.0, 0.2, 0.3, 0.5]
        ];
        let decomposer = BirkhoffDecomposer::new(DecomposerConfig::default().with_max_terms(10));
        let d = decomposer.decompose(p.view()).unwrap();
        assert!(d.terms.iter().all(|t| t.weight > 0.0));
        assert!((d.total_weight() - 1.0).abs() < 1e-3);
        assert!(max_abs_diff(&d.reconstruct(), &p) < 1e-3);
    }

    #[test]
    fn test_cap_reports_partial() {
        let p = array![
            [0.5f32, 0.3, 0.2, 0.0],
            [0.2, 0.5, 0.0, 0.3],
            [0.3, 0.0, 0.5, 0.2],
            [0.0, 0.2, 0.3, 0.5]
        ];
        let decomposer = BirkhoffDecomposer::new(DecomposerConfig::default().with_max_terms(1));
        match decomposer.decompose(p.view()) {
            Err(OrderError::NonConvergent { partial, residual }) => {
                assert_eq!(partial.len(), 1);
                assert!((partial.total_weight() + residual - 1.0).abs() < 1e-4);
            }
            other => panic!("expected NonConvergent, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_non_stochastic() {
        let p = array![[0.9f32, 0.0], [0.0, 1.0]];
        assert!(matches!(
            BirkhoffDecomposer::default().decompose(p.view()),
            Err(OrderError::InvalidPermutation { .. })
        ));
    }

    #[test]
    fn test_term_bound() {
        assert_eq!(BirkhoffDecomposer::term_bound(1), 1);
        assert_eq!(BirkhoffDecomposer::term_bound(4), 10);
    }

    #[test]
    fn test_sample_by_weight() {
        let d = Decomposition {
            size: 2,
            terms: vec![
                BirkhoffTerm {
                    permutation: vec![0, 1],
                    weight: 0.0,
                },
                BirkhoffTerm {
                    permutation: vec![1, 0],
                    weight: 1.0,
                },
            ],
        };
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..20 {
            assert_eq!(d.sample(&mut rng).unwrap().permutation, vec![1, 0]);
        }
        assert!(Decomposition::default().sample(&mut rng).is_none());
    }

    proptest! {
        #[test]
        fn prop_normalized_scores_decompose_exactly(
            n in 2usize..9,
            seed in proptest::collection::vec(-6.0f32..6.0, 64),
        ) {
            let scores = Array2::from_shape_fn((n, n), |(i, j)| seed[i * 8 + j]);
            let mask = Array2::from_elem((n, n), true);
            let p = StickBreaking::default().normalize(scores.view(), mask.view()).unwrap();

            let decomposer = BirkhoffDecomposer::new(DecomposerConfig::default().with_max_terms(n * n));
            let d = decomposer.decompose(p.view()).unwrap();
            prop_assert!(d.terms.iter().all(|t| t.weight >= 0.0));
            prop_assert!((d.total_weight() - 1.0).abs() < 1e-3);
            prop_assert!(max_abs_diff(&d.reconstruct(), &p) < 1e-3);
        }
    }
}
