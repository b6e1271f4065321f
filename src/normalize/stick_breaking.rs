//! Stick-breaking construction of doubly stochastic matrices.
//!
//! For cell `(i, j)` with remaining row budget `r` and column budget `c`:
//!
//! ```text
//! u = min(r, c)
//! l = max(0, r - Σ_{k>j, valid} c_k, c - #{m>i : valid(m, j)})
//! β = σ(s_ij / T - ln K)          K = valid cells still right of j
//! p_ij = l + β (u - l)
//! ```
//!
//! The lower bound keeps every row and column completable, so the last valid
//! cell of each row absorbs exactly the remaining mass.

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{is_permutable, NORMALIZER_TOLERANCE};
use crate::error::{OrderError, Result};
use crate::normalize::noise::perturb;

/// Normalizer configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Scores are divided by this before the sigmoid.
    pub temperature: f32,

    /// Masked Sinkhorn sweeps allowed to clean up irregular masks.
    pub polish_iterations: usize,

    /// Required accuracy of row and column sums.
    pub tolerance: f32,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            polish_iterations: 100,
            tolerance: NORMALIZER_TOLERANCE,
        }
    }
}

impl NormalizerConfig {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Permutable tokens: everything except pad, start and end.
pub fn permutable_mask(tokens: &[usize]) -> Vec<bool> {
    tokens.iter().map(|&t| is_permutable(t)).collect()
}

/// Cells allowed to carry mass: permutable × permutable, plus the diagonal.
///
/// The diagonal keeps non-permutable rows as an identity block so the full
/// matrix stays doubly stochastic.
pub fn validity_mask(token_mask: &[bool]) -> Array2<bool> {
    let n = token_mask.len();
    Array2::from_shape_fn((n, n), |(i, j)| i == j || (token_mask[i] && token_mask[j]))
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Stick-breaking normalizer.
#[derive(Clone, Debug, Default)]
pub struct StickBreaking {
    pub config: NormalizerConfig,
}

impl StickBreaking {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    /// Map scores `[L, L]` to a doubly stochastic matrix supported on `mask`.
    pub fn normalize(&self, scores: ArrayView2<f32>, mask: ArrayView2<bool>) -> Result<Array2<f32>> {
        let (n, cols) = scores.dim();
        if n != cols {
            return Err(OrderError::shape("square scores", format!("[{}, {}]", n, cols)));
        }
        if mask.dim() != scores.dim() {
            return Err(OrderError::shape(
                format!("mask [{}, {}]", n, n),
                format!("{:?}", mask.dim()),
            ));
        }
        if let Some(row) = (0..n).find(|&i| !mask.row(i).iter().any(|&v| v)) {
            return Err(OrderError::EmptyRow { row });
        }
        if let Some(col) = (0..n).find(|&j| !mask.column(j).iter().any(|&v| v)) {
            return Err(OrderError::EmptyRow { row: col });
        }
        if let Some(((row, col), _)) = scores
            .indexed_iter()
            .find(|&((i, j), v)| mask[[i, j]] && !v.is_finite())
        {
            return Err(OrderError::NonFiniteScore { row, col });
        }

        let temperature = f64::from(self.config.temperature.max(f32::EPSILON));
        let mut p = Array2::<f64>::zeros((n, n));
        let mut col_rem = vec![1.0f64; n];

        // valid cells below (i, j) in column j, updated as rows are consumed
        let mut below: Vec<usize> = (0..n)
            .map(|j| mask.column(j).iter().filter(|&&v| v).count())
            .collect();

        for i in 0..n {
            let mut row_rem = 1.0f64;
            let valid: Vec<usize> = (0..n).filter(|&j| mask[[i, j]]).collect();
            for &j in &valid {
                below[j] -= 1;
            }

            for (idx, &j) in valid.iter().enumerate() {
                let right = &valid[idx + 1..];
                let row_capacity: f64 = right.iter().map(|&k| col_rem[k]).sum();
                let col_capacity = below[j] as f64;

                let upper = row_rem.min(col_rem[j]).max(0.0);
                let lower = (row_rem - row_capacity)
                    .max(col_rem[j] - col_capacity)
                    .max(0.0)
                    .min(upper);

                let x = if right.is_empty() {
                    upper
                } else {
                    let shift = (right.len() as f64).ln();
                    let beta = sigmoid(f64::from(scores[[i, j]]) / temperature - shift);
                    lower + beta * (upper - lower)
                };

                p[[i, j]] = x;
                row_rem -= x;
                col_rem[j] -= x;
            }
        }

        let deviation = max_deviation(&p);
        if deviation > f64::from(self.config.tolerance) {
            tracing::debug!(deviation, "stick-breaking left residual mass, polishing");
            self.polish(&mut p);
            let after = max_deviation(&p);
            if after > f64::from(self.config.tolerance) {
                return Err(OrderError::invalid(format!(
                    "mask admits no doubly stochastic matrix (deviation {:.3e})",
                    after
                )));
            }
        }

        Ok(p.mapv(|v| v as f32))
    }

    /// Batched [`normalize`](Self::normalize) over `[B, L, L]`.
    pub fn normalize_batch(
        &self,
        scores: ArrayView3<f32>,
        mask: ArrayView3<bool>,
    ) -> Result<Array3<f32>> {
        if scores.dim() != mask.dim() {
            return Err(OrderError::shape(
                format!("{:?}", scores.dim()),
                format!("{:?}", mask.dim()),
            ));
        }
        let (b, n, m) = scores.dim();
        let items: Vec<Array2<f32>> = (0..b)
            .into_par_iter()
            .map(|i| self.normalize(scores.index_axis(Axis(0), i), mask.index_axis(Axis(0), i)))
            .collect::<Result<_>>()?;

        let mut out = Array3::zeros((b, n, m));
        for (i, item) in items.iter().enumerate() {
            out.index_axis_mut(Axis(0), i).assign(item);
        }
        Ok(out)
    }

    /// Draw a noisy soft permutation: [`perturb`] the scores, then normalize.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        values: ArrayView2<f32>,
        log_scale: ArrayView2<f32>,
        mask: ArrayView2<bool>,
        rng: &mut R,
    ) -> Result<Array2<f32>> {
        let noisy = perturb(values, log_scale, mask, rng);
        self.normalize(noisy.view(), mask)
    }

    /// Alternate row and column rescaling; zero cells stay zero.
    fn polish(&self, p: &mut Array2<f64>) {
        for _ in 0..self.config.polish_iterations {
            for mut row in p.axis_iter_mut(Axis(0)) {
                let s = row.sum();
                if s > 0.0 {
                    row /= s;
                }
            }
            for mut col in p.axis_iter_mut(Axis(1)) {
                let s = col.sum();
                if s > 0.0 {
                    col /= s;
                }
            }
            if max_deviation(p) <= f64::from(self.config.tolerance) * 0.1 {
                break;
            }
        }
    }
}

/// Largest row or column sum error; a NaN sum counts as infinite.
fn max_deviation(p: &Array2<f64>) -> f64 {
    let rows = p.axis_iter(Axis(0)).map(|r| r.sum());
    let cols = p.axis_iter(Axis(1)).map(|c| c.sum());
    rows.chain(cols)
        .map(|s| if s.is_finite() { (s - 1.0).abs() } else { f64::INFINITY })
        .fold(0.0, f64::max)
}
