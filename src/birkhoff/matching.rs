//! Bipartite matching on square matrices.
//!
//! All three flavours return `perm[row] = column`:
//! 1. `perfect_matching`: any perfect matching inside a boolean support
//! 2. `bottleneck_matching`: the matching whose smallest entry is largest
//! 3. `hungarian`: the matching with the largest total weight

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;

use crate::error::{OrderError, Result};
use crate::permutation::codec::permutation_matrix;

/// Weights below this are treated as forbidden by [`hungarian`].
const FORBIDDEN_WEIGHT: f64 = -1e9;

fn augment(
    row: usize,
    support: &ArrayView2<bool>,
    visited: &mut [bool],
    col_owner: &mut [Option<usize>],
) -> bool {
    for col in 0..support.ncols() {
        if !support[[row, col]] || visited[col] {
            continue;
        }
        visited[col] = true;
        let free = match col_owner[col] {
            None => true,
            Some(other) => augment(other, support, visited, col_owner),
        };
        if free {
            col_owner[col] = Some(row);
            return true;
        }
    }
    false
}

/// Find a perfect matching inside `support` with augmenting paths.
pub fn perfect_matching(support: ArrayView2<bool>) -> Option<Vec<usize>> {
    let (n, m) = support.dim();
    if n != m {
        return None;
    }
    let mut col_owner: Vec<Option<usize>> = vec![None; n];
    for row in 0..n {
        let mut visited = vec![false; n];
        if !augment(row, &support, &mut visited, &mut col_owner) {
            return None;
        }
    }

    let mut perm = vec![0; n];
    for (col, owner) in col_owner.iter().enumerate() {
        perm[(*owner)?] = col;
    }
    Some(perm)
}

/// Perfect matching on entries `> eps` maximizing the smallest covered entry.
///
/// Binary search over the distinct entry values for the largest threshold
/// whose support still admits a perfect matching. Returns the matching and its
/// minimum entry, or `None` when the support has no perfect matching.
pub fn bottleneck_matching(m: ArrayView2<f64>, eps: f64) -> Option<(Vec<usize>, f64)> {
    let mut values: Vec<f64> = m.iter().copied().filter(|&v| v > eps).collect();
    values.sort_by(|a, b| a.total_cmp(b));
    values.dedup();

    let feasible = |threshold: f64| perfect_matching(m.mapv(|v| v >= threshold).view());

    let mut best = feasible(*values.first()?)?;
    let (mut lo, mut hi) = (1usize, values.len());
    while lo < hi {
        let mid = (lo + hi) / 2;
        match feasible(values[mid]) {
            Some(perm) => {
                best = perm;
                lo = mid + 1;
            }
            None => hi = mid,
        }
    }

    let min = best
        .iter()
        .enumerate()
        .map(|(row, &col)| m[[row, col]])
        .fold(f64::INFINITY, f64::min);
    Some((best, min))
}

/// Maximum-weight assignment (Kuhn–Munkres with potentials, O(n³)).
///
/// Non-finite weights are treated as forbidden.
pub fn hungarian(weights: ArrayView2<f32>) -> Result<Vec<usize>> {
    let (n, m) = weights.dim();
    if n != m {
        return Err(OrderError::shape("square weights", format!("[{}, {}]", n, m)));
    }
    if n == 0 {
        return Ok(Vec::new());
    }

    // minimise cost = -weight, 1-indexed with a virtual row/column 0
    let cost = |i: usize, j: usize| -> f64 {
        let w = f64::from(weights[[i - 1, j - 1]]);
        if w.is_finite() {
            -w.max(FORBIDDEN_WEIGHT)
        } else {
            -FORBIDDEN_WEIGHT
        }
    };

    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; n + 1];
    let mut owner = vec![0usize; n + 1];
    let mut way = vec![0usize; n + 1];

    for row in 1..=n {
        owner[0] = row;
        let mut j0 = 0usize;
        let mut minv = vec![f64::INFINITY; n + 1];
        let mut used = vec![false; n + 1];

        loop {
            used[j0] = true;
            let i0 = owner[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0usize;
            for j in 1..=n {
                if used[j] {
                    continue;
                }
                let cur = cost(i0, j) - u[i0] - v[j];
                if cur < minv[j] {
                    minv[j] = cur;
                    way[j] = j0;
                }
                if minv[j] < delta {
                    delta = minv[j];
                    j1 = j;
                }
            }
            for j in 0..=n {
                if used[j] {
                    u[owner[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if owner[j0] == 0 {
                break;
            }
        }

        loop {
            let j1 = way[j0];
            owner[j0] = owner[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut perm = vec![0usize; n];
    for j in 1..=n {
        perm[owner[j] - 1] = j - 1;
    }
    Ok(perm)
}

/// Nearest hard permutation to a soft one (maximum `⟨P, X⟩`).
pub fn project_to_permutation(p: ArrayView2<f32>) -> Result<Array2<f32>> {
    permutation_matrix(&hungarian(p)?)
}

/// Batched [`project_to_permutation`] over `[B, L, L]`.
pub fn project_to_permutation_batch(p: ArrayView3<f32>) -> Result<Array3<f32>> {
    let items: Vec<Array2<f32>> = (0..p.len_of(Axis(0)))
        .into_par_iter()
        .map(|i| project_to_permutation(p.index_axis(Axis(0), i)))
        .collect::<Result<_>>()?;

    let mut out = Array3::zeros(p.dim());
    for (i, item) in items.iter().enumerate() {
        out.index_axis_mut(Axis(0), i).assign(item);
    }
    Ok(out)
}
