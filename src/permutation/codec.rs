//! Conversions between permutation matrices, relative positions and pointer labels.
//!
//! All single-example functions take `[L, L]` views; the `_batch` variants take
//! `[B, L, L]` and run examples in parallel with rayon.

use ndarray::{s, Array2, Array3, Array4, ArrayView2, ArrayView3, ArrayView4, Axis};
use rayon::prelude::*;

use crate::config::{NUM_RELATIONS, PERMUTATION_TOLERANCE, REL_AFTER, REL_BEFORE, REL_SELF};
use crate::error::{OrderError, Result};

fn square_len(p: &ArrayView2<f32>) -> Result<usize> {
    let (rows, cols) = p.dim();
    if rows != cols {
        return Err(OrderError::shape(
            "square matrix",
            format!("[{}, {}]", rows, cols),
        ));
    }
    Ok(rows)
}

/// Check that `p` is doubly stochastic within `tol` and return a renormalized copy.
///
/// Negative entries down to `-tol` are clamped to zero; row and column sums off
/// by at most `tol` are corrected with one row pass and one column pass.
pub fn validate_doubly_stochastic(p: ArrayView2<f32>, tol: f32) -> Result<Array2<f32>> {
    let n = square_len(&p)?;
    if n == 0 {
        return Err(OrderError::shape("non-empty matrix", "[0, 0]"));
    }

    if let Some(bad) = p.iter().find(|v| !v.is_finite() || **v < -tol) {
        return Err(OrderError::invalid(format!("entry {} outside [0, 1]", bad)));
    }

    for (i, row) in p.axis_iter(Axis(0)).enumerate() {
        let sum: f32 = row.sum();
        if (sum - 1.0).abs() > tol {
            return Err(OrderError::invalid(format!("row {} sums to {}", i, sum)));
        }
    }
    for (j, col) in p.axis_iter(Axis(1)).enumerate() {
        let sum: f32 = col.sum();
        if (sum - 1.0).abs() > tol {
            return Err(OrderError::invalid(format!("column {} sums to {}", j, sum)));
        }
    }

    let mut out = p.mapv(|v| v.max(0.0));
    for mut row in out.axis_iter_mut(Axis(0)) {
        let sum: f32 = row.sum();
        row /= sum;
    }
    for mut col in out.axis_iter_mut(Axis(1)) {
        let sum: f32 = col.sum();
        col /= sum;
    }
    Ok(out)
}

/// Whether `p` is a 0/1 permutation matrix within `tol`.
pub fn is_hard(p: ArrayView2<f32>, tol: f32) -> bool {
    p.iter().all(|&v| v.abs() <= tol || (v - 1.0).abs() <= tol)
        && validate_doubly_stochastic(p, tol).is_ok()
}

/// Build the hard permutation matrix whose row `t` is hot at column `order[t]`.
pub fn permutation_matrix(order: &[usize]) -> Result<Array2<f32>> {
    let n = order.len();
    let mut seen = vec![false; n];
    for &c in order {
        if c >= n || seen[c] {
            return Err(OrderError::invalid(format!(
                "{:?} is not a bijection on 0..{}",
                order, n
            )));
        }
        seen[c] = true;
    }
    let mut p = Array2::zeros((n, n));
    for (t, &c) in order.iter().enumerate() {
        p[[t, c]] = 1.0;
    }
    Ok(p)
}

/// Read the absolute position of every generation step from a hard matrix.
pub fn matrix_to_order(p: ArrayView2<f32>) -> Result<Vec<usize>> {
    if !is_hard(p, PERMUTATION_TOLERANCE) {
        return Err(OrderError::invalid("expected a hard permutation matrix"));
    }
    Ok(p.axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (c, &v)| {
                    if v > best.1 {
                        (c, v)
                    } else {
                        best
                    }
                })
                .0
        })
        .collect())
}

/// Ranks of the first `L-1` generation steps among themselves.
///
/// This is what [`relative_to_absolute`] recovers from
/// [`matrix_to_relative`]; when the last step holds the last position (the
/// padding invariant) it equals the absolute positions.
pub fn step_ranks(p: ArrayView2<f32>) -> Result<Vec<usize>> {
    let order = matrix_to_order(p)?;
    let m = order.len().saturating_sub(1);
    let head = &order[..m];
    Ok(head
        .iter()
        .map(|&pos| head.iter().filter(|&&other| other < pos).count())
        .collect())
}

/// Convert a (hard or soft) permutation matrix into a relative-position tensor.
///
/// Returns `R` with shape `[L-1, L-1, 3]` where `R[i, j]` is the (expected)
/// one-hot encoding of `sign(pos(i) - pos(j))`. The pairwise "after" indicator
/// is `P · T · Pᵀ` with `T` the strict lower triangle, so no `L³` tensor is
/// formed. For soft `P` rows are treated as independent.
pub fn matrix_to_relative(p: ArrayView2<f32>) -> Result<Array3<f32>> {
    let p = validate_doubly_stochastic(p, PERMUTATION_TOLERANCE)?;
    let n = p.nrows();
    if n < 2 {
        return Err(OrderError::shape("L >= 2", format!("L = {}", n)));
    }
    let m = n - 1;

    let lower = Array2::from_shape_fn((n, n), |(c, c2)| if c > c2 { 1.0f32 } else { 0.0 });
    let after_full = p.dot(&lower).dot(&p.t());
    let after = after_full.slice(s![..m, ..m]);

    let mut r = Array3::zeros((m, m, NUM_RELATIONS));
    for i in 0..m {
        for j in 0..m {
            if i == j {
                r[[i, j, REL_SELF]] = 1.0;
                continue;
            }
            let a = after[[i, j]].clamp(0.0, 1.0);
            let b = after[[j, i]].clamp(0.0, 1.0);
            r[[i, j, REL_AFTER]] = a;
            r[[i, j, REL_BEFORE]] = b;
            r[[i, j, REL_SELF]] = (1.0 - a - b).clamp(0.0, 1.0);
        }
    }
    Ok(r)
}

/// Batched [`matrix_to_relative`]: `[B, L, L]` → `[B, L-1, L-1, 3]`.
pub fn matrix_to_relative_batch(p: ArrayView3<f32>) -> Result<Array4<f32>> {
    let (b, rows, cols) = p.dim();
    if rows != cols || rows < 2 {
        return Err(OrderError::shape(
            "[B, L, L] with L >= 2",
            format!("[{}, {}, {}]", b, rows, cols),
        ));
    }
    let m = rows - 1;
    let items: Vec<Array3<f32>> = (0..b)
        .into_par_iter()
        .map(|i| matrix_to_relative(p.index_axis(Axis(0), i)))
        .collect::<Result<_>>()?;

    let mut out = Array4::zeros((b, m, m, NUM_RELATIONS));
    for (i, item) in items.iter().enumerate() {
        out.index_axis_mut(Axis(0), i).assign(item);
    }
    Ok(out)
}

/// Relative-position tensor of the left-to-right order for length `len`.
pub fn left_to_right_relative(len: usize) -> Array3<f32> {
    let m = len.saturating_sub(1);
    let mut r = Array3::zeros((m, m, NUM_RELATIONS));
    for i in 0..m {
        for j in 0..m {
            let class = match i.cmp(&j) {
                std::cmp::Ordering::Less => REL_BEFORE,
                std::cmp::Ordering::Equal => REL_SELF,
                std::cmp::Ordering::Greater => REL_AFTER,
            };
            r[[i, j, class]] = 1.0;
        }
    }
    r
}

/// [`left_to_right_relative`] repeated `batch` times: `[B, L-1, L-1, 3]`.
pub fn left_to_right_relative_batch(batch: usize, len: usize) -> Array4<f32> {
    let one = left_to_right_relative(len);
    let (m, _, k) = one.dim();
    let mut out = Array4::zeros((batch, m, m, k));
    for mut item in out.outer_iter_mut() {
        item.assign(&one);
    }
    out
}

fn relation_class(cell: ndarray::ArrayView1<f32>) -> usize {
    let mut best = 0;
    for k in 1..cell.len() {
        if cell[k] > cell[best] {
            best = k;
        }
    }
    best
}

/// Recover absolute ranks from a relative-position tensor `[n, n, 3]`.
///
/// The rank of step `i` is the number of other steps it is ordered after.
pub fn relative_to_absolute(r: ArrayView3<f32>) -> Result<Vec<usize>> {
    let (n, n2, k) = r.dim();
    if n != n2 || k != NUM_RELATIONS {
        return Err(OrderError::shape(
            format!("[n, n, {}]", NUM_RELATIONS),
            format!("[{}, {}, {}]", n, n2, k),
        ));
    }
    Ok((0..n)
        .map(|i| {
            (0..n)
                .filter(|&j| j != i && relation_class(r.slice(s![i, j, ..])) == REL_AFTER)
                .count()
        })
        .collect())
}

/// Batched [`relative_to_absolute`]: `[B, n, n, 3]` → `[B, n]`.
pub fn relative_to_absolute_batch(r: ArrayView4<f32>) -> Result<Array2<usize>> {
    let (b, n, _, _) = r.dim();
    let rows: Vec<Vec<usize>> = (0..b)
        .into_par_iter()
        .map(|i| relative_to_absolute(r.index_axis(Axis(0), i)))
        .collect::<Result<_>>()?;

    let mut out = Array2::zeros((b, n));
    for (i, row) in rows.iter().enumerate() {
        for (j, &v) in row.iter().enumerate() {
            out[[i, j]] = v;
        }
    }
    Ok(out)
}

/// Pointer labels and partial positions for a hard permutation matrix.
///
/// Returns `(labels, step_positions)`, both `[L-1, L-1]`:
/// - `labels[t-1]` is one-hot at slot `k`, meaning step `t` is inserted
///   immediately after the token emitted at step `k < t`, for `t` in `1..L`
/// - `step_positions[t][k]` is the rank of step `k` among steps `0..=t`
///   (zero for `k > t`)
///
/// Soft matrices, and orders that do not generate position 0 first, are
/// rejected with `InvalidPermutation`.
pub fn matrix_to_pointer(p: ArrayView2<f32>) -> Result<(Array2<f32>, Array2<f32>)> {
    let order = matrix_to_order(p)?;
    let n = order.len();
    if n < 2 {
        return Err(OrderError::shape("L >= 2", format!("L = {}", n)));
    }
    let m = n - 1;

    let mut labels = Array2::zeros((m, m));
    for t in 1..n {
        let slot = (0..t)
            .filter(|&k| order[k] < order[t])
            .max_by_key(|&k| order[k])
            .ok_or_else(|| {
                OrderError::invalid(format!(
                    "step {} lands left of every earlier step; step 0 must hold position 0",
                    t
                ))
            })?;
        labels[[t - 1, slot]] = 1.0;
    }

    let mut step_positions = Array2::zeros((m, m));
    let mut ranks: Vec<usize> = Vec::with_capacity(m);
    for t in 0..m {
        for k in 0..t {
            if order[t] < order[k] {
                ranks[k] += 1;
            }
        }
        ranks.push((0..t).filter(|&k| order[k] < order[t]).count());
        for (k, &rank) in ranks.iter().enumerate() {
            step_positions[[t, k]] = rank as f32;
        }
    }
    Ok((labels, step_positions))
}

/// Batched [`matrix_to_pointer`]: `[B, L, L]` → two `[B, L-1, L-1]` arrays.
pub fn matrix_to_pointer_batch(p: ArrayView3<f32>) -> Result<(Array3<f32>, Array3<f32>)> {
    let (b, rows, cols) = p.dim();
    if rows != cols || rows < 2 {
        return Err(OrderError::shape(
            "[B, L, L] with L >= 2",
            format!("[{}, {}, {}]", b, rows, cols),
        ));
    }
    let m = rows - 1;
    let items: Vec<(Array2<f32>, Array2<f32>)> = (0..b)
        .into_par_iter()
        .map(|i| matrix_to_pointer(p.index_axis(Axis(0), i)))
        .collect::<Result<_>>()?;

    let mut labels = Array3::zeros((b, m, m));
    let mut positions = Array3::zeros((b, m, m));
    for (i, (l, pos)) in items.iter().enumerate() {
        labels.index_axis_mut(Axis(0), i).assign(l);
        positions.index_axis_mut(Axis(0), i).assign(pos);
    }
    Ok((labels, positions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use proptest::prelude::*;

    fn identity(n: usize) -> Array2<f32> {
        Array2::eye(n)
    }

    #[test]
    fn test_identity_with_padding_scenario() {
        // [start, a, b, end, pad]
        let p = identity(5);
        for row in p.axis_iter(Axis(0)) {
            assert_eq!(row.sum(), 1.0);
        }
        for col in p.axis_iter(Axis(1)) {
            assert_eq!(col.sum(), 1.0);
        }

        let (labels, _) = matrix_to_pointer(p.view()).unwrap();
        assert_eq!(labels.dim(), (4, 4));
        assert_eq!(labels[[0, 0]], 1.0, "a goes after start (slot 0)");
        assert_eq!(labels[[1, 1]], 1.0, "b goes after a (slot 1)");
        assert_eq!(labels.row(0).sum(), 1.0);
        assert_eq!(labels.row(1).sum(), 1.0);
    }

    #[test]
    fn test_relative_identity_matches_l2r() {
        let r = matrix_to_relative(identity(6).view()).unwrap();
        assert_eq!(r, left_to_right_relative(6));
    }

    #[test]
    fn test_l2r_batch() {
        let r = left_to_right_relative_batch(3, 5);
        assert_eq!(r.dim(), (3, 4, 4, 3));
        assert_eq!(r.index_axis(Axis(0), 2), left_to_right_relative(5));
    }

    #[test]
    fn test_relative_sign_convention() {
        // step 1 sits at position 2, step 2 at position 1
        let p = permutation_matrix(&[0, 2, 1, 3]).unwrap();
        let r = matrix_to_relative(p.view()).unwrap();
        assert_eq!(r[[1, 2, REL_AFTER]], 1.0);
        assert_eq!(r[[2, 1, REL_BEFORE]], 1.0);
        assert_eq!(r[[0, 1, REL_BEFORE]], 1.0);
        assert_eq!(relative_to_absolute(r.view()).unwrap(), vec![0, 2, 1]);
    }

    #[test]
    fn test_relative_soft_is_distribution() {
        let p = array![
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 0.5, 0.5, 0.0],
            [0.0, 0.5, 0.5, 0.0],
            [0.0, 0.0, 0.0, 1.0]
        ];
        let r = matrix_to_relative(p.view()).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let s: f32 = r.slice(s![i, j, ..]).sum();
                assert!((s - 1.0).abs() < 1e-5);
            }
        }
        assert!((r[[1, 2, REL_AFTER]] - 0.25).abs() < 1e-6);
        assert!((r[[1, 2, REL_SELF]] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_non_square() {
        let p = Array2::<f32>::zeros((3, 4));
        assert!(matches!(
            matrix_to_relative(p.view()),
            Err(OrderError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_row_sum() {
        let mut p = identity(4);
        p[[1, 2]] = 0.3;
        assert!(matches!(
            matrix_to_relative(p.view()),
            Err(OrderError::InvalidPermutation { .. })
        ));
    }

    #[test]
    fn test_near_miss_is_renormalized() {
        let mut p = identity(3);
        p[[0, 0]] = 1.00005;
        let fixed = validate_doubly_stochastic(p.view(), PERMUTATION_TOLERANCE).unwrap();
        assert!((fixed.row(0).sum() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_pointer_rejects_soft() {
        let p = array![[0.5, 0.5], [0.5, 0.5]];
        assert!(matches!(
            matrix_to_pointer(p.view()),
            Err(OrderError::InvalidPermutation { .. })
        ));
    }

    #[test]
    fn test_pointer_out_of_order() {
        // positions generated: start(0), end-ish content 3, then 1, then 2, then 4
        let p = permutation_matrix(&[0, 3, 1, 2, 4]).unwrap();
        let (labels, positions) = matrix_to_pointer(p.view()).unwrap();
        // step 1 (pos 3) after start
        assert_eq!(labels[[0, 0]], 1.0);
        // step 2 (pos 1) after start
        assert_eq!(labels[[1, 0]], 1.0);
        // step 3 (pos 2) after step 2 (pos 1)
        assert_eq!(labels[[2, 2]], 1.0);
        // step 4 (pos 4) after step 1 (pos 3)
        assert_eq!(labels[[3, 1]], 1.0);

        // after step 2: start=0, step1=2, step2=1
        assert_eq!(positions.row(2).to_vec(), vec![0.0, 2.0, 1.0, 0.0]);
        assert_eq!(positions.row(3).to_vec(), vec![0.0, 3.0, 1.0, 2.0]);
    }

    #[test]
    fn test_pointer_rejects_start_not_first() {
        // step 0 holds position 1, so step 1 (position 0) has no left neighbour
        let p = permutation_matrix(&[1, 0, 2]).unwrap();
        assert!(matches!(
            matrix_to_pointer(p.view()),
            Err(OrderError::InvalidPermutation { .. })
        ));
    }

    #[test]
    fn test_batch_shapes() {
        let mut p = Array3::zeros((2, 4, 4));
        p.index_axis_mut(Axis(0), 0).assign(&identity(4));
        p.index_axis_mut(Axis(0), 1)
            .assign(&permutation_matrix(&[0, 2, 1, 3]).unwrap());

        let r = matrix_to_relative_batch(p.view()).unwrap();
        assert_eq!(r.dim(), (2, 3, 3, 3));
        let abs = relative_to_absolute_batch(r.view()).unwrap();
        assert_eq!(abs.row(1).to_vec(), vec![0, 2, 1]);

        let (labels, positions) = matrix_to_pointer_batch(p.view()).unwrap();
        assert_eq!(labels.dim(), (2, 3, 3));
        assert_eq!(positions.dim(), (2, 3, 3));
    }

    #[test]
    fn test_permutation_matrix_rejects_duplicates() {
        assert!(permutation_matrix(&[0, 0, 1]).is_err());
        assert!(permutation_matrix(&[0, 3, 1]).is_err());
    }

    fn shuffled(n: usize, keys: Vec<u32>) -> Vec<usize> {
        let mut idx: Vec<usize> = (0..n).collect();
        idx.sort_by_key(|&i| (keys[i], i));
        idx
    }

    proptest! {
        #[test]
        fn prop_relative_round_trip(keys in proptest::collection::vec(0u32..1000, 2..12)) {
            let order = shuffled(keys.len(), keys);
            let p = permutation_matrix(&order).unwrap();
            let r = matrix_to_relative(p.view()).unwrap();
            prop_assert_eq!(relative_to_absolute(r.view()).unwrap(), step_ranks(p.view()).unwrap());
        }

        #[test]
        fn prop_pointer_rows_one_hot(keys in proptest::collection::vec(0u32..1000, 1..9)) {
            let order: Vec<usize> = std::iter::once(0)
                .chain(shuffled(keys.len(), keys).into_iter().map(|i| i + 1))
                .collect();
            let p = permutation_matrix(&order).unwrap();
            let (labels, _) = matrix_to_pointer(p.view()).unwrap();
            for (t, row) in labels.axis_iter(Axis(0)).enumerate() {
                prop_assert_eq!(row.sum(), 1.0);
                // only already-emitted steps can be pointed at
                prop_assert_eq!(row.slice(s![t + 1..]).sum(), 0.0);
            }
        }
    }
}
