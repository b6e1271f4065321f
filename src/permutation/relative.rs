//! Compact signed relative positions maintained incrementally during search.

use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

use crate::config::{NUM_RELATIONS, REL_AFTER, REL_BEFORE, REL_SELF};
use crate::error::{OrderError, Result};

/// Pairwise order of generation steps: `signs[i][j] = sign(pos(i) - pos(j))`.
///
/// Each search hypothesis owns one of these. Growing it returns a new value, so
/// hypotheses never share a buffer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelativePositions {
    signs: Array2<i8>,
}

impl RelativePositions {
    /// Relative positions of a lone start token.
    pub fn start() -> Self {
        Self {
            signs: Array2::zeros((1, 1)),
        }
    }

    /// Build from absolute positions of each step.
    pub fn from_positions(positions: &[usize]) -> Self {
        let n = positions.len();
        let signs = Array2::from_shape_fn((n, n), |(i, j)| {
            match positions[i].cmp(&positions[j]) {
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Equal => 0,
                std::cmp::Ordering::Greater => 1,
            }
        });
        Self { signs }
    }

    /// Build from a one-hot tensor `[n, n, 3]`.
    pub fn from_one_hot(r: &Array3<f32>) -> Result<Self> {
        let (n, n2, k) = r.dim();
        if n != n2 || k != NUM_RELATIONS {
            return Err(OrderError::shape(
                format!("[n, n, {}]", NUM_RELATIONS),
                format!("[{}, {}, {}]", n, n2, k),
            ));
        }
        let signs = Array2::from_shape_fn((n, n), |(i, j)| {
            let cell = [r[[i, j, REL_BEFORE]], r[[i, j, REL_SELF]], r[[i, j, REL_AFTER]]];
            let mut best = 0;
            for c in 1..NUM_RELATIONS {
                if cell[c] > cell[best] {
                    best = c;
                }
            }
            best as i8 - 1
        });
        Ok(Self { signs })
    }

    /// Number of generation steps covered.
    pub fn len(&self) -> usize {
        self.signs.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.signs.is_empty()
    }

    /// Signed relation between steps `i` and `j`.
    pub fn get(&self, i: usize, j: usize) -> i8 {
        self.signs[[i, j]]
    }

    pub fn signs(&self) -> &Array2<i8> {
        &self.signs
    }

    /// Add a step inserted immediately after step `slot`.
    ///
    /// The new step lies after `slot` and every step before it, and before
    /// every other step.
    pub fn insert_after(&self, slot: usize) -> Result<Self> {
        let n = self.len();
        if slot >= n {
            return Err(OrderError::shape(
                format!("slot < {}", n),
                format!("slot = {}", slot),
            ));
        }
        let mut signs = Array2::zeros((n + 1, n + 1));
        signs
            .slice_mut(ndarray::s![..n, ..n])
            .assign(&self.signs);
        for j in 0..n {
            let left_of_new = j == slot || self.signs[[slot, j]] > 0;
            let sign: i8 = if left_of_new { 1 } else { -1 };
            signs[[n, j]] = sign;
            signs[[j, n]] = -sign;
        }
        Ok(Self { signs })
    }

    /// Absolute position of each step: how many steps it comes after.
    pub fn absolute_positions(&self) -> Vec<usize> {
        self.signs
            .outer_iter()
            .map(|row| row.iter().filter(|&&s| s > 0).count())
            .collect()
    }

    /// One-hot tensor `[n, n, 3]` in the codec's class layout.
    pub fn to_one_hot(&self) -> Array3<f32> {
        let n = self.len();
        let mut r = Array3::zeros((n, n, NUM_RELATIONS));
        for ((i, j), &s) in self.signs.indexed_iter() {
            r[[i, j, (s + 1) as usize]] = 1.0;
        }
        r
    }
}
