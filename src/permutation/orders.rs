//! Fixed generation orders.
//!
//! Every order generates the start token first and the end token after all
//! content; padding positions keep the identity so pad tokens never move.
//! Token ids are assumed to be ranked by corpus frequency (smaller id = more
//! common), which is what makes `Common` and `Rare` meaningful.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, Array3, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{OrderError, Result};
use crate::permutation::codec::permutation_matrix;

/// A named, data-independent (or frequency-based) generation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FixedOrder {
    /// Content left to right.
    LeftToRight,
    /// Content right to left.
    RightToLeft,
    /// Most frequent tokens first.
    Common,
    /// Least frequent tokens first.
    Rare,
}

impl FixedOrder {
    pub const ALL: [FixedOrder; 4] = [
        FixedOrder::LeftToRight,
        FixedOrder::RightToLeft,
        FixedOrder::Common,
        FixedOrder::Rare,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FixedOrder::LeftToRight => "l2r",
            FixedOrder::RightToLeft => "r2l",
            FixedOrder::Common => "common",
            FixedOrder::Rare => "rare",
        }
    }

    /// Absolute position generated at each step.
    ///
    /// `mask[i]` marks real tokens (start, content, end); it must be a prefix
    /// of at least two `true`s followed by padding.
    pub fn generation_order(&self, tokens: &[usize], mask: &[bool]) -> Result<Vec<usize>> {
        if tokens.len() != mask.len() {
            return Err(OrderError::shape(
                format!("mask of length {}", tokens.len()),
                format!("length {}", mask.len()),
            ));
        }
        let len = mask.iter().take_while(|&&m| m).count();
        if len < 2 || mask[len..].iter().any(|&m| m) {
            return Err(OrderError::invalid(
                "mask must be a prefix of at least two real tokens",
            ));
        }

        let mut content: Vec<usize> = (1..len - 1).collect();
        match self {
            FixedOrder::LeftToRight => {}
            FixedOrder::RightToLeft => content.reverse(),
            FixedOrder::Common => content.sort_by_key(|&i| tokens[i]),
            FixedOrder::Rare => content.sort_by_key(|&i| std::cmp::Reverse(tokens[i])),
        }

        let mut order = Vec::with_capacity(tokens.len());
        order.push(0);
        order.extend(content);
        order.extend(len - 1..tokens.len());
        Ok(order)
    }

    /// Hard permutation matrix `[L, L]` for one sentence.
    pub fn matrix(&self, tokens: &[usize], mask: &[bool]) -> Result<Array2<f32>> {
        permutation_matrix(&self.generation_order(tokens, mask)?)
    }

    /// Permutation matrices `[B, L, L]` for a batch of sentences `[B, L]`.
    pub fn batch(&self, tokens: ArrayView2<usize>, mask: ArrayView2<bool>) -> Result<Array3<f32>> {
        if tokens.dim() != mask.dim() {
            return Err(OrderError::shape(
                format!("{:?}", tokens.dim()),
                format!("{:?}", mask.dim()),
            ));
        }
        let (b, l) = tokens.dim();
        let items: Vec<Array2<f32>> = (0..b)
            .into_par_iter()
            .map(|i| {
                let t = tokens.index_axis(Axis(0), i).to_vec();
                let m = mask.index_axis(Axis(0), i).to_vec();
                self.matrix(&t, &m)
            })
            .collect::<Result<_>>()?;

        let mut out = Array3::zeros((b, l, l));
        for (i, item) in items.iter().enumerate() {
            out.index_axis_mut(Axis(0), i).assign(item);
        }
        Ok(out)
    }
}

impl fmt::Display for FixedOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FixedOrder {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self> {
        FixedOrder::ALL
            .iter()
            .copied()
            .find(|o| o.name() == s)
            .ok_or_else(|| OrderError::invalid(format!("unknown order '{}'", s)))
    }
}
