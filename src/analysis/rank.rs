//! Comparing generation orders.

use serde::{Deserialize, Serialize};

use crate::config::END_ID;
use crate::error::Result;
use crate::permutation::FixedOrder;
use crate::search::DecodedSequence;

/// Ranks starting at 1, ties sharing their average rank.
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut idx: Vec<usize> = (0..values.len()).collect();
    idx.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < idx.len() {
        let mut end = start + 1;
        while end < idx.len() && values[idx[end]] == values[idx[start]] {
            end += 1;
        }
        // positions start..end share ranks start+1..=end
        let rank = (start + end + 1) as f64 / 2.0;
        for &i in &idx[start..end] {
            ranks[i] = rank;
        }
        start = end;
    }
    ranks
}

/// Spearman rank correlation.
///
/// `None` for fewer than two items, mismatched lengths, or a constant input.
pub fn spearman(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.len() < 2 {
        return None;
    }
    let ra = average_ranks(a);
    let rb = average_ranks(b);
    let n = ra.len() as f64;
    let mean_a = ra.iter().sum::<f64>() / n;
    let mean_b = rb.iter().sum::<f64>() / n;

    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in ra.iter().zip(&rb) {
        let (dx, dy) = (x - mean_a, y - mean_b);
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return None;
    }
    Some(cov / (var_a * var_b).sqrt())
}

/// Edit distance with unit insert, delete and substitute costs.
pub fn levenshtein<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for (i, x) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, y) in b.iter().enumerate() {
            let substitute = prev[j] + usize::from(x != y);
            cur[j + 1] = substitute.min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// How a decoded order relates to one fixed order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FixedOrderDistance {
    pub order: FixedOrder,
    /// Rank correlation of the absolute positions generated at each step.
    pub spearman: Option<f64>,
    /// Edit distance between the two position sequences.
    pub edit_distance: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderComparison {
    pub distances: Vec<FixedOrderDistance>,
}

impl OrderComparison {
    pub fn get(&self, order: FixedOrder) -> Option<&FixedOrderDistance> {
        self.distances.iter().find(|d| d.order == order)
    }
}

/// Compare the order a sequence was decoded in with every [`FixedOrder`]
/// applied to the same sentence.
///
/// The sentence ends at the end token wherever it was inserted; tokens placed
/// right of it are left out. A sequence without an end token is compared as
/// if one followed its last token. Fewer than two tokens give no distances.
pub fn compare_with_fixed_orders(decoded: &DecodedSequence) -> Result<OrderComparison> {
    if decoded.len() < 2 {
        return Ok(OrderComparison { distances: Vec::new() });
    }

    let end = decoded
        .tokens
        .iter()
        .position(|&t| t == END_ID)
        .map(|step| decoded.positions[step]);
    let (sentence, actual) = match end {
        Some(e) => (
            decoded.ordered[..=e].to_vec(),
            decoded.positions.iter().copied().filter(|&p| p <= e).collect::<Vec<_>>(),
        ),
        None => {
            let mut sentence = decoded.ordered.clone();
            sentence.push(END_ID);
            (sentence, decoded.positions.clone())
        }
    };
    let mask = vec![true; sentence.len()];
    let actual_f: Vec<f64> = actual.iter().map(|&p| p as f64).collect();

    let distances = FixedOrder::ALL
        .iter()
        .map(|&order| {
            let mut reference = order.generation_order(&sentence, &mask)?;
            if end.is_none() {
                reference.pop();
            }
            let reference_f: Vec<f64> = reference.iter().map(|&p| p as f64).collect();
            Ok(FixedOrderDistance {
                order,
                spearman: spearman(&actual_f, &reference_f),
                edit_distance: levenshtein(&actual, &reference),
            })
        })
        .collect::<Result<_>>()?;
    Ok(OrderComparison { distances })
}
