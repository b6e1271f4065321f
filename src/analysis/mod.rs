//! Post-hoc analysis of decoded orders.
//!
//! Consumes only plain [`DecodedSequence`](crate::search::DecodedSequence)
//! records; nothing here feeds back into search.

pub mod rank;
pub mod stats;

pub use rank::{compare_with_fixed_orders, levenshtein, spearman, FixedOrderDistance, OrderComparison};
pub use stats::{WordOrderStatistics, WordOrderSummary};
