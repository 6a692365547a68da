//! Fate entropy and self-flow consistency over flow tables.
//!
//! Both metrics read one column of a [`FlowTable`] as a joint distribution
//! over `(source, target)`:
//!
//! - [`Direction::Forward`] uses `outflow` and conditions on the source group;
//! - [`Direction::Backward`] uses `inflow` and conditions on the target group.
//!
//! With `X` the conditioning group and `Y` the other side:
//!
//! ```text
//! prior    = H(Y)                      entropy of the marginal over Y
//! expected = Σ_x p(x) H(Y | X = x)     mass-weighted conditional entropy
//! ```
//!
//! so `0 <= expected <= prior <= ln |supp Y|`. Low expected entropy means
//! groups have well-determined fates (forward) or origins (backward).
//!
//! Entropy uses the natural log and `0 ln 0 = 0`.

use std::fmt;

use ndarray::{Array2, Axis};

use crate::{FlowTable, Span};

/// Which flow column a metric reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Direction {
    /// `outflow`, conditioned on source.
    Forward,
    /// `inflow`, conditioned on target.
    Backward,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Forward, Direction::Backward];

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Self-flow consistency for one span and direction.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConsistencyRow {
    pub t0: f64,
    pub t1: f64,
    pub direction: Direction,
    pub consistency: f64,
}

/// Expected and prior fate entropy for one span and direction.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntropyRow {
    pub t0: f64,
    pub t1: f64,
    pub direction: Direction,
    pub expected: f64,
    pub prior: f64,
}

/// Shannon entropy `-Σ p ln p` of `masses` after rescaling them to sum to 1.
///
/// Zero entries contribute nothing. An input with no mass has entropy `0`.
pub fn shannon_entropy(masses: &[f64]) -> f64 {
    let total: f64 = masses.iter().sum();
    if !(total > 0.0) {
        return 0.0;
    }
    -masses
        .iter()
        .filter(|&&m| m > 0.0)
        .map(|&m| {
            let p = m / total;
            p * p.ln()
        })
        .sum::<f64>()
}

/// Fraction of mass that stays in its own group: the sum of the direction's
/// column over rows with `source == target`.
pub fn consistency(table: &FlowTable, direction: Direction) -> f64 {
    table
        .rows()
        .iter()
        .filter(|r| r.source == r.target)
        .map(|r| match direction {
            Direction::Forward => r.outflow,
            Direction::Backward => r.inflow,
        })
        .sum()
}

/// Mass-weighted mean entropy of the conditional distributions given the
/// conditioning group. Groups with no mass contribute zero.
pub fn expected_entropy(table: &FlowTable, direction: Direction) -> f64 {
    let joint = conditioned_joint(table, direction);
    let total = joint.sum();
    if !(total > 0.0) {
        return 0.0;
    }
    joint
        .rows()
        .into_iter()
        .map(|row| {
            let mass = row.sum();
            if mass > 0.0 {
                (mass / total) * shannon_entropy(&row.to_vec())
            } else {
                0.0
            }
        })
        .sum()
}

/// Entropy of the marginal over the non-conditioning side: target groups for
/// forward, source groups for backward.
pub fn prior_entropy(table: &FlowTable, direction: Direction) -> f64 {
    let marginal = conditioned_joint(table, direction).sum_axis(Axis(0));
    shannon_entropy(&marginal.to_vec())
}

/// Both directions' consistency for one table.
pub fn consistency_rows(span: Span, table: &FlowTable) -> [ConsistencyRow; 2] {
    Direction::ALL.map(|direction| ConsistencyRow {
        t0: span.t0,
        t1: span.t1,
        direction,
        consistency: consistency(table, direction),
    })
}

/// Both directions' entropies for one table.
pub fn entropy_rows(span: Span, table: &FlowTable) -> [EntropyRow; 2] {
    Direction::ALL.map(|direction| EntropyRow {
        t0: span.t0,
        t1: span.t1,
        direction,
        expected: expected_entropy(table, direction),
        prior: prior_entropy(table, direction),
    })
}

// Rows index the conditioning group.
fn conditioned_joint(table: &FlowTable, direction: Direction) -> Array2<f64> {
    match direction {
        Direction::Forward => table.outflow_matrix(),
        Direction::Backward => table.inflow_matrix().reversed_axes(),
    }
}
