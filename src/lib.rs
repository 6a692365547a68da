//! # fateflow
//!
//! Group-level flows from chained optimal transport plans.
//!
//! ## The Problem
//!
//! A trajectory model gives you a transport plan (a coupling) between the
//! cells sampled at each pair of consecutive time points. You care about
//! *groups* of cells (clusters, cell types, lineages): of the mass that starts
//! in group X, where does it end up? Of the mass that ends in group Y, where
//! did it come from? Answering that over several time steps means pushing
//! group-weighted distributions through every coupling on the way, with the
//! right renormalization at each hop.
//!
//! ## Key Types
//!
//! | Item | Use Case |
//! |------|----------|
//! | [`GroupAssignment`] | one-hot labels or soft membership, resolved once |
//! | [`TransportModel`] | the external model: time points, day pairs, push-forward |
//! | [`CouplingModel`] | in-memory [`TransportModel`] over explicit coupling matrices |
//! | [`FlowAggregator`] | cached `(t0, t1)` flow tables and metric tables |
//! | [`metrics`] | Shannon entropy, fate entropy, self-flow consistency |
//!
//! ## Quick Start
//!
//! ```rust
//! use fateflow::{CouplingModel, FlowAggregator, GroupAssignment, GroupInput};
//! use ndarray::array;
//!
//! let model = CouplingModel::from_metadata([("a0", 0.0), ("b0", 0.0), ("a1", 1.0), ("b1", 1.0)])
//!     .with_coupling(0.0, 1.0, array![[0.5, 0.0], [0.0, 0.5]])
//!     .unwrap();
//! let groups = GroupAssignment::new(GroupInput::one_hot([
//!     ("a0", "A"),
//!     ("b0", "B"),
//!     ("a1", "A"),
//!     ("b1", "B"),
//! ]))
//! .unwrap();
//!
//! let agg = FlowAggregator::new(model, groups);
//! let table = agg.compute_flow(0.0, 1.0).unwrap();
//! assert!((table.get("A", "A").unwrap().outflow - 0.5).abs() < 1e-12);
//!
//! let consistency = agg.flow_consistency();
//! assert!((consistency[0].consistency - 1.0).abs() < 1e-12);
//! ```
//!
//! ## What Can Go Wrong
//!
//! 1. **Empty time point**: a time point whose observations carry no group mass
//!    cannot be renormalized; [`Error::DegenerateInput`].
//! 2. **Gaps in the timeline**: a span whose day pairs do not chain from `t0` to
//!    `t1` is rejected with [`Error::InvalidRange`] rather than shortcut.
//! 3. **Metrics before flows**: metric tables only read the cache; asking for a
//!    span that was never computed is [`Error::MissingSpan`].
//! 4. **Zero rows**: flow tables keep the full group × group cross product.
//!    Filter with [`FlowTable::nonzero`] at presentation time, not before
//!    computing metrics.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use thiserror::Error;

pub mod aggregator;
pub mod cache;
pub mod flow;
pub mod groups;
pub mod metrics;
pub mod transport;

pub use aggregator::{FlowAggregator, FlowConfig, FlowSpans};
pub use cache::FlowCache;
pub use flow::{FlowRow, FlowTable};
pub use groups::{GroupAssignment, GroupInput};
pub use metrics::{ConsistencyRow, Direction, EntropyRow};
pub use transport::{CouplingModel, NormAxis, TransportModel};

/// Flow aggregation error variants.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed group assignment input (colliding labels, duplicate keys, bad weights).
    #[error("invalid group configuration: {0}")]
    Configuration(String),

    /// Requested span is not a valid range over the model's time points.
    #[error("invalid time range ({t0}, {t1}): {reason}")]
    InvalidRange {
        t0: f64,
        t1: f64,
        reason: &'static str,
    },

    /// A renormalization step found zero (or non-finite) total mass.
    #[error("degenerate input: {0}")]
    DegenerateInput(&'static str),

    /// A metric asked for a span that was never computed.
    #[error("no flow table cached for span {0}")]
    MissingSpan(Span),

    /// The transport model has no coupling for this pair of time points.
    #[error("no coupling for day pair {0}")]
    UnknownDayPair(Span),

    /// Matrix shape mismatch.
    #[error("shape mismatch: expected ({0}, {1}), got ({2}, {3})")]
    ShapeMismatch(usize, usize, usize, usize),
}

/// Result type for flow aggregation.
pub type Result<T> = std::result::Result<T, Error>;

/// An ordered pair of time points.
///
/// Used both as the cache key for a flow table and as a day pair of the
/// transport model. Equality, ordering and hashing go through
/// [`f64::total_cmp`] with `-0.0` folded into `0.0`, so a `Span` is a proper
/// map key.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Span {
    pub t0: f64,
    pub t1: f64,
}

/// A pair of adjacent time points with a direct coupling.
pub type DayPair = Span;

#[inline]
fn canonical(t: f64) -> f64 {
    if t == 0.0 {
        0.0
    } else {
        t
    }
}

impl Span {
    pub fn new(t0: f64, t1: f64) -> Self {
        Self {
            t0: canonical(t0),
            t1: canonical(t1),
        }
    }

    /// Whether both endpoints lie in `[t0, t1]`.
    pub fn within(&self, t0: f64, t1: f64) -> bool {
        self.t0 >= t0 && self.t1 <= t1
    }
}

impl From<(f64, f64)> for Span {
    fn from((t0, t1): (f64, f64)) -> Self {
        Self::new(t0, t1)
    }
}

impl PartialEq for Span {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Span {}

impl PartialOrd for Span {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Span {
    fn cmp(&self, other: &Self) -> Ordering {
        canonical(self.t0)
            .total_cmp(&canonical(other.t0))
            .then_with(|| canonical(self.t1).total_cmp(&canonical(other.t1)))
    }
}

impl Hash for Span {
    fn hash<H: Hasher>(&self, state: &mut H) {
        canonical(self.t0).to_bits().hash(state);
        canonical(self.t1).to_bits().hash(state);
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.t0, self.t1)
    }
}

/// Divide `m` by its total mass in place.
///
/// Fails with [`Error::DegenerateInput`] when the total is zero, negative or
/// not finite.
pub(crate) fn normalize_total(
    m: &mut ndarray::Array2<f64>,
    what: &'static str,
) -> Result<()> {
    let total = m.sum();
    if !(total.is_finite() && total > 0.0) {
        return Err(Error::DegenerateInput(what));
    }
    m.mapv_inplace(|x| x / total);
    Ok(())
}
