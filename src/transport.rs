//! Transport model seam.
//!
//! The flow aggregator never fits transport plans; it only needs a model that
//! knows its time points, which pairs of time points are directly coupled,
//! which observations live at each time point, and how to push a distribution
//! through one coupling. [`TransportModel`] is that contract.
//!
//! [`CouplingModel`] implements it over explicit coupling matrices, e.g. plans
//! produced by [`wass`](https://docs.rs/wass)-style Sinkhorn solvers or loaded
//! from disk.

use std::collections::HashMap;

use ndarray::{Array2, Axis};
use tracing::{trace, warn};

use crate::{DayPair, Error, Result, Span};

/// Axis along which a coupling is renormalized before a push-forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NormAxis {
    /// Each source row sums to 1: "where does this cell's mass go".
    Row,
    /// Each target column sums to 1: "where did this cell's mass come from".
    Column,
}

/// External trajectory model.
pub trait TransportModel {
    /// Time points, ascending.
    fn time_points(&self) -> &[f64];

    /// Directly coupled pairs of adjacent time points, in time order.
    fn day_pairs(&self) -> &[DayPair];

    /// Observation ids at time `t`, in the row/column order of the couplings.
    fn observations(&self, t: f64) -> Option<&[String]>;

    /// Push `state` (observations at `pair.t0` × groups) through the coupling
    /// for `pair`, giving observations at `pair.t1` × groups.
    ///
    /// Fails with [`Error::UnknownDayPair`] when `pair` is not a day pair.
    fn push_forward(
        &self,
        state: &Array2<f64>,
        pair: DayPair,
        normalize: bool,
        axis: NormAxis,
    ) -> Result<Array2<f64>>;
}

impl<M: TransportModel + ?Sized> TransportModel for &M {
    fn time_points(&self) -> &[f64] {
        (**self).time_points()
    }

    fn day_pairs(&self) -> &[DayPair] {
        (**self).day_pairs()
    }

    fn observations(&self, t: f64) -> Option<&[String]> {
        (**self).observations(t)
    }

    fn push_forward(
        &self,
        state: &Array2<f64>,
        pair: DayPair,
        normalize: bool,
        axis: NormAxis,
    ) -> Result<Array2<f64>> {
        (**self).push_forward(state, pair, normalize, axis)
    }
}

/// In-memory transport model over explicit coupling matrices.
///
/// A coupling for `(t_a, t_b)` has one row per observation at `t_a` and one
/// column per observation at `t_b`, in the order given to
/// [`from_metadata`](Self::from_metadata).
#[derive(Debug, Clone, Default)]
pub struct CouplingModel {
    time_points: Vec<f64>,
    observations: Vec<Vec<String>>,
    day_pairs: Vec<DayPair>,
    couplings: HashMap<DayPair, Array2<f64>>,
}

impl CouplingModel {
    /// Build the time axis from `(observation, time)` metadata rows.
    ///
    /// Observations keep their input order within a time point. Rows with a
    /// non-finite time are skipped.
    pub fn from_metadata<O, I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (O, f64)>,
        O: Into<String>,
    {
        let mut rows: Vec<(String, f64)> = rows
            .into_iter()
            .map(|(o, t)| (o.into(), t))
            .filter(|(o, t)| {
                if !t.is_finite() {
                    warn!(observation = %o, time = %t, "skipping observation with non-finite time");
                }
                t.is_finite()
            })
            .collect();
        // Stable: ties keep input order.
        rows.sort_by(|a, b| a.1.total_cmp(&b.1));

        let mut time_points: Vec<f64> = Vec::new();
        let mut observations: Vec<Vec<String>> = Vec::new();
        for (obs, t) in rows {
            match time_points.last() {
                Some(&last) if last == t => {}
                _ => {
                    time_points.push(t);
                    observations.push(Vec::new());
                }
            }
            if let Some(bucket) = observations.last_mut() {
                bucket.push(obs);
            }
        }

        Self {
            time_points,
            observations,
            day_pairs: Vec::new(),
            couplings: HashMap::new(),
        }
    }

    /// Register the coupling between adjacent time points `t_a < t_b`.
    ///
    /// Replaces any coupling already stored for the pair.
    pub fn with_coupling(mut self, t_a: f64, t_b: f64, plan: Array2<f64>) -> Result<Self> {
        let (ia, ib) = match (self.position(t_a), self.position(t_b)) {
            (Some(ia), Some(ib)) => (ia, ib),
            _ => {
                return Err(Error::InvalidRange {
                    t0: t_a,
                    t1: t_b,
                    reason: "unknown time point",
                })
            }
        };
        if ib != ia + 1 {
            return Err(Error::InvalidRange {
                t0: t_a,
                t1: t_b,
                reason: "a coupling must join adjacent time points",
            });
        }
        let expected = (self.observations[ia].len(), self.observations[ib].len());
        if plan.dim() != expected {
            return Err(Error::ShapeMismatch(
                expected.0,
                expected.1,
                plan.nrows(),
                plan.ncols(),
            ));
        }
        if plan.iter().any(|&p| !p.is_finite() || p < 0.0) {
            return Err(Error::Configuration(
                "coupling entries must be finite and non-negative".into(),
            ));
        }

        let pair = Span::new(self.time_points[ia], self.time_points[ib]);
        if self.couplings.insert(pair, plan).is_none() {
            self.day_pairs.push(pair);
            self.day_pairs.sort();
        }
        Ok(self)
    }

    /// The stored coupling for `pair`, unnormalized.
    pub fn coupling(&self, pair: DayPair) -> Option<&Array2<f64>> {
        self.couplings.get(&pair)
    }

    fn position(&self, t: f64) -> Option<usize> {
        self.time_points.iter().position(|&x| x == t)
    }
}

impl TransportModel for CouplingModel {
    fn time_points(&self) -> &[f64] {
        &self.time_points
    }

    fn day_pairs(&self) -> &[DayPair] {
        &self.day_pairs
    }

    fn observations(&self, t: f64) -> Option<&[String]> {
        self.position(t).map(|i| self.observations[i].as_slice())
    }

    fn push_forward(
        &self,
        state: &Array2<f64>,
        pair: DayPair,
        normalize: bool,
        axis: NormAxis,
    ) -> Result<Array2<f64>> {
        let plan = self
            .couplings
            .get(&pair)
            .ok_or(Error::UnknownDayPair(pair))?;
        if state.nrows() != plan.nrows() {
            return Err(Error::ShapeMismatch(
                plan.nrows(),
                state.ncols(),
                state.nrows(),
                state.ncols(),
            ));
        }
        trace!(%pair, ?axis, normalize, "push forward");

        if normalize {
            Ok(normalized(plan, axis).t().dot(state))
        } else {
            Ok(plan.t().dot(state))
        }
    }
}

/// Rescale `plan` so each row (or column) sums to 1.
///
/// Rows or columns with no mass stay zero.
fn normalized(plan: &Array2<f64>, axis: NormAxis) -> Array2<f64> {
    let mut out = plan.clone();
    match axis {
        NormAxis::Row => {
            for mut row in out.axis_iter_mut(Axis(0)) {
                let s = row.sum();
                if s > 0.0 {
                    row.mapv_inplace(|x| x / s);
                }
            }
        }
        NormAxis::Column => {
            for mut col in out.axis_iter_mut(Axis(1)) {
                let s = col.sum();
                if s > 0.0 {
                    col.mapv_inplace(|x| x / s);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_step() -> CouplingModel {
        CouplingModel::from_metadata([
            ("a", 0.0),
            ("b", 0.0),
            ("c", 1.0),
            ("d", 1.0),
            ("e", 1.0),
            ("f", 2.0),
        ])
        .with_coupling(0.0, 1.0, array![[0.2, 0.2, 0.0], [0.0, 0.1, 0.5]])
        .unwrap()
        .with_coupling(1.0, 2.0, array![[0.2], [0.3], [0.5]])
        .unwrap()
    }

    #[test]
    fn metadata_groups_by_time() {
        let m = two_step();
        assert_eq!(m.time_points(), &[0.0, 1.0, 2.0]);
        assert_eq!(m.observations(1.0).unwrap(), &["c", "d", "e"]);
        assert!(m.observations(3.0).is_none());
        assert_eq!(
            m.day_pairs(),
            &[Span::new(0.0, 1.0), Span::new(1.0, 2.0)]
        );
    }

    #[test]
    fn metadata_skips_non_finite_times() {
        let m = CouplingModel::from_metadata([("a", 0.0), ("b", f64::NAN)]);
        assert_eq!(m.time_points(), &[0.0]);
    }

    #[test]
    fn coupling_must_be_adjacent() {
        let m = CouplingModel::from_metadata([("a", 0.0), ("b", 1.0), ("c", 2.0)]);
        let err = m.with_coupling(0.0, 2.0, array![[1.0]]);
        assert!(matches!(err, Err(Error::InvalidRange { .. })));
    }

    #[test]
    fn coupling_shape_is_checked() {
        let m = CouplingModel::from_metadata([("a", 0.0), ("b", 1.0)]);
        let err = m.with_coupling(0.0, 1.0, array![[1.0, 0.0]]);
        assert!(matches!(err, Err(Error::ShapeMismatch(1, 1, 1, 2))));
    }

    #[test]
    fn row_normalized_push_preserves_mass() {
        let m = two_step();
        let state = array![[0.5, 0.0], [0.0, 0.5]];
        let out = m
            .push_forward(&state, Span::new(0.0, 1.0), true, NormAxis::Row)
            .unwrap();
        assert_eq!(out.dim(), (3, 2));
        assert!((out.sum() - 1.0).abs() < 1e-12);
        // Row a = [0.5, 0.5, 0]; all of a's mass is group 0.
        assert!((out[[0, 0]] - 0.25).abs() < 1e-12);
        assert!((out[[2, 1]] - 0.5 * 5.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn column_normalized_push_gives_ancestry() {
        let m = two_step();
        let state = array![[1.0, 0.0], [0.0, 1.0]];
        let out = m
            .push_forward(&state, Span::new(0.0, 1.0), true, NormAxis::Column)
            .unwrap();
        // Each target's ancestry sums to 1 when every source has unit mass.
        for row in out.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
        assert!((out[[1, 0]] - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn unnormalized_push_uses_raw_plan() {
        let m = two_step();
        let state = array![[1.0], [1.0]];
        let out = m
            .push_forward(&state, Span::new(0.0, 1.0), false, NormAxis::Row)
            .unwrap();
        let expected = [0.2, 0.3, 0.5];
        for (got, want) in out.iter().zip(expected) {
            assert!((got - want).abs() < 1e-12, "got={} want={}", got, want);
        }
    }

    #[test]
    fn unknown_pair_and_bad_state_fail() {
        let m = two_step();
        let state = array![[1.0], [1.0]];
        assert!(matches!(
            m.push_forward(&state, Span::new(0.0, 2.0), true, NormAxis::Row),
            Err(Error::UnknownDayPair(_))
        ));
        assert!(matches!(
            m.push_forward(&state, Span::new(1.0, 2.0), true, NormAxis::Row),
            Err(Error::ShapeMismatch(..))
        ));
    }
}
