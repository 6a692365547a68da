//! Flow tables.
//!
//! A flow table is the long-format view of two group × group matrices over the
//! same span: `outflow` (conditioned on the source group) and `inflow`
//! (conditioned on the target group). Every `(source, target)` pair of the
//! cross product has a row, including pairs with zero flow; dropping those is
//! a presentation concern (see [`FlowTable::nonzero`]).

use ndarray::Array2;

use crate::{Error, Result};

/// One `(source, target)` row of a [`FlowTable`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlowRow {
    pub source: String,
    pub target: String,
    pub outflow: f64,
    pub inflow: f64,
}

/// Group-to-group flows between two time points.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlowTable {
    sources: Vec<String>,
    targets: Vec<String>,
    rows: Vec<FlowRow>,
}

impl FlowTable {
    /// Melt two `sources × targets` matrices into one table, joined on
    /// `(source, target)`.
    ///
    /// Rows are source-major: all targets of the first source, then the next.
    pub fn from_matrices(
        sources: &[String],
        targets: &[String],
        outflow: &Array2<f64>,
        inflow: &Array2<f64>,
    ) -> Result<Self> {
        let dim = (sources.len(), targets.len());
        for m in [outflow, inflow] {
            if m.dim() != dim {
                return Err(Error::ShapeMismatch(dim.0, dim.1, m.nrows(), m.ncols()));
            }
        }

        let mut rows = Vec::with_capacity(dim.0 * dim.1);
        for (i, source) in sources.iter().enumerate() {
            for (j, target) in targets.iter().enumerate() {
                rows.push(FlowRow {
                    source: source.clone(),
                    target: target.clone(),
                    outflow: outflow[[i, j]],
                    inflow: inflow[[i, j]],
                });
            }
        }

        Ok(Self {
            sources: sources.to_vec(),
            targets: targets.to_vec(),
            rows,
        })
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn rows(&self) -> &[FlowRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The row for `(source, target)`, if both groups are in the table.
    pub fn get(&self, source: &str, target: &str) -> Option<&FlowRow> {
        let i = self.sources.iter().position(|s| s == source)?;
        let j = self.targets.iter().position(|t| t == target)?;
        self.rows.get(i * self.targets.len() + j)
    }

    /// Rows with non-zero outflow and inflow, for rendering.
    ///
    /// The table itself always keeps the full cross product; metrics read it
    /// unfiltered.
    pub fn nonzero(&self) -> impl Iterator<Item = &FlowRow> + '_ {
        self.rows
            .iter()
            .filter(|r| r.outflow != 0.0 && r.inflow != 0.0)
    }

    /// Outflow as a `sources × targets` matrix.
    pub fn outflow_matrix(&self) -> Array2<f64> {
        self.matrix(|r| r.outflow)
    }

    /// Inflow as a `sources × targets` matrix.
    pub fn inflow_matrix(&self) -> Array2<f64> {
        self.matrix(|r| r.inflow)
    }

    fn matrix(&self, value: impl Fn(&FlowRow) -> f64) -> Array2<f64> {
        let nt = self.targets.len();
        Array2::from_shape_fn((self.sources.len(), nt), |(i, j)| {
            value(&self.rows[i * nt + j])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn labels(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn melts_full_cross_product() {
        let out = array![[0.5, 0.0], [0.1, 0.4]];
        let inf = array![[0.6, 0.0], [0.0, 0.4]];
        let t = FlowTable::from_matrices(&labels(&["A", "B"]), &labels(&["A", "B"]), &out, &inf)
            .unwrap();
        assert_eq!(t.len(), 4);
        assert_eq!(t.rows()[1].source, "A");
        assert_eq!(t.rows()[1].target, "B");
        let ba = t.get("B", "A").unwrap();
        assert_eq!((ba.outflow, ba.inflow), (0.1, 0.0));
        assert!(t.get("C", "A").is_none());
        assert_eq!(t.outflow_matrix(), out);
        assert_eq!(t.inflow_matrix(), inf);
    }

    #[test]
    fn rectangular_tables_index_correctly() {
        let out = array![[0.1, 0.2, 0.3], [0.0, 0.0, 0.4]];
        let t = FlowTable::from_matrices(
            &labels(&["A", "B"]),
            &labels(&["X", "Y", "Z"]),
            &out,
            &out,
        )
        .unwrap();
        assert_eq!(t.get("B", "Z").unwrap().outflow, 0.4);
        assert_eq!(t.get("A", "Y").unwrap().outflow, 0.2);
        assert_eq!(t.outflow_matrix(), out);
    }

    #[test]
    fn nonzero_drops_rows_with_either_side_zero() {
        let out = array![[0.5, 0.0], [0.1, 0.4]];
        let inf = array![[0.6, 0.0], [0.0, 0.4]];
        let t = FlowTable::from_matrices(&labels(&["A", "B"]), &labels(&["A", "B"]), &out, &inf)
            .unwrap();
        let kept: Vec<_> = t
            .nonzero()
            .map(|r| (r.source.as_str(), r.target.as_str()))
            .collect();
        assert_eq!(kept, vec![("A", "A"), ("B", "B")]);
        // The table itself is untouched.
        assert_eq!(t.len(), 4);
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let out = array![[1.0, 0.0]];
        let inf = array![[1.0], [0.0]];
        let err = FlowTable::from_matrices(&labels(&["A"]), &labels(&["A", "B"]), &out, &inf);
        assert!(matches!(err, Err(Error::ShapeMismatch(1, 2, 2, 1))));
    }
}
