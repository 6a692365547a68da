//! Group assignment table.
//!
//! Maps each observation (cell) to a weight per user-defined group. Two input
//! shapes are accepted and resolved once into a canonical dense matrix:
//!
//! - [`GroupInput::OneHotLabels`]: one categorical label per observation,
//!   expanded into a 0/1 indicator matrix;
//! - [`GroupInput::MembershipMatrix`]: a pre-built soft membership matrix.
//!
//! Labels are coerced to strings on the way in so they can serve as stable
//! keys in flow tables.

use std::collections::{BTreeSet, HashMap, HashSet};

use ndarray::{Array2, Axis};

use crate::{Error, Result};

/// Raw group membership, before validation.
#[derive(Debug, Clone)]
pub enum GroupInput {
    /// One label per observation; `observations[i]` belongs to `labels[i]`.
    OneHotLabels {
        observations: Vec<String>,
        labels: Vec<String>,
    },
    /// `weights[[i, j]]` is the membership of `observations[i]` in `labels[j]`.
    MembershipMatrix {
        observations: Vec<String>,
        labels: Vec<String>,
        weights: Array2<f64>,
    },
}

impl GroupInput {
    /// One-hot input from `(observation, label)` pairs.
    pub fn one_hot<O, L, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (O, L)>,
        O: Into<String>,
        L: ToString,
    {
        let (observations, labels) = pairs
            .into_iter()
            .map(|(o, l)| (o.into(), l.to_string()))
            .unzip();
        Self::OneHotLabels {
            observations,
            labels,
        }
    }

    /// Soft membership input. Rows of `weights` follow `observations`,
    /// columns follow `labels`.
    pub fn membership<O, L>(
        observations: impl IntoIterator<Item = O>,
        labels: impl IntoIterator<Item = L>,
        weights: Array2<f64>,
    ) -> Self
    where
        O: Into<String>,
        L: ToString,
    {
        Self::MembershipMatrix {
            observations: observations.into_iter().map(Into::into).collect(),
            labels: labels.into_iter().map(|l| l.to_string()).collect(),
            weights,
        }
    }
}

/// Validated observation × group membership matrix.
#[derive(Debug, Clone)]
pub struct GroupAssignment {
    observations: Vec<String>,
    index: HashMap<String, usize>,
    labels: Vec<String>,
    weights: Array2<f64>,
}

impl GroupAssignment {
    /// Resolve a [`GroupInput`] into a membership matrix.
    ///
    /// One-hot columns are the distinct labels in sorted order.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] on duplicate observations, labels that collide
    /// after string coercion, shape mismatches, or negative / non-finite
    /// weights.
    pub fn new(input: GroupInput) -> Result<Self> {
        let (observations, labels, weights) = match input {
            GroupInput::OneHotLabels {
                observations,
                labels,
            } => {
                if observations.len() != labels.len() {
                    return Err(Error::Configuration(format!(
                        "{} observations but {} labels",
                        observations.len(),
                        labels.len()
                    )));
                }
                let columns: Vec<String> = labels
                    .iter()
                    .cloned()
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                let position: HashMap<&str, usize> = columns
                    .iter()
                    .enumerate()
                    .map(|(j, l)| (l.as_str(), j))
                    .collect();
                let mut weights = Array2::zeros((observations.len(), columns.len()));
                for (i, label) in labels.iter().enumerate() {
                    weights[[i, position[label.as_str()]]] = 1.0;
                }
                (observations, columns, weights)
            }
            GroupInput::MembershipMatrix {
                observations,
                labels,
                weights,
            } => {
                if weights.dim() != (observations.len(), labels.len()) {
                    return Err(Error::Configuration(format!(
                        "membership matrix is {}x{}, expected {}x{}",
                        weights.nrows(),
                        weights.ncols(),
                        observations.len(),
                        labels.len()
                    )));
                }
                if let Some(dup) = first_duplicate(&labels) {
                    return Err(Error::Configuration(format!(
                        "group label {dup:?} appears more than once"
                    )));
                }
                if weights.iter().any(|&w| !w.is_finite() || w < 0.0) {
                    return Err(Error::Configuration(
                        "membership weights must be finite and non-negative".into(),
                    ));
                }
                (observations, labels, weights)
            }
        };

        if let Some(dup) = first_duplicate(&observations) {
            return Err(Error::Configuration(format!(
                "observation {dup:?} appears more than once"
            )));
        }
        let index = observations
            .iter()
            .enumerate()
            .map(|(i, o)| (o.clone(), i))
            .collect();

        Ok(Self {
            observations,
            index,
            labels,
            weights,
        })
    }

    /// Reorder the group columns.
    ///
    /// `order` must be a permutation of [`labels`](Self::labels).
    pub fn with_group_order<L: ToString>(
        mut self,
        order: impl IntoIterator<Item = L>,
    ) -> Result<Self> {
        let order: Vec<String> = order.into_iter().map(|l| l.to_string()).collect();
        if order.len() != self.labels.len() {
            return Err(Error::Configuration(format!(
                "group order names {} groups, table has {}",
                order.len(),
                self.labels.len()
            )));
        }
        if let Some(dup) = first_duplicate(&order) {
            return Err(Error::Configuration(format!(
                "group {dup:?} appears more than once in group order"
            )));
        }
        let columns = order
            .iter()
            .map(|l| {
                self.labels
                    .iter()
                    .position(|x| x == l)
                    .ok_or_else(|| Error::Configuration(format!("unknown group {l:?} in group order")))
            })
            .collect::<Result<Vec<_>>>()?;
        self.weights = self.weights.select(Axis(1), &columns);
        self.labels = order;
        Ok(self)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn observations(&self) -> &[String] {
        &self.observations
    }

    pub fn weights(&self) -> &Array2<f64> {
        &self.weights
    }

    pub fn n_groups(&self) -> usize {
        self.labels.len()
    }

    /// Membership rows for `observations`, in that order.
    ///
    /// Observations without an entry in the table get a zero row.
    pub fn restrict(&self, observations: &[String]) -> Array2<f64> {
        let mut out = Array2::zeros((observations.len(), self.n_groups()));
        for (r, obs) in observations.iter().enumerate() {
            if let Some(&i) = self.index.get(obs) {
                out.row_mut(r).assign(&self.weights.row(i));
            }
        }
        out
    }
}

fn first_duplicate(items: &[String]) -> Option<&str> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .iter()
        .find(|s| !seen.insert(s.as_str()))
        .map(String::as_str)
}
