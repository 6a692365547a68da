//! Flow aggregation across time spans.
//!
//! [`FlowAggregator::compute_flow`] turns a [`GroupAssignment`] and a
//! [`TransportModel`] into a [`FlowTable`] for any span `t0 <= t1`:
//!
//! 1. restrict the group table to the observations at `t0` and `t1` and scale
//!    each to a joint distribution over (observation, group);
//! 2. push the `t0` distribution through every day pair between `t0` and `t1`
//!    twice, once with row-normalized couplings (outflow: where does the mass
//!    of each source group go) and once with column-normalized couplings
//!    (inflow: where did the mass arriving in each target group come from);
//! 3. project both onto the `t1` groups (`stateᵀ · S1`), rescale to total
//!    mass 1, and join the two matrices into one long table.
//!
//! Tables are cached per span. Metric tables read the cache only and never
//! touch the transport model.

use std::sync::Arc;

use ndarray::Array2;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::metrics::{self, ConsistencyRow, EntropyRow};
use crate::{
    normalize_total, DayPair, Error, FlowCache, FlowTable, GroupAssignment, NormAxis, Result,
    Span, TransportModel,
};

/// Aggregator configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlowConfig {
    /// Keep computed flow tables for reuse and for metric tables.
    pub cache_flow_tables: bool,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            cache_flow_tables: true,
        }
    }
}

/// Computes, caches and summarizes group flow tables.
///
/// The cache sits behind a mutex that is held from lookup through insert, so
/// a span is computed at most once even when the aggregator is shared across
/// threads.
pub struct FlowAggregator<M> {
    model: M,
    groups: GroupAssignment,
    config: FlowConfig,
    cache: Mutex<FlowCache>,
}

impl<M: TransportModel> FlowAggregator<M> {
    pub fn new(model: M, groups: GroupAssignment) -> Self {
        Self::with_config(model, groups, FlowConfig::default())
    }

    pub fn with_config(model: M, groups: GroupAssignment, config: FlowConfig) -> Self {
        Self {
            model,
            groups,
            config,
            cache: Mutex::new(FlowCache::new()),
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn groups(&self) -> &GroupAssignment {
        &self.groups
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Flow table between time points `t0 <= t1`.
    ///
    /// Returns the cached table when there is one. Otherwise computes it
    /// and, if caching is enabled, stores it. A failed computation stores
    /// nothing.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRange`] if either time point is unknown, `t0 > t1`,
    ///   or the model's day pairs do not chain from `t0` to `t1`.
    /// - [`Error::DegenerateInput`] if an endpoint or a projected flow matrix
    ///   carries no mass.
    /// - Any error from [`TransportModel::push_forward`].
    pub fn compute_flow(&self, t0: f64, t1: f64) -> Result<Arc<FlowTable>> {
        let span = self.validate_span(t0, t1)?;
        if !self.config.cache_flow_tables {
            return self.flow_between(span).map(Arc::new);
        }

        let mut cache = self.cache.lock();
        if let Some(table) = cache.get(&span) {
            debug!(%span, "flow table cache hit");
            return Ok(table);
        }
        let table = Arc::new(self.flow_between(span)?);
        cache.insert(span, Arc::clone(&table));
        debug!(%span, cached = cache.len(), "stored flow table");
        Ok(table)
    }

    /// Flow tables for every consecutive pair of `time_points` (all of the
    /// model's time points by default), computed lazily.
    pub fn compute_all(&self, time_points: Option<&[f64]>) -> FlowSpans<'_, M> {
        let mut points = match time_points {
            Some(tps) => tps.to_vec(),
            None => self.model.time_points().to_vec(),
        };
        points.sort_by(f64::total_cmp);
        points.dedup();
        FlowSpans {
            aggregator: self,
            points,
            next: 0,
        }
    }

    /// The cached table for `(t0, t1)`, without computing anything.
    pub fn cached(&self, t0: f64, t1: f64) -> Option<Arc<FlowTable>> {
        self.cache.lock().get(&Span::new(t0, t1))
    }

    pub fn cached_spans(&self) -> Vec<Span> {
        self.cache.lock().spans().collect()
    }

    /// Drop every cached table.
    pub fn reset_cache(&self) {
        self.cache.lock().clear();
    }

    /// Forward and backward self-flow consistency for every cached span.
    pub fn flow_consistency(&self) -> Vec<ConsistencyRow> {
        self.cache
            .lock()
            .iter()
            .flat_map(|(span, table)| metrics::consistency_rows(span, table))
            .collect()
    }

    /// Forward and backward expected/prior entropy for every cached span.
    pub fn flow_entropy(&self) -> Vec<EntropyRow> {
        self.cache
            .lock()
            .iter()
            .flat_map(|(span, table)| metrics::entropy_rows(span, table))
            .collect()
    }

    /// Consistency for one cached span.
    ///
    /// Fails with [`Error::MissingSpan`] if the span was never computed.
    pub fn consistency_for(&self, t0: f64, t1: f64) -> Result<[ConsistencyRow; 2]> {
        let span = Span::new(t0, t1);
        let table = self.cached(t0, t1).ok_or(Error::MissingSpan(span))?;
        Ok(metrics::consistency_rows(span, &table))
    }

    /// Entropy for one cached span.
    ///
    /// Fails with [`Error::MissingSpan`] if the span was never computed.
    pub fn entropy_for(&self, t0: f64, t1: f64) -> Result<[EntropyRow; 2]> {
        let span = Span::new(t0, t1);
        let table = self.cached(t0, t1).ok_or(Error::MissingSpan(span))?;
        Ok(metrics::entropy_rows(span, &table))
    }

    fn validate_span(&self, t0: f64, t1: f64) -> Result<Span> {
        let invalid = |reason| Error::InvalidRange { t0, t1, reason };
        if !(t0.is_finite() && t1.is_finite()) {
            return Err(invalid("time points must be finite"));
        }
        if t0 > t1 {
            return Err(invalid("t0 is after t1"));
        }
        let known = self.model.time_points();
        if !known.contains(&t0) || !known.contains(&t1) {
            return Err(invalid("unknown time point"));
        }
        Ok(Span::new(t0, t1))
    }

    /// Day pairs inside `span`, which must chain from `span.t0` to `span.t1`.
    fn hop_path(&self, span: Span) -> Result<Vec<DayPair>> {
        let hops: Vec<DayPair> = self
            .model
            .day_pairs()
            .iter()
            .copied()
            .filter(|p| p.within(span.t0, span.t1))
            .collect();

        let gap = || Error::InvalidRange {
            t0: span.t0,
            t1: span.t1,
            reason: "day pairs do not chain across the span",
        };
        let mut at = span.t0;
        for hop in &hops {
            if hop.t0 != at {
                return Err(gap());
            }
            at = hop.t1;
        }
        if at != span.t1 {
            return Err(gap());
        }
        Ok(hops)
    }

    fn endpoint(&self, t: f64, span: Span, what: &'static str) -> Result<Array2<f64>> {
        let observations = self.model.observations(t).ok_or(Error::InvalidRange {
            t0: span.t0,
            t1: span.t1,
            reason: "time point has no observation index",
        })?;
        let mut s = self.groups.restrict(observations);
        normalize_total(&mut s, what)?;
        Ok(s)
    }

    fn flow_between(&self, span: Span) -> Result<FlowTable> {
        let s0 = self.endpoint(span.t0, span, "no group mass at t0")?;
        let s1 = self.endpoint(span.t1, span, "no group mass at t1")?;
        let path = self.hop_path(span)?;
        debug!(%span, hops = path.len(), "computing flow table");

        let mut outflow = s0.clone();
        let mut inflow = s0;
        for &hop in &path {
            trace!(%hop, "advancing outflow and inflow");
            outflow = self.model.push_forward(&outflow, hop, true, NormAxis::Row)?;
            inflow = self.model.push_forward(&inflow, hop, true, NormAxis::Column)?;
        }

        let mut out = project(&outflow, &s1)?;
        normalize_total(&mut out, "outflow has no mass")?;
        let mut inf = project(&inflow, &s1)?;
        normalize_total(&mut inf, "inflow has no mass")?;

        let labels = self.groups.labels();
        FlowTable::from_matrices(labels, labels, &out, &inf)
    }
}

/// `stateᵀ · s1`: source groups × target groups.
fn project(state: &Array2<f64>, s1: &Array2<f64>) -> Result<Array2<f64>> {
    if state.dim() != s1.dim() {
        return Err(Error::ShapeMismatch(
            s1.nrows(),
            s1.ncols(),
            state.nrows(),
            state.ncols(),
        ));
    }
    Ok(state.t().dot(s1))
}

/// Lazy sequence of flow tables over consecutive time points.
///
/// Created by [`FlowAggregator::compute_all`]. Each step goes through
/// [`FlowAggregator::compute_flow`], so spans already in the cache are not
/// recomputed.
pub struct FlowSpans<'a, M> {
    aggregator: &'a FlowAggregator<M>,
    points: Vec<f64>,
    next: usize,
}

impl<M: TransportModel> Iterator for FlowSpans<'_, M> {
    type Item = Result<(DayPair, Arc<FlowTable>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let (&t0, &t1) = (self.points.get(self.next)?, self.points.get(self.next + 1)?);
        self.next += 1;
        Some(
            self.aggregator
                .compute_flow(t0, t1)
                .map(|table| (Span::new(t0, t1), table)),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.points.len().saturating_sub(self.next + 1);
        (n, Some(n))
    }
}

impl<M: TransportModel> ExactSizeIterator for FlowSpans<'_, M> {}
