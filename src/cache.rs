//! Process-local store of computed flow tables, keyed by span.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{FlowTable, Span};

/// Flow tables keyed by `(t0, t1)`.
///
/// Iteration is in span order (by `t0`, then `t1`), which keeps metric tables
/// deterministic.
#[derive(Debug, Clone, Default)]
pub struct FlowCache {
    tables: BTreeMap<Span, Arc<FlowTable>>,
}

impl FlowCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, span: &Span) -> Option<Arc<FlowTable>> {
        self.tables.get(span).cloned()
    }

    pub fn contains(&self, span: &Span) -> bool {
        self.tables.contains_key(span)
    }

    /// Store `table` under `span`, replacing any previous entry.
    pub fn insert(&mut self, span: Span, table: Arc<FlowTable>) -> Option<Arc<FlowTable>> {
        self.tables.insert(span, table)
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn spans(&self) -> impl Iterator<Item = Span> + '_ {
        self.tables.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Span, &Arc<FlowTable>)> + '_ {
        self.tables.iter().map(|(s, t)| (*s, t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn table(x: f64) -> Arc<FlowTable> {
        let labels = vec!["A".to_string()];
        let m = array![[x]];
        Arc::new(FlowTable::from_matrices(&labels, &labels, &m, &m).unwrap())
    }

    #[test]
    fn iterates_in_span_order() {
        let mut cache = FlowCache::new();
        cache.insert(Span::new(1.0, 2.0), table(1.0));
        cache.insert(Span::new(0.0, 2.0), table(1.0));
        cache.insert(Span::new(0.0, 1.0), table(1.0));
        let spans: Vec<_> = cache.spans().collect();
        assert_eq!(
            spans,
            vec![Span::new(0.0, 1.0), Span::new(0.0, 2.0), Span::new(1.0, 2.0)]
        );
    }

    #[test]
    fn insert_overwrites_and_clear_empties() {
        let mut cache = FlowCache::new();
        assert!(cache.insert(Span::new(0.0, 1.0), table(1.0)).is_none());
        assert!(cache.insert(Span::new(0.0, 1.0), table(1.0)).is_some());
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&Span::new(0.0, 1.0)));
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get(&Span::new(0.0, 1.0)).is_none());
    }
}
