use std::sync::atomic::{AtomicUsize, Ordering};

use fateflow::{
    CouplingModel, DayPair, FlowAggregator, GroupAssignment, GroupInput, NormAxis, TransportModel,
};
use ndarray::{array, Array2};

/// Counts push-forwards; `Sync`, so the aggregator can be shared.
struct Counting {
    inner: CouplingModel,
    pushes: AtomicUsize,
}

impl TransportModel for Counting {
    fn time_points(&self) -> &[f64] {
        self.inner.time_points()
    }

    fn day_pairs(&self) -> &[DayPair] {
        self.inner.day_pairs()
    }

    fn observations(&self, t: f64) -> Option<&[String]> {
        self.inner.observations(t)
    }

    fn push_forward(
        &self,
        state: &Array2<f64>,
        pair: DayPair,
        normalize: bool,
        axis: NormAxis,
    ) -> fateflow::Result<Array2<f64>> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        self.inner.push_forward(state, pair, normalize, axis)
    }
}

#[test]
fn concurrent_requests_compute_each_span_once() {
    let inner = CouplingModel::from_metadata([
        ("a0", 0.0),
        ("b0", 0.0),
        ("a1", 1.0),
        ("b1", 1.0),
        ("a2", 2.0),
        ("b2", 2.0),
    ])
    .with_coupling(0.0, 1.0, array![[0.4, 0.1], [0.2, 0.3]])
    .unwrap()
    .with_coupling(1.0, 2.0, array![[0.25, 0.25], [0.1, 0.4]])
    .unwrap();
    let groups = GroupAssignment::new(GroupInput::one_hot([
        ("a0", "A"),
        ("b0", "B"),
        ("a1", "A"),
        ("b1", "B"),
        ("a2", "A"),
        ("b2", "B"),
    ]))
    .unwrap();
    let agg = FlowAggregator::new(
        Counting {
            inner,
            pushes: AtomicUsize::new(0),
        },
        groups,
    );

    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| agg.compute_flow(0.0, 2.0).unwrap());
        }
    });

    // Two hops, two directions, one computation.
    assert_eq!(agg.model().pushes.load(Ordering::SeqCst), 4);
    assert_eq!(agg.cached_spans().len(), 1);
}
