//! Shared fixtures for integration tests: a reference ten-node graph for
//! the rewrite tests, and counting operators for the execution tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use flowforge::{
    memory_records, Dataset, Datum, DepRef, EstimatorOp, Graph, LazyInputs, MemoryRecords, NodeId,
    NodeKind, OpResult, SinkId, SourceId, TransformOp,
};

/// Pass-through transform carrying a numeric tag, so test graphs can hold
/// many distinguishable nodes cheaply.
pub struct Tagged(pub u32);

impl TransformOp for Tagged {
    fn label(&self) -> &str {
        "tagged"
    }

    fn apply(&self, mut inputs: LazyInputs<'_, Datum>) -> OpResult<Datum> {
        inputs.next().expect("at least one input").map_err(Into::into)
    }

    fn apply_dataset(&self, mut inputs: LazyInputs<'_, Dataset>) -> OpResult<Dataset> {
        inputs.next().expect("at least one input").map_err(Into::into)
    }
}

/// A tagged transformer node.
pub fn tagged(tag: u32) -> NodeKind {
    NodeKind::Transformer(Arc::new(Tagged(tag)))
}

/// Pass-through transform counting its invocations in both modes.
pub struct Counting {
    pub apply_calls: AtomicUsize,
    pub dataset_calls: AtomicUsize,
}

impl Counting {
    pub fn new() -> Arc<Self> {
        Arc::new(Counting {
            apply_calls: AtomicUsize::new(0),
            dataset_calls: AtomicUsize::new(0),
        })
    }
}

impl TransformOp for Counting {
    fn label(&self) -> &str {
        "counting"
    }

    fn apply(&self, mut inputs: LazyInputs<'_, Datum>) -> OpResult<Datum> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        inputs.next().expect("at least one input").map_err(Into::into)
    }

    fn apply_dataset(&self, mut inputs: LazyInputs<'_, Dataset>) -> OpResult<Dataset> {
        self.dataset_calls.fetch_add(1, Ordering::SeqCst);
        inputs.next().expect("at least one input").map_err(Into::into)
    }
}

/// Estimator counting its fits; always returns the same shared counting
/// transformer so tests can observe how often the fit result runs.
pub struct TrackingEstimator {
    pub fit_calls: AtomicUsize,
    fitted: Arc<Counting>,
}

impl TrackingEstimator {
    pub fn new() -> Arc<Self> {
        Arc::new(TrackingEstimator {
            fit_calls: AtomicUsize::new(0),
            fitted: Counting::new(),
        })
    }

    pub fn fitted(&self) -> &Arc<Counting> {
        &self.fitted
    }
}

impl EstimatorOp for TrackingEstimator {
    fn label(&self) -> &str {
        "tracking"
    }

    fn fit(&self, inputs: LazyInputs<'_, Dataset>) -> OpResult<Arc<dyn TransformOp>> {
        self.fit_calls.fetch_add(1, Ordering::SeqCst);
        inputs.force_all()?;
        Ok(self.fitted.clone() as Arc<dyn TransformOp>)
    }
}

/// Subtracts the mean learned at fit time from every value.
pub struct CenterOn(pub f64);

impl TransformOp for CenterOn {
    fn label(&self) -> &str {
        "center-on"
    }

    fn apply(&self, inputs: LazyInputs<'_, Datum>) -> OpResult<Datum> {
        let value = inputs.into_single()?;
        let x = value.downcast::<f64>().ok_or("expected f64")?;
        Ok(Datum::new(x - self.0))
    }

    fn apply_dataset(&self, inputs: LazyInputs<'_, Dataset>) -> OpResult<Dataset> {
        let ds = inputs.into_single()?;
        let records = memory_records::<f64>(&ds).ok_or("expected f64 records")?;
        Ok(MemoryRecords::dataset(
            records.iter().map(|x| x - self.0).collect(),
        ))
    }
}

/// Learns the mean of its training data; fits to [`CenterOn`].
pub struct MeanEstimator {
    pub fit_calls: AtomicUsize,
}

impl MeanEstimator {
    pub fn new() -> Arc<Self> {
        Arc::new(MeanEstimator {
            fit_calls: AtomicUsize::new(0),
        })
    }
}

impl EstimatorOp for MeanEstimator {
    fn label(&self) -> &str {
        "mean"
    }

    fn fit(&self, inputs: LazyInputs<'_, Dataset>) -> OpResult<Arc<dyn TransformOp>> {
        self.fit_calls.fetch_add(1, Ordering::SeqCst);
        let ds = inputs.into_single()?;
        let records = memory_records::<f64>(&ds).ok_or("expected f64 records")?;
        let mean = records.iter().sum::<f64>() / records.len() as f64;
        Ok(Arc::new(CenterOn(mean)))
    }
}

/// The reference ten-node graph the rewrite tests walk through:
///
/// ```text
/// S1 -> 0 -> 2 -> 3 -> 4 -> 5 -> 6 -> 7    (7 also reads S1 and 1)
/// S1, S2 -> 1                 4, 5 -> 8 -> 9
/// sinks: 0 -> S2, 1 -> node 4, 2 -> node 9
/// ```
pub fn ten_node_graph() -> Graph {
    let sources: BTreeSet<SourceId> = [SourceId(1), SourceId(2)].into();

    let operators: BTreeMap<NodeId, NodeKind> =
        (0..10).map(|i| (NodeId(i), tagged(i as u32))).collect();

    let dependencies: BTreeMap<NodeId, Vec<DepRef>> = [
        (NodeId(0), vec![DepRef::Source(SourceId(1))]),
        (
            NodeId(1),
            vec![DepRef::Source(SourceId(1)), DepRef::Source(SourceId(2))],
        ),
        (NodeId(2), vec![DepRef::Node(NodeId(0))]),
        (NodeId(3), vec![DepRef::Node(NodeId(2))]),
        (
            NodeId(4),
            vec![DepRef::Node(NodeId(0)), DepRef::Node(NodeId(3))],
        ),
        (
            NodeId(5),
            vec![
                DepRef::Node(NodeId(4)),
                DepRef::Node(NodeId(3)),
                DepRef::Node(NodeId(4)),
            ],
        ),
        (NodeId(6), vec![DepRef::Node(NodeId(5))]),
        (
            NodeId(7),
            vec![
                DepRef::Source(SourceId(1)),
                DepRef::Node(NodeId(1)),
                DepRef::Node(NodeId(6)),
            ],
        ),
        (
            NodeId(8),
            vec![DepRef::Node(NodeId(4)), DepRef::Node(NodeId(5))],
        ),
        (NodeId(9), vec![DepRef::Node(NodeId(8))]),
    ]
    .into();

    let sink_dependencies: BTreeMap<SinkId, DepRef> = [
        (SinkId(0), DepRef::Source(SourceId(2))),
        (SinkId(1), DepRef::Node(NodeId(4))),
        (SinkId(2), DepRef::Node(NodeId(9))),
    ]
    .into();

    Graph::new(sources, operators, dependencies, sink_dependencies)
        .expect("reference graph is valid")
}
