//! The memoizing graph executor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::dataset::{dataset_key, Dataset, Datum};
use crate::error::{FlowForgeError, FlowResult};
use crate::executor::expression::{DatasetExpression, DatumExpression, LazyInputs};
use crate::graph::id::{DepRef, NodeId};
use crate::graph::node::{NodeKind, TransformOp};
use crate::graph::Graph;

/// The executor's memoization state.
///
/// Held behind an `Arc` so a pipeline and its optimized rewrites share one
/// set of caches: an estimator fitted through the optimized graph is also
/// fitted for the original, and vice versa. Rewrites mint fresh ids for
/// anything they change, so entries keyed by replaced nodes simply go
/// cold; they can never alias a different node.
#[derive(Default)]
pub struct ExecutorCaches {
    fitted: Mutex<HashMap<NodeId, Arc<dyn TransformOp>>>,
    data: Mutex<HashMap<(NodeId, Option<usize>), Dataset>>,
}

impl ExecutorCaches {
    /// Fresh, empty caches.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

/// Walks a [`Graph`] from a requested node toward its inputs, memoizing
/// fitted estimators and per-input dataset outputs.
///
/// Single-threaded by contract: evaluation never blocks on itself and the
/// cache locks are never held across operator calls. Concurrent use from
/// multiple threads requires external synchronization.
pub struct GraphExecutor {
    graph: Graph,
    caches: Arc<ExecutorCaches>,
}

impl GraphExecutor {
    /// Executor over `graph` with fresh caches.
    pub fn new(graph: Graph) -> Self {
        Self::with_caches(graph, ExecutorCaches::new())
    }

    /// Executor over `graph` sharing previously built caches.
    pub fn with_caches(graph: Graph, caches: Arc<ExecutorCaches>) -> Self {
        GraphExecutor { graph, caches }
    }

    /// The graph being executed.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// The shared memoization state.
    pub fn caches(&self) -> &Arc<ExecutorCaches> {
        &self.caches
    }

    /// Fit an estimator node, returning its fitted transformer.
    ///
    /// The estimator's data dependencies are evaluated in dataset mode
    /// with no pipeline input bound; estimators fed from a graph source
    /// require that source to have been replaced by a source node first.
    /// `fit` runs at most once per node; later calls return the cached
    /// transformer.
    pub fn fit_estimator(&self, node: NodeId) -> FlowResult<Arc<dyn TransformOp>> {
        self.fit_estimator_with(node, None)
    }

    /// Fit with the current top-level input bound, so that fits triggered
    /// while evaluating a dataset can train on the pipeline's input. The
    /// first input to reach an estimator decides what it is fitted on;
    /// later inputs reuse the cached transformer.
    fn fit_estimator_with(
        &self,
        node: NodeId,
        input: Option<&Dataset>,
    ) -> FlowResult<Arc<dyn TransformOp>> {
        if let Some(fitted) = self.caches.fitted.lock()?.get(&node) {
            trace!(node = %node, "fit cache hit");
            return Ok(fitted.clone());
        }

        let estimator = match self.graph.get_operator(node)? {
            NodeKind::Estimator(op) => op.clone(),
            _ => return Err(FlowForgeError::FitOnNonEstimator(node)),
        };
        let deps = self.graph.get_dependencies(node)?.to_vec();

        debug!(node = %node, op = estimator.label(), "fitting estimator");
        let fitted = estimator
            .fit(self.dataset_inputs(&deps, input.cloned()))
            .map_err(FlowForgeError::from_op_error)?;

        self.caches.fitted.lock()?.insert(node, fitted.clone());
        Ok(fitted)
    }

    /// Evaluate `node` in dataset mode, with `input` bound to the
    /// pipeline's external input.
    ///
    /// Results are memoized per `(node, input identity)`; the sub-DAG
    /// under a node runs at most once per distinct input handle.
    pub fn evaluate_dataset(&self, node: NodeId, input: Option<&Dataset>) -> FlowResult<Dataset> {
        if node.is_sentinel() {
            return input.cloned().ok_or(FlowForgeError::MissingPipelineInput);
        }

        let key = (node, input.map(dataset_key));
        if let Some(cached) = self.caches.data.lock()?.get(&key) {
            trace!(node = %node, "dataset cache hit");
            return Ok(cached.clone());
        }

        let result = match self.graph.get_operator(node)? {
            NodeKind::Source(ds) => ds.clone(),
            NodeKind::Transformer(op) => {
                let op = op.clone();
                let deps = self.graph.get_dependencies(node)?.to_vec();
                op.apply_dataset(self.dataset_inputs(&deps, input.cloned()))
                    .map_err(FlowForgeError::from_op_error)?
            }
            NodeKind::DelegatingTransformer { fit_dep } => {
                let fit_dep = *fit_dep;
                let deps = self.graph.get_dependencies(node)?.to_vec();
                let fitted = self.fit_estimator_with(fit_dep, input)?;
                fitted
                    .apply_dataset(self.dataset_inputs(&deps, input.cloned()))
                    .map_err(FlowForgeError::from_op_error)?
            }
            NodeKind::Estimator(_) => return Err(FlowForgeError::DataFromEstimator(node)),
        };

        self.caches.data.lock()?.insert(key, result.clone());
        Ok(result)
    }

    /// Evaluate `node` in single-item mode, with `input` bound to the
    /// pipeline's external input.
    ///
    /// Shares fit results with dataset mode but is never memoized on its
    /// inputs: distinct values always mean distinct operator invocations.
    pub fn evaluate_datum(&self, node: NodeId, input: &Datum) -> FlowResult<Datum> {
        if node.is_sentinel() {
            return Ok(input.clone());
        }

        match self.graph.get_operator(node)? {
            NodeKind::Source(_) => Err(FlowForgeError::DatumFromSource(node)),
            NodeKind::Transformer(op) => {
                let op = op.clone();
                let deps = self.graph.get_dependencies(node)?.to_vec();
                op.apply(self.datum_inputs(&deps, input))
                    .map_err(FlowForgeError::from_op_error)
            }
            NodeKind::DelegatingTransformer { fit_dep } => {
                let fit_dep = *fit_dep;
                let deps = self.graph.get_dependencies(node)?.to_vec();
                let fitted = self.fit_estimator(fit_dep)?;
                fitted
                    .apply(self.datum_inputs(&deps, input))
                    .map_err(FlowForgeError::from_op_error)
            }
            NodeKind::Estimator(_) => Err(FlowForgeError::DataFromEstimator(node)),
        }
    }

    /// One lazy dataset expression per dependency, in dependency order.
    fn dataset_inputs<'s>(
        &'s self,
        deps: &[DepRef],
        input: Option<Dataset>,
    ) -> LazyInputs<'s, Dataset> {
        let exprs = deps
            .iter()
            .map(|&dep| {
                let input = input.clone();
                DatasetExpression::new(move || match dep {
                    DepRef::Node(n) => self.evaluate_dataset(n, input.as_ref()),
                    DepRef::Source(s) => Err(FlowForgeError::UnboundSource(s)),
                })
            })
            .collect();
        LazyInputs::new(exprs)
    }

    /// One lazy datum expression per dependency, in dependency order.
    fn datum_inputs<'s>(&'s self, deps: &[DepRef], input: &Datum) -> LazyInputs<'s, Datum> {
        let exprs = deps
            .iter()
            .map(|&dep| {
                let input = input.clone();
                DatumExpression::new(move || match dep {
                    DepRef::Node(n) => self.evaluate_datum(n, &input),
                    DepRef::Source(s) => Err(FlowForgeError::UnboundSource(s)),
                })
            })
            .collect();
        LazyInputs::new(exprs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{memory_records, MemoryRecords};
    use crate::graph::id::{SinkId, SourceId};
    use crate::graph::node::{EstimatorOp, OpResult};
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Doubles every i32 record; counts dataset invocations.
    struct Double {
        dataset_calls: AtomicUsize,
    }

    impl Double {
        fn new() -> Arc<Self> {
            Arc::new(Double {
                dataset_calls: AtomicUsize::new(0),
            })
        }
    }

    impl TransformOp for Double {
        fn label(&self) -> &str {
            "double"
        }

        fn apply(&self, inputs: LazyInputs<'_, Datum>) -> OpResult<Datum> {
            let value = inputs.into_single()?;
            let n = value.downcast::<i32>().ok_or("expected i32")?;
            Ok(Datum::new(n * 2))
        }

        fn apply_dataset(&self, inputs: LazyInputs<'_, Dataset>) -> OpResult<Dataset> {
            self.dataset_calls.fetch_add(1, Ordering::SeqCst);
            let ds = inputs.into_single()?;
            let records = memory_records::<i32>(&ds).ok_or("expected i32 records")?;
            Ok(MemoryRecords::dataset(
                records.iter().map(|n| n * 2).collect(),
            ))
        }
    }

    /// Subtracts a fixed offset learned at fit time.
    struct SubtractOffset(i32);

    impl TransformOp for SubtractOffset {
        fn label(&self) -> &str {
            "subtract-offset"
        }

        fn apply(&self, inputs: LazyInputs<'_, Datum>) -> OpResult<Datum> {
            let value = inputs.into_single()?;
            let n = value.downcast::<i32>().ok_or("expected i32")?;
            Ok(Datum::new(n - self.0))
        }

        fn apply_dataset(&self, inputs: LazyInputs<'_, Dataset>) -> OpResult<Dataset> {
            let ds = inputs.into_single()?;
            let records = memory_records::<i32>(&ds).ok_or("expected i32 records")?;
            Ok(MemoryRecords::dataset(
                records.iter().map(|n| n - self.0).collect(),
            ))
        }
    }

    /// Learns the integer mean of its input; counts fit invocations.
    struct MeanCenter {
        fit_calls: AtomicUsize,
    }

    impl MeanCenter {
        fn new() -> Arc<Self> {
            Arc::new(MeanCenter {
                fit_calls: AtomicUsize::new(0),
            })
        }
    }

    impl EstimatorOp for MeanCenter {
        fn label(&self) -> &str {
            "mean-center"
        }

        fn fit(&self, inputs: LazyInputs<'_, Dataset>) -> OpResult<Arc<dyn TransformOp>> {
            self.fit_calls.fetch_add(1, Ordering::SeqCst);
            let ds = inputs.into_single()?;
            let records = memory_records::<i32>(&ds).ok_or("expected i32 records")?;
            let mean = records.iter().sum::<i32>() / records.len() as i32;
            Ok(Arc::new(SubtractOffset(mean)))
        }
    }

    /// source node 0 -> double 1 -> {estimator 2, delegating 3}
    fn fixture() -> (GraphExecutor, Arc<Double>, Arc<MeanCenter>) {
        let double = Double::new();
        let mean = MeanCenter::new();

        let operators: BTreeMap<NodeId, NodeKind> = [
            (
                NodeId(0),
                NodeKind::Source(MemoryRecords::dataset(vec![1, 2, 3])),
            ),
            (NodeId(1), NodeKind::Transformer(double.clone())),
            (NodeId(2), NodeKind::Estimator(mean.clone())),
            (NodeId(3), NodeKind::DelegatingTransformer { fit_dep: NodeId(2) }),
        ]
        .into();
        let dependencies: BTreeMap<NodeId, Vec<DepRef>> = [
            (NodeId(0), vec![]),
            (NodeId(1), vec![DepRef::Node(NodeId(0))]),
            (NodeId(2), vec![DepRef::Node(NodeId(1))]),
            (NodeId(3), vec![DepRef::Node(NodeId(1))]),
        ]
        .into();
        let sinks: BTreeMap<SinkId, DepRef> = [(SinkId(0), DepRef::Node(NodeId(3)))].into();
        let graph = Graph::new(BTreeSet::new(), operators, dependencies, sinks).unwrap();

        (GraphExecutor::new(graph), double, mean)
    }

    #[test]
    fn test_dataset_evaluation_through_delegating_transformer() {
        let (executor, _, _) = fixture();
        // Records [1,2,3] doubled to [2,4,6], mean 4 subtracted.
        let out = executor.evaluate_dataset(NodeId(3), None).unwrap();
        assert_eq!(memory_records::<i32>(&out), Some(&[-2, 0, 2][..]));
    }

    #[test]
    fn test_fit_runs_once() {
        let (executor, _, mean) = fixture();
        executor.evaluate_dataset(NodeId(3), None).unwrap();
        executor.evaluate_dataset(NodeId(3), None).unwrap();
        executor.fit_estimator(NodeId(2)).unwrap();
        assert_eq!(mean.fit_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dataset_outputs_are_memoized_across_fit_and_apply() {
        let (executor, double, _) = fixture();
        // The doubled dataset is needed by the fit and by the delegating
        // transformer; the transformer runs once.
        executor.evaluate_dataset(NodeId(3), None).unwrap();
        assert_eq!(double.dataset_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_memoization_keys_on_input_identity() {
        let double = Double::new();
        let operators: BTreeMap<NodeId, NodeKind> =
            [(NodeId(0), NodeKind::Transformer(double.clone()))].into();
        let dependencies: BTreeMap<NodeId, Vec<DepRef>> =
            [(NodeId(0), vec![DepRef::Node(NodeId::SOURCE)])].into();
        let graph =
            Graph::new(BTreeSet::new(), operators, dependencies, BTreeMap::new()).unwrap();
        let executor = GraphExecutor::new(graph);

        let ds1 = MemoryRecords::dataset(vec![1, 2]);
        let ds2 = MemoryRecords::dataset(vec![1, 2]);

        executor.evaluate_dataset(NodeId(0), Some(&ds1)).unwrap();
        executor.evaluate_dataset(NodeId(0), Some(&ds1)).unwrap();
        assert_eq!(double.dataset_calls.load(Ordering::SeqCst), 1);

        // Structurally equal but a distinct handle: computed again.
        executor.evaluate_dataset(NodeId(0), Some(&ds2)).unwrap();
        assert_eq!(double.dataset_calls.load(Ordering::SeqCst), 2);

        // A clone of the first handle is the same identity.
        executor.evaluate_dataset(NodeId(0), Some(&ds1.clone())).unwrap();
        assert_eq!(double.dataset_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_sentinel_returns_pipeline_input() {
        let (executor, _, _) = fixture();
        let ds = MemoryRecords::dataset(vec![9]);
        let out = executor.evaluate_dataset(NodeId::SOURCE, Some(&ds)).unwrap();
        assert!(Arc::ptr_eq(&out, &ds));
        assert!(matches!(
            executor.evaluate_dataset(NodeId::SOURCE, None),
            Err(FlowForgeError::MissingPipelineInput)
        ));
    }

    #[test]
    fn test_kind_dispatch_errors() {
        let (executor, _, _) = fixture();
        assert!(matches!(
            executor.fit_estimator(NodeId(1)),
            Err(FlowForgeError::FitOnNonEstimator(NodeId(1)))
        ));
        assert!(matches!(
            executor.evaluate_dataset(NodeId(2), None),
            Err(FlowForgeError::DataFromEstimator(NodeId(2)))
        ));
        assert!(matches!(
            executor.evaluate_datum(NodeId(0), &Datum::new(1_i32)),
            Err(FlowForgeError::DatumFromSource(NodeId(0)))
        ));
    }

    #[test]
    fn test_datum_evaluation_reuses_fit() {
        // Training branch feeds the estimator from a constant source; the
        // delegating transformer itself reads the pipeline input.
        let mean = MeanCenter::new();
        let operators: BTreeMap<NodeId, NodeKind> = [
            (
                NodeId(0),
                NodeKind::Source(MemoryRecords::dataset(vec![1, 2, 3])),
            ),
            (NodeId(1), NodeKind::Transformer(Double::new())),
            (NodeId(2), NodeKind::Estimator(mean.clone())),
            (NodeId(3), NodeKind::DelegatingTransformer { fit_dep: NodeId(2) }),
        ]
        .into();
        let dependencies: BTreeMap<NodeId, Vec<DepRef>> = [
            (NodeId(0), vec![]),
            (NodeId(1), vec![DepRef::Node(NodeId(0))]),
            (NodeId(2), vec![DepRef::Node(NodeId(1))]),
            (NodeId(3), vec![DepRef::Node(NodeId::SOURCE)]),
        ]
        .into();
        let graph =
            Graph::new(BTreeSet::new(), operators, dependencies, BTreeMap::new()).unwrap();
        let executor = GraphExecutor::new(graph);

        // Fit happens in dataset mode even when entered from single-item
        // evaluation; both modes share it. Training mean is 4.
        let out = executor.evaluate_datum(NodeId(3), &Datum::new(10_i32)).unwrap();
        assert_eq!(out.downcast::<i32>(), Some(&6));

        let out = executor.evaluate_datum(NodeId(3), &Datum::new(3_i32)).unwrap();
        assert_eq!(out.downcast::<i32>(), Some(&-1));
        assert_eq!(mean.fit_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unbound_graph_source_is_an_error() {
        let double = Double::new();
        let sources: BTreeSet<SourceId> = [SourceId(0)].into();
        let operators: BTreeMap<NodeId, NodeKind> =
            [(NodeId(0), NodeKind::Transformer(double))].into();
        let dependencies: BTreeMap<NodeId, Vec<DepRef>> =
            [(NodeId(0), vec![DepRef::Source(SourceId(0))])].into();
        let graph = Graph::new(sources, operators, dependencies, BTreeMap::new()).unwrap();
        let executor = GraphExecutor::new(graph);

        assert!(matches!(
            executor.evaluate_dataset(NodeId(0), None),
            Err(FlowForgeError::UnboundSource(SourceId(0)))
        ));
    }

    #[test]
    fn test_failed_operator_leaves_caches_clean() {
        struct Failing {
            calls: AtomicUsize,
        }

        impl TransformOp for Failing {
            fn apply(&self, _inputs: LazyInputs<'_, Datum>) -> OpResult<Datum> {
                Err("always fails".into())
            }

            fn apply_dataset(&self, _inputs: LazyInputs<'_, Dataset>) -> OpResult<Dataset> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err("always fails".into())
            }
        }

        let failing = Arc::new(Failing {
            calls: AtomicUsize::new(0),
        });
        let operators: BTreeMap<NodeId, NodeKind> =
            [(NodeId(0), NodeKind::Transformer(failing.clone()))].into();
        let dependencies: BTreeMap<NodeId, Vec<DepRef>> =
            [(NodeId(0), vec![DepRef::Node(NodeId::SOURCE)])].into();
        let graph =
            Graph::new(BTreeSet::new(), operators, dependencies, BTreeMap::new()).unwrap();
        let executor = GraphExecutor::new(graph);

        let ds = MemoryRecords::dataset(vec![1]);
        assert!(executor.evaluate_dataset(NodeId(0), Some(&ds)).is_err());
        // Failure was not cached; the operator runs again.
        assert!(executor.evaluate_dataset(NodeId(0), Some(&ds)).is_err());
        assert_eq!(failing.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_lazy_inputs_skip_unused_dependencies() {
        struct TakeFirst;

        impl TransformOp for TakeFirst {
            fn apply(&self, mut inputs: LazyInputs<'_, Datum>) -> OpResult<Datum> {
                inputs.next().expect("arity")?;
                unreachable!()
            }

            fn apply_dataset(&self, mut inputs: LazyInputs<'_, Dataset>) -> OpResult<Dataset> {
                // Pull only the first of two inputs.
                Ok(inputs.next().expect("arity")?)
            }
        }

        let double = Double::new();
        let operators: BTreeMap<NodeId, NodeKind> = [
            (
                NodeId(0),
                NodeKind::Source(MemoryRecords::dataset(vec![5])),
            ),
            (NodeId(1), NodeKind::Transformer(double.clone())),
            (NodeId(2), NodeKind::Transformer(Arc::new(TakeFirst))),
        ]
        .into();
        let dependencies: BTreeMap<NodeId, Vec<DepRef>> = [
            (NodeId(0), vec![]),
            (NodeId(1), vec![DepRef::Node(NodeId(0))]),
            (NodeId(2), vec![DepRef::Node(NodeId(0)), DepRef::Node(NodeId(1))]),
        ]
        .into();
        let graph =
            Graph::new(BTreeSet::new(), operators, dependencies, BTreeMap::new()).unwrap();
        let executor = GraphExecutor::new(graph);

        executor.evaluate_dataset(NodeId(2), None).unwrap();
        // The second input (the doubling transformer) was never forced.
        assert_eq!(double.dataset_calls.load(Ordering::SeqCst), 0);
    }
}
