//! The pipeline façade.
//!
//! A [`Pipeline`] bundles a validated graph, the sink to evaluate, and the
//! memoization state, and exposes the two public entry points:
//! [`apply`](Pipeline::apply) for single items and
//! [`apply_dataset`](Pipeline::apply_dataset) for datasets. Both run
//! through the default optimizer; the `_with` variants take an explicit
//! optimizer, or `None` to evaluate the graph as-is.
//!
//! Optimized rewrites are memoized per optimizer identity and share the
//! original pipeline's fit and data caches, so an estimator is fitted at
//! most once per pipeline no matter which route evaluation takes.
//!
//! Values come back untyped; narrow them at the boundary with
//! [`Datum::downcast`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::dataset::{Dataset, Datum};
use crate::error::{FlowForgeError, FlowResult};
use crate::executor::GraphExecutor;
use crate::graph::id::{DepRef, SinkId};
use crate::graph::{Graph, ValidateOptions};
use crate::optimizer::{DefaultOptimizer, PipelineOptimizer};

/// A validated graph plus a chosen sink, ready to evaluate.
pub struct Pipeline {
    executor: GraphExecutor,
    sink: SinkId,
    optimized: Mutex<HashMap<usize, Arc<Pipeline>>>,
}

impl Pipeline {
    /// Build a pipeline over `graph`, evaluating `sink`.
    ///
    /// The graph is validated in full: every reference must resolve,
    /// every node must honor its kind's dependency contract, and the
    /// graph must be acyclic.
    pub fn new(graph: Graph, sink: SinkId) -> FlowResult<Self> {
        Self::new_with_options(graph, sink, &ValidateOptions::default())
    }

    /// [`Pipeline::new`] with explicit validation policy.
    pub fn new_with_options(
        graph: Graph,
        sink: SinkId,
        options: &ValidateOptions,
    ) -> FlowResult<Self> {
        graph.validate(options)?;
        if !graph.contains_sink(sink) {
            return Err(FlowForgeError::UnknownSink(sink));
        }
        Ok(Pipeline {
            executor: GraphExecutor::new(graph),
            sink,
            optimized: Mutex::new(HashMap::new()),
        })
    }

    /// The graph this pipeline evaluates.
    pub fn graph(&self) -> &Graph {
        self.executor.graph()
    }

    /// The sink this pipeline evaluates.
    pub fn sink(&self) -> SinkId {
        self.sink
    }

    /// The underlying executor.
    pub fn executor(&self) -> &GraphExecutor {
        &self.executor
    }

    /// Evaluate the pipeline on a single item, via the default optimizer.
    pub fn apply(&self, input: Datum) -> FlowResult<Datum> {
        self.apply_with(input, Some(DefaultOptimizer::shared()))
    }

    /// Evaluate the pipeline on a single item.
    ///
    /// With `Some(optimizer)`, the optimized rewrite is looked up (or
    /// built and memoized) and evaluated; with `None`, the graph is
    /// evaluated as-is.
    pub fn apply_with(
        &self,
        input: Datum,
        optimizer: Option<Arc<dyn PipelineOptimizer>>,
    ) -> FlowResult<Datum> {
        match optimizer {
            Some(opt) => self.optimized(opt)?.apply_with(input, None),
            None => match self.graph().get_sink_dependency(self.sink)? {
                DepRef::Node(node) => self.executor.evaluate_datum(node, &input),
                DepRef::Source(source) => Err(FlowForgeError::UnboundSource(source)),
            },
        }
    }

    /// Evaluate the pipeline on a dataset, via the default optimizer.
    pub fn apply_dataset(&self, input: Dataset) -> FlowResult<Dataset> {
        self.apply_dataset_with(input, Some(DefaultOptimizer::shared()))
    }

    /// Evaluate the pipeline on a dataset; optimizer handling as in
    /// [`apply_with`](Pipeline::apply_with).
    pub fn apply_dataset_with(
        &self,
        input: Dataset,
        optimizer: Option<Arc<dyn PipelineOptimizer>>,
    ) -> FlowResult<Dataset> {
        match optimizer {
            Some(opt) => self.optimized(opt)?.apply_dataset_with(input, None),
            None => match self.graph().get_sink_dependency(self.sink)? {
                DepRef::Node(node) => self.executor.evaluate_dataset(node, Some(&input)),
                DepRef::Source(source) => Err(FlowForgeError::UnboundSource(source)),
            },
        }
    }

    /// The memoized rewrite of this pipeline under `optimizer`, keyed by
    /// the optimizer's identity.
    fn optimized(&self, optimizer: Arc<dyn PipelineOptimizer>) -> FlowResult<Arc<Pipeline>> {
        let key = Arc::as_ptr(&optimizer) as *const () as usize;
        if let Some(found) = self.optimized.lock()?.get(&key) {
            return Ok(found.clone());
        }

        debug!(optimizer = optimizer.name(), "optimizing pipeline");
        let rewritten = optimizer.execute(self)?.sharing_caches_of(self);
        let rewritten = Arc::new(rewritten);
        self.optimized.lock()?.insert(key, rewritten.clone());
        Ok(rewritten)
    }

    /// Rebind onto `other`'s fit and data caches, so evaluation through
    /// the rewrite warms the same state as evaluation of the original.
    /// The rewrite cache is deliberately *not* shared: the rewrite would
    /// otherwise hold itself alive through its own cache.
    fn sharing_caches_of(self, other: &Pipeline) -> Pipeline {
        Pipeline {
            executor: GraphExecutor::with_caches(
                self.executor.graph().clone(),
                other.executor.caches().clone(),
            ),
            sink: self.sink,
            optimized: Mutex::new(HashMap::new()),
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("sink", &self.sink)
            .field("nodes", &self.graph().node_count())
            .field("sources", &self.graph().source_count())
            .field("sinks", &self.graph().sink_count())
            .finish_non_exhaustive()
    }
}
