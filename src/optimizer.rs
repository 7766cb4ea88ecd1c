//! Pipeline optimizers.
//!
//! An optimizer is a pluggable rewriter: given a pipeline, it returns an
//! equivalent pipeline. Pipelines memoize optimized results per optimizer
//! *identity*, so repeated application of the same optimizer instance
//! reuses the rewrite.
//!
//! # Optimization Passes (`DefaultOptimizer`)
//!
//! - **Sink pruning**: drop output ports other than the pipeline's sink
//! - **Dead node elimination**: drop nodes and sources that cannot reach
//!   the pipeline's sink through data or fit edges

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::debug;

use crate::error::FlowResult;
use crate::graph::id::{DepRef, NodeId, SinkId, SourceId};
use crate::graph::node::NodeKind;
use crate::graph::Graph;
use crate::pipeline::Pipeline;

/// A pipeline rewriter. Implementations must preserve semantics: the
/// rewritten pipeline computes the same outputs for the same inputs.
pub trait PipelineOptimizer: Send + Sync {
    /// Rewrite `pipeline` into an equivalent pipeline.
    fn execute(&self, pipeline: &Pipeline) -> FlowResult<Pipeline>;

    /// Label used in logs.
    fn name(&self) -> &str {
        "optimizer"
    }
}

/// Statistics about optimization results.
#[derive(Debug, Default, Clone, Copy)]
pub struct OptimizerStats {
    /// Number of nodes removed
    pub nodes_removed: usize,
    /// Number of sources removed
    pub sources_removed: usize,
    /// Number of sinks removed
    pub sinks_removed: usize,
}

impl OptimizerStats {
    /// Total number of graph elements removed.
    pub fn total_removed(&self) -> usize {
        self.nodes_removed + self.sources_removed + self.sinks_removed
    }

    /// Check if any optimizations were applied.
    pub fn is_empty(&self) -> bool {
        self.total_removed() == 0
    }
}

impl std::fmt::Display for OptimizerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            write!(f, "OptimizerStats: no optimizations applied")
        } else {
            write!(
                f,
                "OptimizerStats: {} nodes, {} sources, {} sinks ({} total)",
                self.nodes_removed,
                self.sources_removed,
                self.sinks_removed,
                self.total_removed()
            )
        }
    }
}

/// The default rewriter: trims everything that cannot influence the
/// pipeline's sink. Node ids are preserved, so warm caches stay valid.
#[derive(Debug)]
pub struct DefaultOptimizer {
    enable_sink_pruning: bool,
    enable_dead_node_elimination: bool,
}

static SHARED: Lazy<Arc<DefaultOptimizer>> = Lazy::new(|| Arc::new(DefaultOptimizer::new()));

impl DefaultOptimizer {
    /// Create a new optimizer with all passes enabled.
    pub fn new() -> Self {
        DefaultOptimizer {
            enable_sink_pruning: true,
            enable_dead_node_elimination: true,
        }
    }

    /// The process-wide shared instance, used by the no-argument `apply`
    /// entry points. Sharing one instance keeps the per-identity rewrite
    /// cache warm across calls.
    pub fn shared() -> Arc<dyn PipelineOptimizer> {
        SHARED.clone() as Arc<dyn PipelineOptimizer>
    }

    /// Disable sink pruning.
    pub fn without_sink_pruning(mut self) -> Self {
        self.enable_sink_pruning = false;
        self
    }

    /// Disable dead node elimination.
    pub fn without_dead_node_elimination(mut self) -> Self {
        self.enable_dead_node_elimination = false;
        self
    }

    /// Rewrite the pipeline and report what was removed.
    pub fn optimize(&self, pipeline: &Pipeline) -> FlowResult<(Pipeline, OptimizerStats)> {
        let graph = pipeline.graph();
        let sink = pipeline.sink();
        let mut stats = OptimizerStats::default();

        // Kept sinks root the liveness walk; with pruning disabled every
        // sink keeps its cone alive.
        let kept_sinks: Vec<SinkId> = if self.enable_sink_pruning {
            vec![sink]
        } else {
            graph.sinks().collect()
        };
        let live = self.live_set(graph, &kept_sinks)?;

        let mut sources: BTreeSet<SourceId> = BTreeSet::new();
        let mut operators: BTreeMap<NodeId, NodeKind> = BTreeMap::new();
        let mut dependencies: BTreeMap<NodeId, Vec<DepRef>> = BTreeMap::new();
        let mut sink_dependencies: BTreeMap<SinkId, DepRef> = BTreeMap::new();

        for source in graph.sources() {
            if !self.enable_dead_node_elimination || live.contains(&DepRef::Source(source)) {
                sources.insert(source);
            } else {
                stats.sources_removed += 1;
            }
        }
        for node in graph.nodes() {
            if !self.enable_dead_node_elimination || live.contains(&DepRef::Node(node)) {
                operators.insert(node, graph.get_operator(node)?.clone());
                dependencies.insert(node, graph.get_dependencies(node)?.to_vec());
            } else {
                stats.nodes_removed += 1;
            }
        }
        for s in graph.sinks() {
            if !self.enable_sink_pruning || s == sink {
                sink_dependencies.insert(s, graph.get_sink_dependency(s)?);
            } else {
                stats.sinks_removed += 1;
            }
        }

        let rewritten = Graph::new(sources, operators, dependencies, sink_dependencies)?;
        let rewritten = Pipeline::new(rewritten, sink)?;
        Ok((rewritten, stats))
    }

    /// Everything reachable from the given sinks through data and fit
    /// edges.
    fn live_set(&self, graph: &Graph, sinks: &[SinkId]) -> FlowResult<BTreeSet<DepRef>> {
        let mut live: BTreeSet<DepRef> = BTreeSet::new();
        let mut frontier: Vec<DepRef> = sinks
            .iter()
            .map(|&s| graph.get_sink_dependency(s))
            .collect::<FlowResult<_>>()?;

        while let Some(dep) = frontier.pop() {
            if dep.is_sentinel() || !live.insert(dep) {
                continue;
            }
            let node = match dep.as_node() {
                Some(n) => n,
                None => continue,
            };
            for &d in graph.get_dependencies(node)? {
                frontier.push(d);
            }
            if let Some(fit) = graph.get_operator(node)?.fit_dependency() {
                frontier.push(DepRef::Node(fit));
            }
        }
        Ok(live)
    }
}

impl Default for DefaultOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineOptimizer for DefaultOptimizer {
    fn execute(&self, pipeline: &Pipeline) -> FlowResult<Pipeline> {
        let (rewritten, stats) = self.optimize(pipeline)?;
        debug!(optimizer = self.name(), %stats, "pipeline optimized");
        Ok(rewritten)
    }

    fn name(&self) -> &str {
        "default"
    }
}
