//! The immutable pipeline graph and its rewrite algebra.
//!
//! A [`Graph`] is a value: every rewrite operator validates its arguments,
//! leaves `self` untouched and returns a new graph. Identifiers minted by
//! a rewrite are strictly greater than anything already used, so ids held
//! across a rewrite never collide with ids it created.
//!
//! Two deliberate behaviors worth knowing about:
//!
//! - Removing a node or source does *not* scrub references to it from
//!   other entries; callers (the optimizer layer) are responsible for
//!   re-wiring before the graph is executed. Full resolution is re-checked
//!   when a pipeline is built.
//! - Cycles are rejected by [`Graph::validate`], which runs at direct
//!   construction and at pipeline construction, not after every mutator.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{FlowForgeError, FlowResult};
use crate::graph::id::{DepRef, NodeId, SinkId, SourceId};
use crate::graph::node::NodeKind;

/// Policy knobs for full-graph validation.
#[derive(Debug, Clone)]
pub struct ValidateOptions {
    check_cycles: bool,
    cycles_follow_fit_deps: bool,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        ValidateOptions {
            check_cycles: true,
            cycles_follow_fit_deps: true,
        }
    }
}

impl ValidateOptions {
    /// Default validation: cycles rejected, fit edges included.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable cycle detection entirely.
    pub fn with_cycle_check(mut self, enabled: bool) -> Self {
        self.check_cycles = enabled;
        self
    }

    /// Whether cycle detection follows fit dependencies in addition to
    /// data dependencies. An estimator whose inputs transitively reach a
    /// transformer delegating to that same estimator can never be fitted,
    /// so fit edges are followed by default.
    pub fn with_fit_dep_cycles(mut self, enabled: bool) -> Self {
        self.cycles_follow_fit_deps = enabled;
        self
    }
}

/// An immutable DAG of computation nodes with typed input and output ports.
///
/// - `sources` are the graph's input ports; they carry no operator.
/// - `operators` maps each node to its [`NodeKind`].
/// - `dependencies` maps each node to its ordered data inputs (argument
///   order for the operator). Its key set always equals `operators`'.
/// - `sink_dependencies` maps each output port to the single node or
///   source it exposes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    sources: BTreeSet<SourceId>,
    operators: BTreeMap<NodeId, NodeKind>,
    dependencies: BTreeMap<NodeId, Vec<DepRef>>,
    sink_dependencies: BTreeMap<SinkId, DepRef>,
}

impl Graph {
    /// The empty graph.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Construct a graph from its parts, rejecting any violation of the
    /// structural invariants (unresolved references, mismatched tables,
    /// per-kind dependency contracts, cycles).
    pub fn new(
        sources: BTreeSet<SourceId>,
        operators: BTreeMap<NodeId, NodeKind>,
        dependencies: BTreeMap<NodeId, Vec<DepRef>>,
        sink_dependencies: BTreeMap<SinkId, DepRef>,
    ) -> FlowResult<Self> {
        let graph = Graph {
            sources,
            operators,
            dependencies,
            sink_dependencies,
        };
        graph.validate(&ValidateOptions::default())?;
        Ok(graph)
    }

    // ========== Accessors ==========

    /// Ids of all nodes.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.operators.keys().copied()
    }

    /// Ids of all input ports.
    pub fn sources(&self) -> impl Iterator<Item = SourceId> + '_ {
        self.sources.iter().copied()
    }

    /// Ids of all output ports.
    pub fn sinks(&self) -> impl Iterator<Item = SinkId> + '_ {
        self.sink_dependencies.keys().copied()
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.operators.len()
    }

    /// Number of input ports.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Number of output ports.
    pub fn sink_count(&self) -> usize {
        self.sink_dependencies.len()
    }

    /// Whether the node exists.
    pub fn contains_node(&self, node: NodeId) -> bool {
        self.operators.contains_key(&node)
    }

    /// Whether the source exists.
    pub fn contains_source(&self, source: SourceId) -> bool {
        self.sources.contains(&source)
    }

    /// Whether the sink exists.
    pub fn contains_sink(&self, sink: SinkId) -> bool {
        self.sink_dependencies.contains_key(&sink)
    }

    /// The ordered data dependencies of a node.
    pub fn get_dependencies(&self, node: NodeId) -> FlowResult<&[DepRef]> {
        self.dependencies
            .get(&node)
            .map(Vec::as_slice)
            .ok_or(FlowForgeError::NodeNotFound(node))
    }

    /// The single dependency of an output port.
    pub fn get_sink_dependency(&self, sink: SinkId) -> FlowResult<DepRef> {
        self.sink_dependencies
            .get(&sink)
            .copied()
            .ok_or(FlowForgeError::SinkNotFound(sink))
    }

    /// The kind of a node.
    pub fn get_operator(&self, node: NodeId) -> FlowResult<&NodeKind> {
        self.operators
            .get(&node)
            .ok_or(FlowForgeError::NodeNotFound(node))
    }

    // ========== Validation ==========

    /// Check the structural invariants of the whole graph.
    ///
    /// Rejects unresolved dependency references, operator/dependency table
    /// mismatches, per-kind contract violations, estimators used as data
    /// inputs, and (per `options`) dependency cycles.
    pub fn validate(&self, options: &ValidateOptions) -> FlowResult<()> {
        for node in self.operators.keys() {
            if !self.dependencies.contains_key(node) {
                return Err(FlowForgeError::DependencyTableMismatch(*node));
            }
        }
        for node in self.dependencies.keys() {
            if !self.operators.contains_key(node) {
                return Err(FlowForgeError::DependencyTableMismatch(*node));
            }
        }

        for (&node, deps) in &self.dependencies {
            for &dep in deps {
                self.check_ref(dep)?;
            }
            let kind = &self.operators[&node];
            self.check_node_contract(node, kind, deps)?;
        }

        for &dep in self.sink_dependencies.values() {
            self.check_ref(dep)?;
        }

        if options.check_cycles {
            self.check_cycles(options.cycles_follow_fit_deps)?;
        }

        Ok(())
    }

    /// A reference is resolvable if it names an existing node or source.
    /// The external-input sentinel is always resolvable; the executor
    /// binds it at run time.
    fn check_ref(&self, dep: DepRef) -> FlowResult<()> {
        match dep {
            DepRef::Node(n) if n.is_sentinel() => Ok(()),
            DepRef::Node(n) if self.operators.contains_key(&n) => Ok(()),
            DepRef::Source(s) if self.sources.contains(&s) => Ok(()),
            _ => Err(FlowForgeError::UnresolvedDependency(dep)),
        }
    }

    /// Per-kind dependency contract for one node.
    fn check_node_contract(
        &self,
        node: NodeId,
        kind: &NodeKind,
        deps: &[DepRef],
    ) -> FlowResult<()> {
        match kind {
            NodeKind::Source(_) => {
                if !deps.is_empty() {
                    return Err(FlowForgeError::SourceWithDependencies(node));
                }
            }
            NodeKind::Estimator(_) => {
                if deps.is_empty() {
                    return Err(FlowForgeError::EstimatorWithoutDependencies(node));
                }
            }
            NodeKind::Transformer(_) => {
                if deps.is_empty() {
                    return Err(FlowForgeError::TransformerWithoutDependencies(node));
                }
            }
            NodeKind::DelegatingTransformer { fit_dep } => {
                if deps.is_empty() {
                    return Err(FlowForgeError::TransformerWithoutDependencies(node));
                }
                match self.operators.get(fit_dep) {
                    Some(k) if k.is_estimator() => {}
                    _ => {
                        return Err(FlowForgeError::FitDependencyNotEstimator {
                            node,
                            fit_dep: *fit_dep,
                        })
                    }
                }
            }
        }

        // Estimators do not produce data.
        for &dep in deps {
            if let DepRef::Node(dn) = dep {
                if self.operators.get(&dn).is_some_and(NodeKind::is_estimator) {
                    return Err(FlowForgeError::EstimatorAsDataDependency {
                        of: DepRef::Node(node),
                        dep: dn,
                    });
                }
            }
        }
        Ok(())
    }

    /// Iterative three-color DFS over execution edges.
    fn check_cycles(&self, follow_fit: bool) -> FlowResult<()> {
        // absent = unvisited, 1 = on the current path, 2 = finished
        let mut color: BTreeMap<NodeId, u8> = BTreeMap::new();

        for &start in self.operators.keys() {
            if color.contains_key(&start) {
                continue;
            }
            color.insert(start, 1);
            let mut stack = vec![(start, self.execution_successors(start, follow_fit), 0usize)];

            while !stack.is_empty() {
                let step = {
                    let top = stack.last_mut().expect("stack is non-empty");
                    if top.2 < top.1.len() {
                        let next = top.1[top.2];
                        top.2 += 1;
                        Some(next)
                    } else {
                        color.insert(top.0, 2);
                        None
                    }
                };
                match step {
                    None => {
                        stack.pop();
                    }
                    Some(next) => match color.get(&next).copied() {
                        Some(1) => return Err(FlowForgeError::CycleDetected(next)),
                        Some(_) => {}
                        None => {
                            color.insert(next, 1);
                            let succs = self.execution_successors(next, follow_fit);
                            stack.push((next, succs, 0));
                        }
                    },
                }
            }
        }
        Ok(())
    }

    /// Nodes evaluated before `node` can run: its data dependencies plus,
    /// optionally, its fit dependency. Dangling references are skipped;
    /// they cannot close a cycle.
    fn execution_successors(&self, node: NodeId, follow_fit: bool) -> Vec<NodeId> {
        let mut succs: Vec<NodeId> = self
            .dependencies
            .get(&node)
            .map(|deps| {
                deps.iter()
                    .filter_map(|d| d.as_node())
                    .filter(|n| self.operators.contains_key(n))
                    .collect()
            })
            .unwrap_or_default();
        if follow_fit {
            if let Some(fit) = self.operators.get(&node).and_then(NodeKind::fit_dependency) {
                if self.operators.contains_key(&fit) {
                    succs.push(fit);
                }
            }
        }
        succs
    }

    // ========== Fresh id minting ==========

    fn all_dep_refs(&self) -> impl Iterator<Item = DepRef> + '_ {
        self.dependencies
            .values()
            .flatten()
            .copied()
            .chain(self.sink_dependencies.values().copied())
    }

    /// First node id greater than everything used anywhere in the graph,
    /// including dangling references left behind by removals.
    fn fresh_node_id(&self) -> u64 {
        self.operators
            .keys()
            .map(|n| n.0)
            .chain(
                self.all_dep_refs()
                    .filter_map(DepRef::as_node)
                    .filter(|n| !n.is_sentinel())
                    .map(|n| n.0),
            )
            .chain(
                self.operators
                    .values()
                    .filter_map(NodeKind::fit_dependency)
                    .map(|n| n.0),
            )
            .max()
            .map_or(0, |m| m + 1)
    }

    fn fresh_source_id(&self) -> u64 {
        self.sources
            .iter()
            .map(|s| s.0)
            .chain(self.all_dep_refs().filter_map(DepRef::as_source).map(|s| s.0))
            .max()
            .map_or(0, |m| m + 1)
    }

    fn fresh_sink_id(&self) -> u64 {
        self.sink_dependencies
            .keys()
            .map(|s| s.0)
            .max()
            .map_or(0, |m| m + 1)
    }

    // ========== Mutating operators (pure; each returns a new graph) ==========

    /// Add a node with the given operator and ordered dependencies.
    ///
    /// Every dependency (and the fit dependency of a delegating
    /// transformer) must already exist.
    pub fn add_node(&self, kind: NodeKind, deps: Vec<DepRef>) -> FlowResult<(Graph, NodeId)> {
        for &dep in &deps {
            self.check_ref(dep)?;
        }
        let id = NodeId(self.fresh_node_id());
        self.check_node_contract(id, &kind, &deps)?;

        let mut graph = self.clone();
        graph.operators.insert(id, kind);
        graph.dependencies.insert(id, deps);
        Ok((graph, id))
    }

    /// Add a fresh, unconnected input port.
    pub fn add_source(&self) -> (Graph, SourceId) {
        let id = SourceId(self.fresh_source_id());
        let mut graph = self.clone();
        graph.sources.insert(id);
        (graph, id)
    }

    /// Add an output port exposing an existing node or source.
    pub fn add_sink(&self, dep: DepRef) -> FlowResult<(Graph, SinkId)> {
        self.check_ref(dep)?;
        let id = SinkId(self.fresh_sink_id());
        let mut graph = self.clone();
        graph.sink_dependencies.insert(id, dep);
        Ok((graph, id))
    }

    /// Replace a node's ordered dependency list.
    pub fn set_dependencies(&self, node: NodeId, deps: Vec<DepRef>) -> FlowResult<Graph> {
        let kind = self
            .operators
            .get(&node)
            .ok_or(FlowForgeError::UnknownNode(node))?;
        for &dep in &deps {
            self.check_ref(dep)?;
        }
        self.check_node_contract(node, kind, &deps)?;

        let mut graph = self.clone();
        graph.dependencies.insert(node, deps);
        Ok(graph)
    }

    /// Replace a node's operator, keeping its dependencies.
    pub fn set_operator(&self, node: NodeId, kind: NodeKind) -> FlowResult<Graph> {
        let deps = self
            .dependencies
            .get(&node)
            .ok_or(FlowForgeError::UnknownNode(node))?;
        self.check_node_contract(node, &kind, deps)?;

        if kind.is_estimator() {
            // Turning a node into an estimator would invalidate any data
            // dependency on it.
            for (&other, other_deps) in &self.dependencies {
                if other != node && other_deps.contains(&DepRef::Node(node)) {
                    return Err(FlowForgeError::EstimatorAsDataDependency {
                        of: DepRef::Node(other),
                        dep: node,
                    });
                }
            }
        } else {
            // Turning an estimator into anything else would orphan the fit
            // dependencies pointing at it.
            for (&other, other_kind) in &self.operators {
                if other != node && other_kind.fit_dependency() == Some(node) {
                    return Err(FlowForgeError::FitDependencyNotEstimator {
                        node: other,
                        fit_dep: node,
                    });
                }
            }
        }

        let mut graph = self.clone();
        graph.operators.insert(node, kind);
        Ok(graph)
    }

    /// Re-point an output port at an existing node or source.
    pub fn set_sink_dependency(&self, sink: SinkId, dep: DepRef) -> FlowResult<Graph> {
        if !self.sink_dependencies.contains_key(&sink) {
            return Err(FlowForgeError::UnknownSink(sink));
        }
        self.check_ref(dep)?;

        let mut graph = self.clone();
        graph.sink_dependencies.insert(sink, dep);
        Ok(graph)
    }

    /// Remove an output port.
    pub fn remove_sink(&self, sink: SinkId) -> FlowResult<Graph> {
        if !self.sink_dependencies.contains_key(&sink) {
            return Err(FlowForgeError::UnknownSink(sink));
        }
        let mut graph = self.clone();
        graph.sink_dependencies.remove(&sink);
        Ok(graph)
    }

    /// Remove an input port. References to it elsewhere are left intact;
    /// callers are responsible for re-wiring before execution.
    pub fn remove_source(&self, source: SourceId) -> FlowResult<Graph> {
        if !self.sources.contains(&source) {
            return Err(FlowForgeError::UnknownSource(source));
        }
        let mut graph = self.clone();
        graph.sources.remove(&source);
        Ok(graph)
    }

    /// Remove a node and its dependency entry. References to it elsewhere
    /// are left intact; callers are responsible for re-wiring before
    /// execution.
    pub fn remove_node(&self, node: NodeId) -> FlowResult<Graph> {
        if !self.operators.contains_key(&node) {
            return Err(FlowForgeError::UnknownNode(node));
        }
        let mut graph = self.clone();
        graph.operators.remove(&node);
        graph.dependencies.remove(&node);
        Ok(graph)
    }

    /// Replace every occurrence of `old` in dependency lists and sink
    /// dependencies with `new`, preserving position and multiplicity. The
    /// node or source named by `old` is not itself removed.
    pub fn replace_dependency(&self, old: DepRef, new: DepRef) -> FlowResult<Graph> {
        self.check_ref(old)?;
        self.check_ref(new)?;

        // The replacement may not push an estimator into a data position.
        if let Some(new_node) = new.as_node() {
            if self
                .operators
                .get(&new_node)
                .is_some_and(NodeKind::is_estimator)
            {
                for (&node, deps) in &self.dependencies {
                    if deps.contains(&old) {
                        return Err(FlowForgeError::EstimatorAsDataDependency {
                            of: DepRef::Node(node),
                            dep: new_node,
                        });
                    }
                }
            }
        }

        let mut graph = self.clone();
        graph.replace_ref_in_place(old, new);
        Ok(graph)
    }

    fn replace_ref_in_place(&mut self, old: DepRef, new: DepRef) {
        for deps in self.dependencies.values_mut() {
            for dep in deps.iter_mut() {
                if *dep == old {
                    *dep = new;
                }
            }
        }
        for dep in self.sink_dependencies.values_mut() {
            if *dep == old {
                *dep = new;
            }
        }
    }

    // ========== Composition operators ==========

    /// Embed a copy of `other` into this graph with freshly minted ids
    /// throughout. The two subgraphs remain disconnected; the returned
    /// maps translate `other`'s source and sink ids into the result.
    pub fn add_graph(
        &self,
        other: &Graph,
    ) -> (Graph, BTreeMap<SourceId, SourceId>, BTreeMap<SinkId, SinkId>) {
        let (graph, _, source_map, sink_map) = self.add_graph_internal(other);
        let source_map = source_map
            .into_iter()
            .filter(|(old, _)| other.sources.contains(old))
            .collect();
        (graph, source_map, sink_map)
    }

    /// Embedding that also returns the node translation, for internal use
    /// by the splicing operators. The translation covers every id `other`
    /// mentions, including dangling references, so danglingness is
    /// preserved rather than accidentally captured by ids of `self`.
    fn add_graph_internal(
        &self,
        other: &Graph,
    ) -> (
        Graph,
        BTreeMap<NodeId, NodeId>,
        BTreeMap<SourceId, SourceId>,
        BTreeMap<SinkId, SinkId>,
    ) {
        let mut node_ids: BTreeSet<NodeId> = other.operators.keys().copied().collect();
        let mut source_ids: BTreeSet<SourceId> = other.sources.clone();
        for dep in other.all_dep_refs() {
            match dep {
                DepRef::Node(n) if !n.is_sentinel() => {
                    node_ids.insert(n);
                }
                DepRef::Source(s) => {
                    source_ids.insert(s);
                }
                _ => {}
            }
        }
        for kind in other.operators.values() {
            if let Some(fit) = kind.fit_dependency() {
                node_ids.insert(fit);
            }
        }

        let node_base = self.fresh_node_id();
        let source_base = self.fresh_source_id();
        let sink_base = self.fresh_sink_id();

        let node_map: BTreeMap<NodeId, NodeId> = node_ids
            .iter()
            .enumerate()
            .map(|(i, &n)| (n, NodeId(node_base + i as u64)))
            .collect();
        let source_map: BTreeMap<SourceId, SourceId> = source_ids
            .iter()
            .enumerate()
            .map(|(i, &s)| (s, SourceId(source_base + i as u64)))
            .collect();
        let sink_map: BTreeMap<SinkId, SinkId> = other
            .sink_dependencies
            .keys()
            .enumerate()
            .map(|(i, &s)| (s, SinkId(sink_base + i as u64)))
            .collect();

        let remap = |dep: DepRef| -> DepRef {
            match dep {
                DepRef::Node(n) if n.is_sentinel() => dep,
                DepRef::Node(n) => DepRef::Node(node_map[&n]),
                DepRef::Source(s) => DepRef::Source(source_map[&s]),
            }
        };

        let mut graph = self.clone();
        for &source in &other.sources {
            graph.sources.insert(source_map[&source]);
        }
        for (node, kind) in &other.operators {
            let kind = match kind {
                NodeKind::DelegatingTransformer { fit_dep } => NodeKind::DelegatingTransformer {
                    fit_dep: node_map[fit_dep],
                },
                other_kind => other_kind.clone(),
            };
            graph.operators.insert(node_map[node], kind);
        }
        for (node, deps) in &other.dependencies {
            graph
                .dependencies
                .insert(node_map[node], deps.iter().copied().map(remap).collect());
        }
        for (sink, &dep) in &other.sink_dependencies {
            graph.sink_dependencies.insert(sink_map[sink], remap(dep));
        }

        (graph, node_map, source_map, sink_map)
    }

    /// Embed `other` and splice it onto this graph: for each entry
    /// `(source of other, sink of this)` the embedded source is replaced,
    /// wherever it appears as a dependency, by whatever the sink points
    /// at; then the source and the sink are both removed.
    ///
    /// The returned source map covers only the *unspliced* sources of
    /// `other`; the sink map covers every sink of `other`.
    pub fn connect_graph(
        &self,
        other: &Graph,
        splice: &BTreeMap<SourceId, SinkId>,
    ) -> FlowResult<(Graph, BTreeMap<SourceId, SourceId>, BTreeMap<SinkId, SinkId>)> {
        for (&source, &sink) in splice {
            if !other.sources.contains(&source) {
                return Err(FlowForgeError::SpliceContract(format!(
                    "{source} is not a source of the graph being connected"
                )));
            }
            if !self.sink_dependencies.contains_key(&sink) {
                return Err(FlowForgeError::SpliceContract(format!(
                    "{sink} is not a sink of this graph"
                )));
            }
        }

        let (mut graph, _, source_map, sink_map) = self.add_graph_internal(other);

        for (&source, &sink) in splice {
            let embedded = source_map[&source];
            let target = self.sink_dependencies[&sink];
            graph.replace_ref_in_place(DepRef::Source(embedded), target);
            graph.sources.remove(&embedded);
            graph.sink_dependencies.remove(&sink);
        }

        let source_map = source_map
            .into_iter()
            .filter(|(old, _)| other.sources.contains(old) && !splice.contains_key(old))
            .collect();
        Ok((graph, source_map, sink_map))
    }

    /// Remove a set of nodes and splice a replacement subgraph into their
    /// place. This is the primary engine the optimizer layer uses to
    /// substitute subgraphs.
    ///
    /// - `source_splice` must have exactly the sources of `replacement` as
    ///   its key set; its values name surviving nodes/sources of `self`.
    /// - `sink_splice` must have exactly `nodes_to_remove` as its key set;
    ///   its values are sinks of `replacement`.
    ///
    /// Dependencies on a removed node are redirected to what its
    /// replacement sink points at; the replacement's internal references
    /// to its own sources are redirected per `source_splice`.
    pub fn replace_nodes(
        &self,
        nodes_to_remove: &BTreeSet<NodeId>,
        replacement: &Graph,
        source_splice: &BTreeMap<SourceId, DepRef>,
        sink_splice: &BTreeMap<NodeId, SinkId>,
    ) -> FlowResult<Graph> {
        for &node in nodes_to_remove {
            if !self.operators.contains_key(&node) {
                return Err(FlowForgeError::UnknownNode(node));
            }
        }

        let splice_sources: BTreeSet<SourceId> = source_splice.keys().copied().collect();
        if splice_sources != replacement.sources {
            return Err(FlowForgeError::SpliceContract(
                "source splice keys must be exactly the replacement's sources".into(),
            ));
        }
        for (&source, &target) in source_splice {
            self.check_ref(target)
                .map_err(|_| FlowForgeError::SpliceContract(format!(
                    "source splice target {target} for {source} does not exist in this graph"
                )))?;
            if target
                .as_node()
                .is_some_and(|n| nodes_to_remove.contains(&n))
            {
                return Err(FlowForgeError::SpliceContract(format!(
                    "source splice target {target} is being removed"
                )));
            }
        }

        let splice_removed: BTreeSet<NodeId> = sink_splice.keys().copied().collect();
        if &splice_removed != nodes_to_remove {
            return Err(FlowForgeError::SpliceContract(
                "sink splice keys must be exactly the nodes being removed".into(),
            ));
        }
        for (&node, &sink) in sink_splice {
            if !replacement.sink_dependencies.contains_key(&sink) {
                return Err(FlowForgeError::SpliceContract(format!(
                    "sink splice target {sink} for {node} is not a sink of the replacement"
                )));
            }
        }

        let (mut graph, _, source_map, sink_map) = self.add_graph_internal(replacement);

        // Redirect everything that depended on a removed node to the ref
        // its replacement sink points at (after embedding).
        for (&removed, &replacement_sink) in sink_splice {
            let embedded_sink = sink_map[&replacement_sink];
            let target = graph.sink_dependencies[&embedded_sink];
            graph.replace_ref_in_place(DepRef::Node(removed), target);

            let mut fit_target = None;
            for kind in graph.operators.values() {
                if kind.fit_dependency() == Some(removed) {
                    match target.as_node() {
                        Some(t) => fit_target = Some(t),
                        None => {
                            return Err(FlowForgeError::SpliceContract(format!(
                                "fit dependency on {removed} cannot be redirected to {target}"
                            )))
                        }
                    }
                }
            }
            if let Some(t) = fit_target {
                for kind in graph.operators.values_mut() {
                    if kind.fit_dependency() == Some(removed) {
                        *kind = NodeKind::DelegatingTransformer { fit_dep: t };
                    }
                }
            }
        }

        // Wire the replacement's own source references into this graph.
        for (&source, &target) in source_splice {
            let embedded = source_map[&source];
            graph.replace_ref_in_place(DepRef::Source(embedded), target);
            graph.sources.remove(&embedded);
        }

        // Drop the replaced nodes and the replacement's connective sinks.
        for &node in nodes_to_remove {
            graph.operators.remove(&node);
            graph.dependencies.remove(&node);
        }
        for &replacement_sink in sink_splice.values() {
            graph.sink_dependencies.remove(&sink_map[&replacement_sink]);
        }

        Ok(graph)
    }
}
