//! Unified error handling for FlowForge
//!
//! Every fallible operation in the crate returns [`FlowForgeError`]. The
//! variants are specific, but each maps onto one of a small set of kinds
//! via [`FlowForgeError::kind`]:
//!
//! - Invalid argument: a rewrite or constructor was called with ids that do
//!   not exist or in a way that would break the graph invariants. Raised
//!   eagerly; the input graph is unchanged.
//! - Not found: an accessor was called with an id not in the graph.
//! - Dag: an execution-time structural violation (fitting a non-estimator,
//!   taking data from an estimator, ...). These indicate bugs in the layer
//!   that built the graph and are fatal for the pipeline instance.
//! - Operator: an error propagated unchanged from operator code.
//! - Internal: a bug in this crate (poisoned lock, consumed expression).

use crate::graph::id::{DepRef, NodeId, SinkId, SourceId};
use std::fmt;

/// Error type operator implementations may raise.
///
/// The executor adds no recovery; operator errors propagate unchanged to
/// the caller of `apply` / `apply_dataset`.
pub type OpError = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for FlowForge
#[derive(Debug, thiserror::Error)]
pub enum FlowForgeError {
    // ========== Accessor Errors ==========
    /// Node id not present in the graph
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// Source id not present in the graph
    #[error("source not found: {0}")]
    SourceNotFound(SourceId),

    /// Sink id not present in the graph
    #[error("sink not found: {0}")]
    SinkNotFound(SinkId),

    // ========== Rewrite / Construction Errors ==========
    /// A rewrite named a node the graph does not contain
    #[error("rewrite references unknown node: {0}")]
    UnknownNode(NodeId),

    /// A rewrite named a source the graph does not contain
    #[error("rewrite references unknown source: {0}")]
    UnknownSource(SourceId),

    /// A rewrite named a sink the graph does not contain
    #[error("rewrite references unknown sink: {0}")]
    UnknownSink(SinkId),

    /// A dependency reference does not resolve to a node or source
    #[error("unresolved dependency reference: {0}")]
    UnresolvedDependency(DepRef),

    /// The dependency table and the operator table disagree on node ids
    #[error("dependency table out of sync with operators for {0}")]
    DependencyTableMismatch(NodeId),

    /// Source nodes supply values and take no dependencies
    #[error("source node {0} must have no dependencies")]
    SourceWithDependencies(NodeId),

    /// Estimators need at least one input dataset to fit on
    #[error("estimator node {0} must have at least one dependency")]
    EstimatorWithoutDependencies(NodeId),

    /// Transformers need at least one input to transform
    #[error("transformer node {0} must have at least one dependency")]
    TransformerWithoutDependencies(NodeId),

    /// A delegating transformer's fit dependency must name an estimator
    #[error("fit dependency of {node} does not name an estimator: {fit_dep}")]
    FitDependencyNotEstimator {
        /// The delegating transformer.
        node: NodeId,
        /// What its fit dependency actually names.
        fit_dep: NodeId,
    },

    /// Estimators do not produce data and may not appear as data inputs
    #[error("estimator {dep} may not be a data dependency of {of}")]
    EstimatorAsDataDependency {
        /// The node or sink holding the illegal dependency.
        of: DepRef,
        /// The estimator being depended on.
        dep: NodeId,
    },

    /// The graph contains a dependency cycle
    #[error("dependency cycle detected through {0}")]
    CycleDetected(NodeId),

    /// A splice mapping handed to a composition operator is malformed
    #[error("splice contract violated: {0}")]
    SpliceContract(String),

    // ========== Execution Errors ==========
    /// `fit` was requested on a node that is not an estimator
    #[error("cannot fit non-estimator node: {0}")]
    FitOnNonEstimator(NodeId),

    /// Data was requested from an estimator node
    #[error("cannot take data from estimator node: {0}")]
    DataFromEstimator(NodeId),

    /// A single-item result was requested from a constant dataset node
    #[error("cannot take a single-item result from source node: {0}")]
    DatumFromSource(NodeId),

    /// Execution reached a graph source with no dataset bound to it
    #[error("source {0} has no bound dataset; replace it with a source node first")]
    UnboundSource(SourceId),

    /// The external-input sentinel was evaluated without a pipeline input
    #[error("graph requires a pipeline input but none was supplied")]
    MissingPipelineInput,

    // ========== Operator Errors ==========
    /// Error propagated unchanged from operator code
    #[error("operator error: {0}")]
    Operator(#[source] OpError),

    // ========== Internal Errors ==========
    /// Internal lock poisoned (indicates a bug or unsynchronized sharing)
    #[error("internal lock poisoned: {0}")]
    LockPoisoned(String),

    /// Internal error (indicates a bug)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Error kind for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// API misuse in a rewrite or constructor
    InvalidArgument,
    /// Accessor lookup on a missing id
    NotFound,
    /// Execution-time structural violation
    Dag,
    /// Error raised by operator code
    Operator,
    /// Bug in this crate
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::InvalidArgument => write!(f, "InvalidArgument"),
            ErrorKind::NotFound => write!(f, "NotFound"),
            ErrorKind::Dag => write!(f, "Dag"),
            ErrorKind::Operator => write!(f, "Operator"),
            ErrorKind::Internal => write!(f, "Internal"),
        }
    }
}

impl FlowForgeError {
    /// Categorize the error for handling decisions
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowForgeError::NodeNotFound(_)
            | FlowForgeError::SourceNotFound(_)
            | FlowForgeError::SinkNotFound(_) => ErrorKind::NotFound,

            FlowForgeError::UnknownNode(_)
            | FlowForgeError::UnknownSource(_)
            | FlowForgeError::UnknownSink(_)
            | FlowForgeError::UnresolvedDependency(_)
            | FlowForgeError::DependencyTableMismatch(_)
            | FlowForgeError::SourceWithDependencies(_)
            | FlowForgeError::EstimatorWithoutDependencies(_)
            | FlowForgeError::TransformerWithoutDependencies(_)
            | FlowForgeError::FitDependencyNotEstimator { .. }
            | FlowForgeError::EstimatorAsDataDependency { .. }
            | FlowForgeError::CycleDetected(_)
            | FlowForgeError::SpliceContract(_) => ErrorKind::InvalidArgument,

            FlowForgeError::FitOnNonEstimator(_)
            | FlowForgeError::DataFromEstimator(_)
            | FlowForgeError::DatumFromSource(_)
            | FlowForgeError::UnboundSource(_)
            | FlowForgeError::MissingPipelineInput => ErrorKind::Dag,

            FlowForgeError::Operator(_) => ErrorKind::Operator,

            FlowForgeError::LockPoisoned(_) | FlowForgeError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if this error reports API misuse by the rewriting layer
    pub fn is_invalid_argument(&self) -> bool {
        self.kind() == ErrorKind::InvalidArgument
    }

    /// Check if this error reports a lookup on a missing id
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Check if this error reports execution-time structural corruption
    pub fn is_dag_error(&self) -> bool {
        self.kind() == ErrorKind::Dag
    }

    /// Wrap an operator error, unwrapping engine errors that merely passed
    /// through operator code (forced lazy inputs re-raise them unchanged).
    pub(crate) fn from_op_error(err: OpError) -> FlowForgeError {
        match err.downcast::<FlowForgeError>() {
            Ok(engine) => *engine,
            Err(other) => FlowForgeError::Operator(other),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for FlowForgeError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        FlowForgeError::LockPoisoned(err.to_string())
    }
}

/// Helper type alias for Results using FlowForgeError
pub type FlowResult<T> = std::result::Result<T, FlowForgeError>;
