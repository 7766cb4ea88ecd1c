//! Node kinds and the operator contracts they carry.
//!
//! Operators are opaque black boxes supplied by the catalog layer; the
//! engine only requires referential transparency (same input identities,
//! equivalent outputs) so that memoization is sound. Inputs arrive as
//! [`LazyInputs`]: a one-shot sequence in dependency order where each pull
//! forces the corresponding sub-evaluation, so unused inputs cost nothing.

use std::fmt;
use std::sync::Arc;

use crate::dataset::{Dataset, Datum};
use crate::error::OpError;
use crate::executor::LazyInputs;
use crate::graph::id::NodeId;

/// Result type operator code returns to the engine.
pub type OpResult<T> = std::result::Result<T, OpError>;

/// A pure transformer: one implementation per input modality.
pub trait TransformOp: Send + Sync {
    /// Label used in logs and `Debug` output.
    fn label(&self) -> &str {
        "transform"
    }

    /// Map single-item inputs to a single-item output.
    fn apply(&self, inputs: LazyInputs<'_, Datum>) -> OpResult<Datum>;

    /// Map dataset inputs to a dataset output.
    fn apply_dataset(&self, inputs: LazyInputs<'_, Dataset>) -> OpResult<Dataset>;
}

/// An estimator: consumes input datasets, produces a fitted transformer.
///
/// Estimators cannot be evaluated for data directly; the executor fits
/// them at most once per pipeline and routes data through the result.
pub trait EstimatorOp: Send + Sync {
    /// Label used in logs and `Debug` output.
    fn label(&self) -> &str {
        "estimator"
    }

    /// Fit on the given datasets, producing the transformer to delegate to.
    fn fit(&self, inputs: LazyInputs<'_, Dataset>) -> OpResult<Arc<dyn TransformOp>>;
}

/// The kind of a graph node, with its per-variant payload.
#[derive(Clone)]
pub enum NodeKind {
    /// Wraps a constant dataset; supplies values without depending on
    /// anything.
    Source(Dataset),

    /// A pure function from its ordered inputs to one output.
    Transformer(Arc<dyn TransformOp>),

    /// Consumes datasets to produce a transformer; never produces data.
    Estimator(Arc<dyn EstimatorOp>),

    /// A transformer whose behavior is the fit result of exactly one
    /// estimator node. Data dependencies live in the graph's dependency
    /// table; the fit dependency lives here.
    DelegatingTransformer {
        /// The estimator node whose fit result supplies the behavior.
        fit_dep: NodeId,
    },
}

impl NodeKind {
    /// Whether this node wraps a constant dataset.
    pub fn is_source(&self) -> bool {
        matches!(self, NodeKind::Source(_))
    }

    /// Whether this node is an estimator.
    pub fn is_estimator(&self) -> bool {
        matches!(self, NodeKind::Estimator(_))
    }

    /// The fit dependency, for delegating transformers.
    pub fn fit_dependency(&self) -> Option<NodeId> {
        match self {
            NodeKind::DelegatingTransformer { fit_dep } => Some(*fit_dep),
            _ => None,
        }
    }

    /// Label for logs and `Debug` output.
    pub fn label(&self) -> &str {
        match self {
            NodeKind::Source(_) => "source",
            NodeKind::Transformer(op) => op.label(),
            NodeKind::Estimator(op) => op.label(),
            NodeKind::DelegatingTransformer { .. } => "delegating",
        }
    }
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Source(_) => write!(f, "Source"),
            NodeKind::Transformer(op) => write!(f, "Transformer({})", op.label()),
            NodeKind::Estimator(op) => write!(f, "Estimator({})", op.label()),
            NodeKind::DelegatingTransformer { fit_dep } => {
                write!(f, "DelegatingTransformer(fit_dep: {fit_dep})")
            }
        }
    }
}

// Equality is identity of the carried payload: graphs are compared for
// "same value", and operator objects have no structural equality.
impl PartialEq for NodeKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (NodeKind::Source(a), NodeKind::Source(b)) => Arc::ptr_eq(a, b),
            (NodeKind::Transformer(a), NodeKind::Transformer(b)) => Arc::ptr_eq(a, b),
            (NodeKind::Estimator(a), NodeKind::Estimator(b)) => Arc::ptr_eq(a, b),
            (
                NodeKind::DelegatingTransformer { fit_dep: a },
                NodeKind::DelegatingTransformer { fit_dep: b },
            ) => a == b,
            _ => false,
        }
    }
}

impl Eq for NodeKind {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::MemoryRecords;

    struct Noop;

    impl TransformOp for Noop {
        fn label(&self) -> &str {
            "noop"
        }

        fn apply(&self, mut inputs: LazyInputs<'_, Datum>) -> OpResult<Datum> {
            inputs.next().expect("one input").map_err(Into::into)
        }

        fn apply_dataset(&self, mut inputs: LazyInputs<'_, Dataset>) -> OpResult<Dataset> {
            inputs.next().expect("one input").map_err(Into::into)
        }
    }

    #[test]
    fn test_kind_predicates() {
        let ds = MemoryRecords::dataset(vec![1, 2]);
        let source = NodeKind::Source(ds);
        let transform = NodeKind::Transformer(Arc::new(Noop));
        let delegating = NodeKind::DelegatingTransformer { fit_dep: NodeId(4) };

        assert!(source.is_source());
        assert!(!transform.is_source());
        assert!(!transform.is_estimator());
        assert_eq!(delegating.fit_dependency(), Some(NodeId(4)));
        assert_eq!(transform.fit_dependency(), None);
    }

    #[test]
    fn test_equality_is_identity() {
        let op = Arc::new(Noop);
        let a = NodeKind::Transformer(op.clone());
        let b = NodeKind::Transformer(op);
        let c = NodeKind::Transformer(Arc::new(Noop));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(format!("{a:?}"), "Transformer(noop)");
    }
}
