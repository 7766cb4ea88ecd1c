//! Pipeline graph data model.
//!
//! This module provides the structural layer of the engine:
//!
//! - **`id`**: disjoint identifier spaces for nodes, sources and sinks.
//! - **`node`**: the four node kinds and the operator contracts they
//!   carry (transform, estimate, delegate).
//! - **`graph`**: the immutable [`Graph`] value: accessors, mutating
//!   operators and the composition/splicing algebra optimizers rewrite
//!   with.
//!
//! Graphs are plain values: rewrites never share state, and ids minted by
//! a rewrite never collide with ids that existed before it.

pub mod graph;
pub mod id;
pub mod node;

pub use graph::{Graph, ValidateOptions};
pub use id::{DepRef, NodeId, SinkId, SourceId};
pub use node::{EstimatorOp, NodeKind, OpResult, TransformOp};
