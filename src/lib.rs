//! FlowForge - ML Pipeline Graph Engine
//!
//! A memoizing execution engine for machine-learning pipelines: an
//! immutable DAG of data sources, transformers, estimators and delegating
//! transformers, a rewrite algebra for pluggable optimizers, and an
//! executor that fits each estimator at most once and caches dataset
//! outputs per input identity.
//!
//! The distributed dataset runtime and the catalog of concrete operators
//! live outside this crate; both are consumed through the contracts in
//! [`dataset`] and [`graph::node`].

#![allow(clippy::type_complexity)] // Complex types are common in ML

pub mod dataset;
pub mod error;
pub mod executor;
pub mod graph;
pub mod logging;
pub mod optimizer;
pub mod pipeline;

pub use dataset::{memory_records, Dataset, Datum, MemoryRecords, Records};
pub use error::{ErrorKind, FlowForgeError, FlowResult, OpError};
pub use executor::{
    DatasetExpression, DatumExpression, Expression, ExecutorCaches, GraphExecutor, LazyInputs,
    TransformerExpression,
};
pub use graph::{
    DepRef, EstimatorOp, Graph, NodeId, NodeKind, OpResult, SinkId, SourceId, TransformOp,
    ValidateOptions,
};
pub use optimizer::{DefaultOptimizer, OptimizerStats, PipelineOptimizer};
pub use pipeline::Pipeline;
