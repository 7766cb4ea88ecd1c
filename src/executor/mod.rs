//! Graph execution.
//!
//! The executor walks a graph from a requested node toward its inputs,
//! dispatching on node kind and memoizing along the way:
//!
//! - fitted transformers, once per estimator node per pipeline;
//! - dataset outputs, once per `(node, input identity)` pair.
//!
//! Single-item evaluation shares the fit cache but is never memoized on
//! its inputs. Operator inputs are delivered lazily, in dependency order,
//! so sub-evaluations an operator ignores are never run.

pub mod executor;
pub mod expression;

pub use executor::{ExecutorCaches, GraphExecutor};
pub use expression::{
    DatasetExpression, DatumExpression, Expression, LazyInputs, TransformerExpression,
};
