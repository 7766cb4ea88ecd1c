//! Lazy, force-once value carriers between the executor and operators.
//!
//! An [`Expression`] wraps a thunk: the first `force` runs it and stores
//! the result, later calls return the stored value without recomputation.
//! [`LazyInputs`] strings one expression per input position into the
//! one-shot sequence handed to operator code, pulled in dependency order;
//! positions never pulled are never evaluated.

use std::sync::Arc;
use std::sync::Mutex;

use once_cell::sync::OnceCell;

use crate::dataset::{Dataset, Datum};
use crate::error::{FlowForgeError, FlowResult};
use crate::graph::node::TransformOp;

type Thunk<'a, T> = Box<dyn FnOnce() -> FlowResult<T> + 'a>;

/// A force-once lazy value.
pub struct Expression<'a, T> {
    thunk: Mutex<Option<Thunk<'a, T>>>,
    value: OnceCell<T>,
}

impl<'a, T: Clone> Expression<'a, T> {
    /// Wrap a thunk. Nothing runs until [`force`](Self::force).
    pub fn new(thunk: impl FnOnce() -> FlowResult<T> + 'a) -> Self {
        Expression {
            thunk: Mutex::new(Some(Box::new(thunk))),
            value: OnceCell::new(),
        }
    }

    /// An expression that is already forced.
    pub fn ready(value: T) -> Self {
        let cell = OnceCell::new();
        let _ = cell.set(value);
        Expression {
            thunk: Mutex::new(None),
            value: cell,
        }
    }

    /// Force the expression: run the thunk on first call, return the
    /// stored value afterwards.
    ///
    /// A failed thunk is not retried; forcing again after a failure is an
    /// internal error.
    pub fn force(&self) -> FlowResult<T> {
        if let Some(value) = self.value.get() {
            return Ok(value.clone());
        }
        let thunk = self
            .thunk
            .lock()?
            .take()
            .ok_or_else(|| FlowForgeError::Internal("expression forced again after failure".into()))?;
        let value = thunk()?;
        Ok(self.value.get_or_init(|| value).clone())
    }

    /// Whether the value has been computed.
    pub fn is_forced(&self) -> bool {
        self.value.get().is_some()
    }
}

/// Lazy carrier of a single-item value.
pub type DatumExpression<'a> = Expression<'a, Datum>;

/// Lazy carrier of a dataset handle.
pub type DatasetExpression<'a> = Expression<'a, Dataset>;

/// Lazy carrier of a fitted transformer.
pub type TransformerExpression<'a> = Expression<'a, Arc<dyn TransformOp>>;

/// One-shot operator input sequence.
///
/// Yields one value per dependency, in dependency order. Each pull forces
/// the corresponding sub-evaluation; an operator that stops early never
/// pays for the inputs it ignored.
pub struct LazyInputs<'a, T> {
    exprs: std::vec::IntoIter<Expression<'a, T>>,
}

impl<'a, T: Clone> LazyInputs<'a, T> {
    /// Build from one expression per input position.
    pub fn new(exprs: Vec<Expression<'a, T>>) -> Self {
        LazyInputs {
            exprs: exprs.into_iter(),
        }
    }

    /// Number of inputs not yet pulled.
    pub fn remaining(&self) -> usize {
        self.exprs.len()
    }

    /// Force every remaining input, in order.
    pub fn force_all(self) -> FlowResult<Vec<T>> {
        self.collect()
    }

    /// Force the sole input; error if the arity differs.
    pub fn into_single(mut self) -> FlowResult<T> {
        if self.remaining() != 1 {
            return Err(FlowForgeError::Internal(format!(
                "operator expected exactly one input, got {}",
                self.remaining()
            )));
        }
        self.next().expect("arity checked above")
    }
}

impl<'a, T: Clone> Iterator for LazyInputs<'a, T> {
    type Item = FlowResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.exprs.next().map(|e| e.force())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.exprs.size_hint()
    }
}

impl<'a, T: Clone> ExactSizeIterator for LazyInputs<'a, T> {}
