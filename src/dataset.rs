//! Dataset and datum carriers at the engine boundary.
//!
//! The engine never looks inside the data it moves. Datasets are opaque
//! handles supplied by an external distributed runtime ([`Records`]);
//! single-item values are untyped [`Datum`]s that callers narrow back to
//! their concrete type at the pipeline boundary.
//!
//! Cache keys for datasets are *identities* (the pointer of the shared
//! handle), not structural hashes: two equal collections presented as
//! separate handles are each computed once.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Contract for the external distributed-dataset runtime: a lazy,
/// partitioned, immutable collection of records.
///
/// The engine only stores, forwards and identity-compares these handles;
/// forcing the underlying collection (possibly cluster work) is entirely
/// the runtime's business.
pub trait Records: Any + Send + Sync {
    /// Downcast support for operators that know the concrete runtime.
    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to a dataset.
pub type Dataset = Arc<dyn Records>;

/// Identity key of a dataset handle, used by the executor's data cache.
#[inline]
pub(crate) fn dataset_key(ds: &Dataset) -> usize {
    Arc::as_ptr(ds) as *const () as usize
}

/// An untyped single-item value flowing through a pipeline.
///
/// Cloning is cheap (shared handle). The pipeline façade returns `Datum`s;
/// callers narrow with [`Datum::downcast`].
#[derive(Clone)]
pub struct Datum(Arc<dyn Any + Send + Sync>);

impl Datum {
    /// Wrap a concrete value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Datum(Arc::new(value))
    }

    /// Borrow the value as `T`, if that is what it is.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Whether the wrapped value is a `T`.
    pub fn is<T: Any + Send + Sync>(&self) -> bool {
        self.0.is::<T>()
    }
}

impl fmt::Debug for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Datum(..)")
    }
}

/// Host-only in-memory dataset.
///
/// A stand-in for the real distributed runtime, for unit tests and for
/// downstream crates testing operators without a cluster. Holds its
/// records eagerly; "lazy" and "partitioned" collapse to a plain vector.
#[derive(Debug, Clone)]
pub struct MemoryRecords<T> {
    records: Vec<T>,
}

impl<T: Send + Sync + 'static> MemoryRecords<T> {
    /// Build a dataset handle over the given records.
    pub fn dataset(records: Vec<T>) -> Dataset {
        Arc::new(MemoryRecords { records })
    }

    /// The backing records.
    pub fn records(&self) -> &[T] {
        &self.records
    }
}

impl<T: Send + Sync + 'static> Records for MemoryRecords<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Borrow the records of an in-memory dataset, if `ds` is one over `T`.
pub fn memory_records<T: Send + Sync + 'static>(ds: &Dataset) -> Option<&[T]> {
    ds.as_any()
        .downcast_ref::<MemoryRecords<T>>()
        .map(MemoryRecords::records)
}
