//! A single-process MapReduce (lite) engine.
//!
//! Users describe a job as map, optional combine and reduce functions plus
//! input and output locations, then hand it to an [`standalone::Engine`]
//! that runs map tasks and reduce tasks on a bounded worker pool. Data
//! lives behind the [`storage::Storage`] trait, so jobs run the same way
//! against local disk, memory or an S3-compatible object store.

use bytes::Bytes;
use std::fmt;
use std::hash::Hasher;
use std::sync::Arc;

pub mod cmd;
pub mod codec;
pub mod error;
pub mod format;
pub mod partition;
pub mod standalone;
pub mod storage;
pub mod utils;
pub mod workload;

pub use error::{Error, Result};

/////////////////////////////////////////////////////////////////////////////
// MapReduce application types
/////////////////////////////////////////////////////////////////////////////

/// The output of an application map function.
///
/// There are 2 layers of [`anyhow::Result`]s here. The outer layer
/// accounts for errors that arise while creating the iterator.
/// The inner layer accounts for errors that occur during iteration.
///
/// This accomodates both batch (all keys emitted at once) and lazy
/// (keys only emitted when the iterator is consumed) map operations.
pub type MapOutput = anyhow::Result<Box<dyn Iterator<Item = anyhow::Result<KeyValue>>>>;

/// The values of one key group, in shuffle order.
pub type Values<'a> = Box<dyn Iterator<Item = Bytes> + 'a>;

/// The output of an application reduce function. It may borrow the group's
/// values, so lazy reducers never have to buffer a whole group.
pub type ReduceOutput<'a> = anyhow::Result<Box<dyn Iterator<Item = anyhow::Result<KeyValue>> + 'a>>;

/// A map function takes a key-value pair and returns an iterator that
/// yields new key-value pairs.
pub type MapFn = Arc<dyn Fn(KeyValue) -> MapOutput + Send + Sync>;

/// A combine function folds the values of one key group inside a single
/// map task. The key is kept; only the values are replaced.
pub type CombineFn = Arc<dyn for<'a> Fn(Bytes, Values<'a>) -> anyhow::Result<Vec<Bytes>> + Send + Sync>;

/// A reduce function takes in a key and an iterator over values for that
/// key. It returns the key-value pairs to write to the job output.
pub type ReduceFn = Arc<dyn for<'a> Fn(Bytes, Values<'a>) -> ReduceOutput<'a> + Send + Sync>;

/// A map reduce application.
#[derive(Clone)]
pub struct Workload {
    pub map_fn: MapFn,
    pub combine_fn: Option<CombineFn>,
    pub reduce_fn: ReduceFn,
}

impl Workload {
    /// Build a workload from a map and a reduce function, without combiner.
    pub fn new<M, R>(map_fn: M, reduce_fn: R) -> Self
    where
        M: Fn(KeyValue) -> MapOutput + Send + Sync + 'static,
        R: for<'a> Fn(Bytes, Values<'a>) -> ReduceOutput<'a> + Send + Sync + 'static,
    {
        Self {
            map_fn: Arc::new(map_fn),
            combine_fn: None,
            reduce_fn: Arc::new(reduce_fn),
        }
    }

    /// Attach a combiner that runs on each map task's sorted output.
    pub fn with_combiner<C>(mut self, combine_fn: C) -> Self
    where
        C: for<'a> Fn(Bytes, Values<'a>) -> anyhow::Result<Vec<Bytes>> + Send + Sync + 'static,
    {
        self.combine_fn = Some(Arc::new(combine_fn));
        self
    }
}

impl fmt::Debug for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workload")
            .field("combiner", &self.combine_fn.is_some())
            .finish_non_exhaustive()
    }
}

/////////////////////////////////////////////////////////////////////////////
// Key-value pairs
/////////////////////////////////////////////////////////////////////////////

/// A single key-value pair.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct KeyValue {
    /// The key.
    pub key: Bytes,
    /// The value.
    pub value: Bytes,
}

impl KeyValue {
    /// Construct a new key-value pair from the given key and value.
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Get the key of this key-value pair.
    ///
    /// This method is cheap, since [`Bytes`] are cheaply cloneable.
    #[inline]
    pub fn key(&self) -> Bytes {
        self.key.clone()
    }

    /// Get the value of this key-value pair.
    ///
    /// This method is cheap, since [`Bytes`] are cheaply cloneable.
    #[inline]
    pub fn value(&self) -> Bytes {
        self.value.clone()
    }

    /// Consumes the key-value pair and returns the key.
    #[inline]
    pub fn into_key(self) -> Bytes {
        self.key
    }

    /// Consumes the key-value pair and returns the value.
    #[inline]
    pub fn into_value(self) -> Bytes {
        self.value
    }

    /// Swaps key and value.
    #[inline]
    pub fn inverse(self) -> Self {
        Self {
            key: self.value,
            value: self.key,
        }
    }
}

/// Hashes an intermediate key. Compute a reduce bucket for a given key
/// by calculating `ihash(key) % n_reduce`.
pub fn ihash(key: &[u8]) -> u32 {
    let mut hasher = fnv::FnvHasher::with_key(0);
    hasher.write(key);
    // masked to 31 bits, so the cast is lossless
    (hasher.finish() & 0x7fff_ffff) as u32
}
