//! Routing of intermediate keys to reduce partitions.

use std::fmt;

use crate::ihash;

/// Maps a key to a reduce partition. Implementations must be pure: the
/// same key and partition count always give the same partition.
///
/// Keys the job's comparator calls equal must land in the same partition,
/// or their group is reduced once per partition. [`HashPartitioner`] hashes
/// raw bytes, so it only agrees with bytewise comparators.
pub trait Partitioner: Send + Sync + fmt::Debug {
    /// A partition in `[0, num_partitions)`. `num_partitions` is at least 1.
    fn partition_of(&self, key: &[u8], num_partitions: u32) -> u32;
}

/// `ihash(key) % n`.
#[derive(Clone, Copy, Debug, Default)]
pub struct HashPartitioner;

impl Partitioner for HashPartitioner {
    #[inline]
    fn partition_of(&self, key: &[u8], num_partitions: u32) -> u32 {
        match num_partitions {
            0 | 1 => 0,
            n => ihash(key) % n,
        }
    }
}
