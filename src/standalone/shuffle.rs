//! Routes map output to reduce tasks and merges it back into one sorted
//! stream per partition.

use std::cmp::Ordering;

use itertools::Itertools;

use crate::standalone::compare::CompareFn;
use crate::KeyValue;

/// Per partition, the intermediate objects of every map task in split
/// order. `map_outputs[split][partition]` names one segment.
pub fn plan(map_outputs: &[Vec<String>], num_partitions: u32) -> Vec<Vec<String>> {
    (0..num_partitions as usize)
        .map(|partition| {
            map_outputs
                .iter()
                .filter_map(|parts| parts.get(partition).cloned())
                .collect()
        })
        .collect()
}

/// K-way merge of segments that are each sorted by `compare`. Records with
/// equal keys come out in segment order, and in their original order
/// within a segment.
pub fn merge(segments: Vec<Vec<KeyValue>>, compare: CompareFn) -> impl Iterator<Item = KeyValue> {
    segments
        .into_iter()
        .enumerate()
        .map(|(segment, records)| records.into_iter().map(move |kv| (segment, kv)))
        .kmerge_by(
            move |a: &(usize, KeyValue), b: &(usize, KeyValue)| match compare(&a.1.key, &b.1.key) {
                Ordering::Equal => a.0 < b.0,
                ord => ord == Ordering::Less,
            },
        )
        .map(|(_, kv)| kv)
}
