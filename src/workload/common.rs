//! Building blocks shared by several workloads.

use anyhow::Result;
use bytes::Bytes;

use crate::utils::{u64_from_bytes, u64_to_bytes};
use crate::*;

fn sum(values: Values<'_>) -> Result<u64> {
    values.map(|value| u64_from_bytes(&value)).sum()
}

/// Combiner that adds up u64 counts.
pub fn long_sum_combine(_key: Bytes, values: Values<'_>) -> Result<Vec<Bytes>> {
    Ok(vec![u64_to_bytes(sum(values)?)])
}

/// Reducer that adds up u64 counts into one `(key, total)` record.
pub fn long_sum_reduce<'a>(key: Bytes, values: Values<'a>) -> ReduceOutput<'a> {
    let total = sum(values)?;
    Ok(Box::new(std::iter::once(Ok(KeyValue::new(
        key,
        u64_to_bytes(total),
    )))))
}

/// Swaps key and value.
pub fn inverse_map(kv: KeyValue) -> MapOutput {
    Ok(Box::new(std::iter::once(Ok(kv.inverse()))))
}

pub fn identity_map(kv: KeyValue) -> MapOutput {
    Ok(Box::new(std::iter::once(Ok(kv))))
}

/// Writes every value of the group under the group's key.
pub fn identity_reduce<'a>(key: Bytes, values: Values<'a>) -> ReduceOutput<'a> {
    Ok(Box::new(
        values.map(move |value| Ok(KeyValue::new(key.clone(), value))),
    ))
}
