//! A MapReduce-compatible implementation of word count.
//!

use bytes::{BufMut, BytesMut};

use crate::format::{OutputFormat, Schema};
use crate::standalone::{Job, JobBuilder};
use crate::workload::common::{long_sum_combine, long_sum_reduce};
use crate::*;

/// Emits `(word, 1)` for every lowercased alphabetic word of the record's
/// value.
pub fn map(kv: KeyValue) -> MapOutput {
    let s = String::from_utf8(kv.value.as_ref().into())?;
    let words = s
        .split(|c: char| !c.is_alphabetic())
        .filter(|s| !s.is_empty())
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>();

    let mut key_buf = BytesMut::new();
    let mut value_buf = BytesMut::with_capacity(words.len() * 8);

    let iter = words.into_iter().map(move |word| {
        key_buf.put_slice(word.as_bytes());
        value_buf.put_u64(1);

        let key = key_buf.split().freeze();
        let value = value_buf.split().freeze();

        Ok(KeyValue { key, value })
    });
    Ok(Box::new(iter))
}

/// Word count without a combiner.
pub fn workload() -> Workload {
    Workload::new(map, long_sum_reduce)
}

/// Word count with a combiner, writing `word<TAB>count` lines.
pub fn job(reducers: u32) -> JobBuilder {
    Job::builder("wc")
        .workload(workload().with_combiner(long_sum_combine))
        .num_reduce_tasks(reducers)
        .output_format(OutputFormat::Text)
        .output_schema(Schema::COUNTS)
}
