//! Counts the lines of the input.

use bytes::Bytes;

use crate::format::{OutputFormat, Schema};
use crate::standalone::{Job, JobBuilder};
use crate::utils::u64_to_bytes;
use crate::workload::common::{long_sum_combine, long_sum_reduce};
use crate::*;

/// The single key every line is counted under.
pub const LINES_KEY: &str = "lines";

pub fn map(_kv: KeyValue) -> MapOutput {
    Ok(Box::new(std::iter::once(Ok(KeyValue::new(
        Bytes::from_static(LINES_KEY.as_bytes()),
        u64_to_bytes(1),
    )))))
}

pub fn workload() -> Workload {
    Workload::new(map, long_sum_reduce).with_combiner(long_sum_combine)
}

/// One reduce task writing a single `lines<TAB>total` line.
pub fn job() -> JobBuilder {
    Job::builder("line-count")
        .workload(workload())
        .num_reduce_tasks(1)
        .output_format(OutputFormat::Text)
        .output_schema(Schema::COUNTS)
}
