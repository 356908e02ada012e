//! Map tasks: one per input split.

use std::sync::Arc;

use anyhow::anyhow;
use bytes::Bytes;
use tracing::{debug, warn};

use crate::codec::RecordWriter;
use crate::error::TaskId;
use crate::format::{InputSplit, SplitData};
use crate::standalone::engine::JobContext;
use crate::standalone::job::Counters;
use crate::standalone::reduce::for_each_group;
use crate::storage::{join, StorageError};
use crate::{Error, KeyValue, Result};

/// Records between two cancellation checks.
const CANCEL_CHECK_RECORDS: u64 = 4096;

#[derive(Debug, Default)]
struct MapStats {
    input: u64,
    output: u64,
    combine_input: u64,
    combine_output: u64,
}

/// Run the user map function over a split and return one encoded, sorted
/// segment per reduce partition.
fn map_split(ctx: &JobContext, data: SplitData) -> anyhow::Result<(Vec<Bytes>, MapStats)> {
    let job = &ctx.job;
    let n = job.num_reduce_tasks();
    let compare = job.compare();
    let map_fn = &job.workload().map_fn;
    let mut stats = MapStats::default();
    let mut buckets: Vec<Vec<KeyValue>> = vec![Vec::new(); n as usize];

    for record in data.records()? {
        let record = record?;
        stats.input += 1;
        if stats.input % CANCEL_CHECK_RECORDS == 0 {
            ctx.ensure_running()?;
        }
        for kv in map_fn(record)? {
            let kv = kv?;
            let partition = job.partitioner().partition_of(&kv.key, n);
            let bucket = buckets
                .get_mut(partition as usize)
                .ok_or_else(|| anyhow!("partitioner returned {partition} for {n} partitions"))?;
            bucket.push(kv);
            stats.output += 1;
        }
    }
    ctx.ensure_running()?;

    let mut segments = Vec::with_capacity(buckets.len());
    for mut bucket in buckets {
        // stable, so equal keys keep map emission order
        bucket.sort_by(|a, b| compare(&a.key, &b.key));
        if let Some(combine_fn) = &job.workload().combine_fn {
            stats.combine_input += bucket.len() as u64;
            let mut combined = Vec::with_capacity(bucket.len());
            for_each_group(bucket.into_iter(), compare, |key, values| {
                for value in combine_fn(key.clone(), values)? {
                    combined.push(KeyValue::new(key.clone(), value));
                }
                Ok(())
            })?;
            stats.combine_output += combined.len() as u64;
            bucket = combined;
        }
        let mut writer = RecordWriter::with_sync_interval(ctx.config.sync_interval);
        for kv in &bucket {
            writer.append(kv)?;
        }
        segments.push(writer.finish());
    }
    Ok((segments, stats))
}

async fn attempt_map(ctx: &Arc<JobContext>, split: &InputSplit, task: &TaskId, dir: &str) -> Result<Vec<String>> {
    let data = SplitData::fetch(ctx.storage.as_ref(), split).await?;

    let worker_ctx = Arc::clone(ctx);
    let (segments, stats) = tokio::task::spawn_blocking(move || map_split(&worker_ctx, data))
        .await
        .map_err(|err| Error::task(task.clone(), err))?
        .map_err(|err| JobContext::task_error(task, err))?;

    let mut names = Vec::with_capacity(segments.len());
    for (partition, segment) in segments.into_iter().enumerate() {
        let name = join(dir, &format!("part-{partition:05}"));
        ctx.scratch.put(&name, segment).await?;
        names.push(name);
    }

    Counters::add(&ctx.counters.map_input_records, stats.input);
    Counters::add(&ctx.counters.map_output_records, stats.output);
    Counters::add(&ctx.counters.combine_input_records, stats.combine_input);
    Counters::add(&ctx.counters.combine_output_records, stats.combine_output);
    Ok(names)
}

/// Run one attempt of the map task for `split`. Returns the names of the
/// intermediate segments, indexed by partition. A failed attempt leaves
/// nothing behind in scratch.
pub(crate) async fn run_map_task(ctx: Arc<JobContext>, split: InputSplit, attempt: u32) -> Result<Vec<String>> {
    let task = TaskId::Map {
        index: split.index,
        split: split.to_string(),
    };
    let dir = join(
        &ctx.scratch_dir(),
        &format!("map-{:05}/attempt-{attempt}", split.index),
    );
    debug!(job = %ctx.job.name(), %task, attempt, "map task started");

    let result = attempt_map(&ctx, &split, &task, &dir).await;
    match &result {
        Ok(names) => debug!(job = %ctx.job.name(), %task, segments = names.len(), "map task committed"),
        Err(_) => match ctx.scratch.delete(&dir, true).await {
            Ok(()) | Err(StorageError::NotFound(_)) => {}
            Err(err) => warn!(job = %ctx.job.name(), %task, "discarding failed attempt: {err}"),
        },
    }
    result
}
