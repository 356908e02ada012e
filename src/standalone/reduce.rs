//! Reduce tasks, and the grouping shared with the map-side combiner.

use std::cmp::Ordering;
use std::iter::Peekable;
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use tracing::debug;

use crate::codec;
use crate::error::TaskId;
use crate::format::RecordSink;
use crate::standalone::compare::CompareFn;
use crate::standalone::engine::JobContext;
use crate::standalone::job::Counters;
use crate::standalone::shuffle;
use crate::storage::{self, join};
use crate::{Error, KeyValue, Result, Values};

/// Groups between two cancellation checks.
const CANCEL_CHECK_GROUPS: u64 = 1024;

/// Name of the output object written by reduce task `partition`.
pub fn part_name(output: &str, partition: u32) -> String {
    join(output, &format!("mr-out-{partition:05}"))
}

/// The values of one key group, pulled lazily from the sorted stream.
struct Group<'a, I: Iterator<Item = KeyValue>> {
    first: Option<Bytes>,
    key: &'a [u8],
    rest: &'a mut Peekable<I>,
    compare: CompareFn,
}

impl<'a, I: Iterator<Item = KeyValue>> Iterator for Group<'a, I> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        if let Some(value) = self.first.take() {
            return Some(value);
        }
        let (key, compare) = (self.key, self.compare);
        self.rest
            .next_if(|kv| compare(&kv.key, key) == Ordering::Equal)
            .map(KeyValue::into_value)
    }
}

/// Call `f` once per run of records whose keys compare equal. The key
/// passed is the first key of the run. Values `f` leaves unread are
/// skipped. Returns the number of groups.
pub fn for_each_group<I, F>(records: I, compare: CompareFn, mut f: F) -> anyhow::Result<u64>
where
    I: Iterator<Item = KeyValue>,
    F: for<'v> FnMut(Bytes, Values<'v>) -> anyhow::Result<()>,
{
    let mut records = records.peekable();
    let mut groups = 0;
    while let Some(KeyValue { key, value }) = records.next() {
        groups += 1;
        let group = Group {
            first: Some(value),
            key: &key,
            rest: &mut records,
            compare,
        };
        f(key.clone(), Box::new(group))?;
        while records
            .next_if(|kv| compare(&kv.key, &key) == Ordering::Equal)
            .is_some()
        {}
    }
    Ok(groups)
}

#[derive(Debug, Default)]
struct ReduceStats {
    records: u64,
    groups: u64,
    output: u64,
}

fn reduce_partition(ctx: &JobContext, segments: Vec<Bytes>) -> anyhow::Result<(Bytes, ReduceStats)> {
    let job = &ctx.job;
    let mut stats = ReduceStats::default();
    let mut decoded = Vec::with_capacity(segments.len());
    for (i, data) in segments.into_iter().enumerate() {
        let records = codec::decode(data).with_context(|| format!("corrupt map segment {i}"))?;
        stats.records += records.len() as u64;
        decoded.push(records);
    }

    let reduce_fn = &job.workload().reduce_fn;
    let mut sink = RecordSink::new(job.output_format(), job.output_schema(), ctx.config.sync_interval);
    let mut output = 0;
    let mut seen = 0;
    stats.groups = for_each_group(shuffle::merge(decoded, job.compare()), job.compare(), |key, values| {
        seen += 1;
        if seen % CANCEL_CHECK_GROUPS == 0 {
            ctx.ensure_running()?;
        }
        for kv in reduce_fn(key, values)? {
            sink.append(kv?)?;
            output += 1;
        }
        Ok(())
    })?;
    stats.output = output;
    Ok((sink.finish()?, stats))
}

/// Run one attempt of reduce task `partition` over its map segments and
/// write the partition's output part. Returns the part's name.
pub(crate) async fn run_reduce_task(
    ctx: Arc<JobContext>,
    partition: u32,
    segments: Vec<String>,
    attempt: u32,
) -> Result<String> {
    let task = TaskId::Reduce { partition };
    debug!(job = %ctx.job.name(), %task, attempt, segments = segments.len(), "reduce task started");

    let mut data = Vec::with_capacity(segments.len());
    for name in &segments {
        data.push(ctx.scratch.open(name).await?);
    }

    let worker_ctx = Arc::clone(&ctx);
    let (part, stats) = tokio::task::spawn_blocking(move || reduce_partition(&worker_ctx, data))
        .await
        .map_err(|err| Error::task(task.clone(), err))?
        .map_err(|err| JobContext::task_error(&task, err))?;

    let name = part_name(ctx.job.output(), partition);
    let mut writer = storage::create(&ctx.storage, &name);
    writer.put_slice(&part);
    let written = writer.commit().await?;

    Counters::add(&ctx.counters.reduce_input_records, stats.records);
    Counters::add(&ctx.counters.reduce_input_groups, stats.groups);
    Counters::add(&ctx.counters.reduce_output_records, stats.output);
    debug!(job = %ctx.job.name(), %task, bytes = written, records = stats.output, "reduce task committed");
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standalone::compare::ascending;

    fn ignore_case(a: &[u8], b: &[u8]) -> Ordering {
        a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase())
    }

    fn records(pairs: &[(&str, &str)]) -> Vec<KeyValue> {
        pairs
            .iter()
            .map(|(k, v)| KeyValue::new(k.to_string(), v.to_string()))
            .collect()
    }

    fn collect_groups(records: Vec<KeyValue>, compare: CompareFn, take: usize) -> Vec<(String, Vec<String>)> {
        let mut out = Vec::new();
        let groups = for_each_group(records.into_iter(), compare, |key, values| {
            let values = values
                .take(take)
                .map(|v| String::from_utf8(v.to_vec()).unwrap())
                .collect();
            out.push((String::from_utf8(key.to_vec()).unwrap(), values));
            Ok(())
        })
        .unwrap();
        assert_eq!(groups as usize, out.len());
        out
    }

    #[test]
    fn groups_runs_of_equal_keys() {
        let input = records(&[("a", "1"), ("a", "2"), ("b", "3"), ("c", "4"), ("c", "5")]);
        assert_eq!(
            collect_groups(input, ascending, usize::MAX),
            vec![
                ("a".to_string(), vec!["1".to_string(), "2".to_string()]),
                ("b".to_string(), vec!["3".to_string()]),
                ("c".to_string(), vec!["4".to_string(), "5".to_string()]),
            ]
        );
    }

    #[test]
    fn unread_values_are_skipped() {
        let input = records(&[("a", "1"), ("a", "2"), ("a", "3"), ("b", "4")]);
        let groups = collect_groups(input, ascending, 1);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1], ("b".to_string(), vec!["4".to_string()]));
    }

    #[test]
    fn equality_comes_from_the_comparator() {
        let input = records(&[("The", "1"), ("the", "2"), ("tHe", "3")]);
        let groups = collect_groups(input, ignore_case, usize::MAX);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].0, "The");
        assert_eq!(groups[0].1.len(), 3);
    }

    #[test]
    fn errors_stop_the_scan() {
        let input = records(&[("a", "1"), ("b", "2")]);
        let mut calls = 0;
        let result = for_each_group(input.into_iter(), ascending, |_, _| {
            calls += 1;
            anyhow::bail!("boom")
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn part_names_are_zero_padded() {
        assert_eq!(part_name("out/", 7), "out/mr-out-00007");
    }
}
