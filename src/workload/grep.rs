//! A MapReduce-compatible implementation of `grep`: count every distinct
//! match of a regular expression, then sort the matches by decreasing
//! frequency.

use bytes::Bytes;
use clap::Parser;
use regex::bytes::Regex;

use crate::format::{InputFormat, OutputFormat, Schema};
use crate::standalone::compare;
use crate::standalone::{Job, JobBuilder, JobChain};
use crate::utils::u64_to_bytes;
use crate::workload::common::{identity_reduce, inverse_map, long_sum_combine, long_sum_reduce};
use crate::*;

#[derive(Parser, Debug)]
#[clap(no_binary_name = true)]
struct Args {
    /// Regular expression to search for
    #[clap(short, long, value_parser)]
    term: String,

    /// Capture group to count instead of the whole match
    #[clap(short, long, default_value_t = 0)]
    group: usize,
}

/// Compile `pattern` and check that it has capture group `group`.
pub fn compile(pattern: &str, group: usize) -> Result<Regex> {
    let regex =
        Regex::new(pattern).map_err(|err| Error::Usage(format!("bad pattern `{pattern}`: {err}")))?;
    if group >= regex.captures_len() {
        return Err(Error::Usage(format!(
            "pattern `{pattern}` has no capture group {group}"
        )));
    }
    Ok(regex)
}

/// A map function emitting `(match, 1)` for every match of `regex` in a
/// record's value, or for capture group `group` of every match.
pub fn regex_map(regex: Regex, group: usize) -> impl Fn(KeyValue) -> MapOutput + Send + Sync + 'static {
    move |kv: KeyValue| -> MapOutput {
        let line = kv.into_value();
        let matches: Vec<Bytes> = regex
            .captures_iter(&line)
            .filter_map(|caps| caps.get(group))
            .map(|m| line.slice(m.range()))
            .collect();
        Ok(Box::new(
            matches
                .into_iter()
                .map(|found| Ok(KeyValue::new(found, u64_to_bytes(1)))),
        ))
    }
}

/// Counts matches per distinct matched text.
pub fn workload(regex: Regex, group: usize) -> Workload {
    Workload::new(regex_map(regex, group), long_sum_reduce).with_combiner(long_sum_combine)
}

/// The counting stage, writing `(match, count)` records in sequence format.
pub fn search_stage(pattern: &str, group: usize) -> Result<JobBuilder> {
    let regex = compile(pattern, group)?;
    Ok(Job::builder("grep-search")
        .workload(workload(regex, group))
        .output_format(OutputFormat::Sequence)
        .output_schema(Schema::COUNTS))
}

/// The sorting stage: reads `(match, count)` records and writes one text
/// file of `count<TAB>match` lines, most frequent first.
pub fn sort_stage() -> JobBuilder {
    Job::builder("grep-sort")
        .input_format(InputFormat::Sequence)
        .input_schema(Schema::COUNTS)
        .workload(Workload::new(inverse_map, identity_reduce))
        .num_reduce_tasks(1)
        .sort_by(compare::descending)
        .output_format(OutputFormat::Text)
        .output_schema(Schema::COUNTS.inverse())
}

/// Search, then sort by frequency.
pub fn chain(pattern: &str, group: usize, reducers: u32) -> Result<JobChain> {
    Ok(JobChain::new("grep")
        .stage(search_stage(pattern, group)?.num_reduce_tasks(reducers))
        .stage(sort_stage()))
}

/// Parse `-t <pattern> [-g <group>]`.
fn parse_args(args: &[String]) -> Result<(String, usize)> {
    let args = Args::try_parse_from(args).map_err(|err| Error::Usage(err.to_string()))?;
    Ok((args.term, args.group))
}

/// Single-stage grep: `(match, count)` lines, unsorted by frequency.
pub fn from_args(args: &[String], reducers: u32) -> Result<JobChain> {
    let (pattern, group) = parse_args(args)?;
    let search = search_stage(&pattern, group)?
        .output_format(OutputFormat::Text)
        .num_reduce_tasks(reducers);
    Ok(JobChain::new("grep").stage(search))
}

/// The full search and sort chain.
pub fn sorted_from_args(args: &[String], reducers: u32) -> Result<JobChain> {
    let (pattern, group) = parse_args(args)?;
    chain(&pattern, group, reducers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(regex: &str, group: usize, line: &str) -> Vec<String> {
        let map = regex_map(compile(regex, group).unwrap(), group);
        map(KeyValue::new(u64_to_bytes(0), line.to_string()))
            .unwrap()
            .map(|kv| {
                let kv = kv.unwrap();
                assert_eq!(kv.value, u64_to_bytes(1));
                String::from_utf8(kv.key.to_vec()).unwrap()
            })
            .collect()
    }

    #[test]
    fn emits_every_match() {
        assert_eq!(matches("the", 0, "the cat and the hat"), vec!["the", "the"]);
        assert!(matches("dog", 0, "the cat").is_empty());
    }

    #[test]
    fn emits_the_requested_group() {
        assert_eq!(
            matches(r"(\w+)@(\w+)", 2, "ann@home bob@work"),
            vec!["home", "work"]
        );
    }

    #[test]
    fn bad_patterns_are_usage_errors() {
        assert!(matches!(compile("(", 0), Err(Error::Usage(_))));
        assert!(matches!(compile("a(b)", 2), Err(Error::Usage(_))));
        assert!(compile("a(b)", 1).is_ok());
    }

    #[test]
    fn parses_workload_args() {
        let args: Vec<String> = ["-t", "fo+", "-g", "0"].iter().map(|s| s.to_string()).collect();
        assert_eq!(parse_args(&args).unwrap(), ("fo+".to_string(), 0));
        assert!(matches!(parse_args(&[]), Err(Error::Usage(_))));
    }

    #[test]
    fn chain_has_search_then_sort() {
        let chain = chain("x", 0, 4).unwrap();
        assert_eq!(chain.len(), 2);
        assert!(chain.validate().is_ok());
    }
}
