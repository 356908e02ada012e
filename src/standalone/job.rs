use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::format::{InputFormat, OutputFormat, Schema};
use crate::partition::{HashPartitioner, Partitioner};
use crate::standalone::compare::{self, CompareFn};
use crate::storage::normalize;
use crate::{Error, Result, Workload};

/// Lifecycle of a job. `Succeeded` and `Failed` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum JobState {
    Created,
    MapRunning,
    Shuffling,
    ReduceRunning,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Created => "created",
            JobState::MapRunning => "map phase",
            JobState::Shuffling => "shuffle",
            JobState::ReduceRunning => "reduce phase",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// An immutable job description. Build one with [`Job::builder`].
#[derive(Clone)]
pub struct Job {
    name: String,
    inputs: Vec<String>,
    input_format: InputFormat,
    input_schema: Schema,
    output: String,
    output_format: OutputFormat,
    output_schema: Schema,
    workload: Workload,
    num_reduce_tasks: u32,
    compare: CompareFn,
    partitioner: Arc<dyn Partitioner>,
}

impl Job {
    pub fn builder(name: impl Into<String>) -> JobBuilder {
        JobBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn input_format(&self) -> InputFormat {
        self.input_format
    }

    pub fn input_schema(&self) -> Schema {
        self.input_schema
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn output_format(&self) -> OutputFormat {
        self.output_format
    }

    pub fn output_schema(&self) -> Schema {
        self.output_schema
    }

    pub fn workload(&self) -> &Workload {
        &self.workload
    }

    pub fn num_reduce_tasks(&self) -> u32 {
        self.num_reduce_tasks
    }

    pub fn compare(&self) -> CompareFn {
        self.compare
    }

    pub fn partitioner(&self) -> &dyn Partitioner {
        self.partitioner.as_ref()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("input_format", &self.input_format)
            .field("output", &self.output)
            .field("output_format", &self.output_format)
            .field("num_reduce_tasks", &self.num_reduce_tasks)
            .field("workload", &self.workload)
            .finish()
    }
}

/// Collects job settings. Chains keep builders without input and output
/// and fill those in per run.
#[derive(Clone)]
pub struct JobBuilder {
    name: String,
    inputs: Vec<String>,
    input_format: InputFormat,
    input_schema: Option<Schema>,
    output: Option<String>,
    output_format: OutputFormat,
    output_schema: Schema,
    workload: Option<Workload>,
    num_reduce_tasks: u32,
    compare: CompareFn,
    partitioner: Arc<dyn Partitioner>,
}

impl JobBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            input_format: InputFormat::Text,
            input_schema: None,
            output: None,
            output_format: OutputFormat::Text,
            output_schema: Schema::default(),
            workload: None,
            num_reduce_tasks: 1,
            compare: compare::ascending,
            partitioner: Arc::new(HashPartitioner),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.inputs.push(input.into());
        self
    }

    pub fn inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn input_format(mut self, format: InputFormat) -> Self {
        self.input_format = format;
        self
    }

    /// Schema of the records read. Text input always reads
    /// [`Schema::LINES`].
    pub fn input_schema(mut self, schema: Schema) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn output_schema(mut self, schema: Schema) -> Self {
        self.output_schema = schema;
        self
    }

    pub fn workload(mut self, workload: Workload) -> Self {
        self.workload = Some(workload);
        self
    }

    pub fn num_reduce_tasks(mut self, n: u32) -> Self {
        self.num_reduce_tasks = n;
        self
    }

    /// Order of keys within a partition. Also decides reduce grouping.
    ///
    /// A comparator that equates different byte strings needs a
    /// [`JobBuilder::partitioner`] that routes those keys together.
    pub fn sort_by(mut self, compare: CompareFn) -> Self {
        self.compare = compare;
        self
    }

    pub fn partitioner(mut self, partitioner: impl Partitioner + 'static) -> Self {
        self.partitioner = Arc::new(partitioner);
        self
    }

    pub(crate) fn current_output_format(&self) -> OutputFormat {
        self.output_format
    }

    pub(crate) fn current_output_schema(&self) -> Schema {
        self.output_schema
    }

    pub(crate) fn current_input_format(&self) -> InputFormat {
        self.input_format
    }

    /// The schema records are read with, after format defaults.
    pub(crate) fn effective_input_schema(&self) -> Schema {
        self.input_format
            .fixed_schema()
            .or(self.input_schema)
            .unwrap_or_default()
    }

    pub fn build(self) -> Result<Job> {
        let invalid = |msg: String| Error::InvalidJob(format!("{}: {msg}", self.name));
        if self.name.is_empty() {
            return Err(Error::InvalidJob("job name is empty".into()));
        }
        if self.inputs.iter().all(|i| normalize(i).is_empty()) {
            return Err(invalid("no input".into()));
        }
        let output = match self.output.as_deref().map(normalize) {
            Some(output) if !output.is_empty() => output,
            _ => return Err(invalid("no output".into())),
        };
        if self.num_reduce_tasks == 0 {
            return Err(invalid("at least one reduce task is required".into()));
        }
        let workload = match self.workload.clone() {
            Some(workload) => workload,
            None => return Err(invalid("no workload".into())),
        };
        if let (Some(fixed), Some(declared)) = (self.input_format.fixed_schema(), self.input_schema) {
            if fixed != declared {
                return Err(invalid(format!(
                    "{:?} input always reads {fixed:?}, not {declared:?}",
                    self.input_format
                )));
            }
        }
        let input_schema = self.effective_input_schema();
        Ok(Job {
            name: self.name,
            inputs: self.inputs,
            input_format: self.input_format,
            input_schema,
            output,
            output_format: self.output_format,
            output_schema: self.output_schema,
            workload,
            num_reduce_tasks: self.num_reduce_tasks,
            compare: self.compare,
            partitioner: self.partitioner,
        })
    }
}

/// Record counts gathered while a job runs.
#[derive(Debug, Default)]
pub struct Counters {
    pub splits: AtomicU64,
    pub map_input_records: AtomicU64,
    pub map_output_records: AtomicU64,
    pub combine_input_records: AtomicU64,
    pub combine_output_records: AtomicU64,
    pub reduce_input_groups: AtomicU64,
    pub reduce_input_records: AtomicU64,
    pub reduce_output_records: AtomicU64,
    pub failed_task_attempts: AtomicU64,
}

impl Counters {
    #[inline]
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CounterSnapshot {
            splits: get(&self.splits),
            map_input_records: get(&self.map_input_records),
            map_output_records: get(&self.map_output_records),
            combine_input_records: get(&self.combine_input_records),
            combine_output_records: get(&self.combine_output_records),
            reduce_input_groups: get(&self.reduce_input_groups),
            reduce_input_records: get(&self.reduce_input_records),
            reduce_output_records: get(&self.reduce_output_records),
            failed_task_attempts: get(&self.failed_task_attempts),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub splits: u64,
    pub map_input_records: u64,
    pub map_output_records: u64,
    pub combine_input_records: u64,
    pub combine_output_records: u64,
    pub reduce_input_groups: u64,
    pub reduce_input_records: u64,
    pub reduce_output_records: u64,
    pub failed_task_attempts: u64,
}

/// Summary of a successful job.
#[derive(Clone, Debug, Serialize)]
pub struct JobReport {
    pub id: String,
    pub name: String,
    pub output: String,
    /// Output part objects, one per reduce partition, in partition order.
    pub parts: Vec<String>,
    pub elapsed_ms: u64,
    pub counters: CounterSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::common::{identity_map, identity_reduce};

    fn identity() -> Workload {
        Workload::new(identity_map, identity_reduce)
    }

    #[test]
    fn build_requires_io_and_reducers() {
        assert!(matches!(
            Job::builder("j").output("out").workload(identity()).build(),
            Err(Error::InvalidJob(_))
        ));
        assert!(matches!(
            Job::builder("j").input("in").workload(identity()).build(),
            Err(Error::InvalidJob(_))
        ));
        assert!(matches!(
            Job::builder("j")
                .input("in")
                .output("out")
                .workload(identity())
                .num_reduce_tasks(0)
                .build(),
            Err(Error::InvalidJob(_))
        ));
        assert!(matches!(
            Job::builder("j").input("in").output("out").build(),
            Err(Error::InvalidJob(_))
        ));
    }

    #[test]
    fn text_input_fixes_the_schema() {
        let job = Job::builder("j")
            .input("in")
            .output("/out/")
            .workload(identity())
            .build()
            .unwrap();
        assert_eq!(job.input_schema(), Schema::LINES);
        assert_eq!(job.output(), "out");

        let mismatch = Job::builder("j")
            .input("in")
            .output("out")
            .input_schema(Schema::COUNTS)
            .workload(identity())
            .build();
        assert!(matches!(mismatch, Err(Error::InvalidJob(_))));
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Shuffling.is_terminal());
        assert_eq!(JobState::MapRunning.to_string(), "map phase");
    }
}
