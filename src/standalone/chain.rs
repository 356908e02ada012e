//! Multi-stage jobs whose stages hand data over through temporary
//! locations.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::format::{InputFormat, Schema};
use crate::standalone::engine::Engine;
use crate::standalone::job::{JobBuilder, JobReport};
use crate::storage::{normalize, Storage, StorageError};
use crate::{Error, Result};

/// Reports of every stage of a successful chain, in stage order.
#[derive(Clone, Debug, Serialize)]
pub struct ChainReport {
    pub name: String,
    pub output: String,
    pub stages: Vec<JobReport>,
}

/// An ordered list of stages. Stage `i + 1` reads what stage `i` wrote;
/// the last stage writes the chain's output.
#[derive(Clone)]
pub struct JobChain {
    name: String,
    stages: Vec<JobBuilder>,
}

impl JobChain {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Append a stage. Its inputs and output are filled in when the chain
    /// runs.
    pub fn stage(mut self, stage: JobBuilder) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Check that each stage reads what the stage before it writes.
    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(Error::InvalidJob(format!("chain `{}` has no stages", self.name)));
        }
        for pair in self.stages.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            let (format, schema) = match prev.current_output_format().reader() {
                Some(format) => (format, prev.current_output_schema()),
                None => (InputFormat::Text, Schema::LINES),
            };
            if next.current_input_format() != format {
                return Err(Error::InvalidJob(format!(
                    "stage `{}` reads {:?} but `{}` writes {:?}",
                    next.name(),
                    next.current_input_format(),
                    prev.name(),
                    prev.current_output_format()
                )));
            }
            if next.effective_input_schema() != schema {
                return Err(Error::InvalidJob(format!(
                    "stage `{}` expects {:?} records but `{}` produces {:?}",
                    next.name(),
                    next.effective_input_schema(),
                    prev.name(),
                    schema
                )));
            }
        }
        Ok(())
    }

    /// Run every stage in order on `engine`. Temporary locations between
    /// stages are deleted before this returns, whatever the outcome.
    pub async fn run(&self, engine: &Engine, inputs: &[String], output: &str) -> Result<ChainReport> {
        self.validate()?;
        let temps = Intermediates::new(engine.storage(), &self.name, self.stages.len() - 1);
        let result = self.run_stages(engine, inputs, output, &temps).await;
        temps.release().await;
        result
    }

    async fn run_stages(
        &self,
        engine: &Engine,
        inputs: &[String],
        output: &str,
        temps: &Intermediates,
    ) -> Result<ChainReport> {
        let mut stage_inputs = inputs.to_vec();
        let mut reports = Vec::with_capacity(self.stages.len());
        for (index, stage) in self.stages.iter().enumerate() {
            let stage_output = temps.names.get(index).map_or(output, String::as_str);
            let job = stage
                .clone()
                .inputs(stage_inputs)
                .output(stage_output)
                .build()?;
            info!(chain = %self.name, stage = index, job = %job.name(), output = %stage_output, "chain stage started");
            let report = engine.run(job).await?;
            stage_inputs = vec![report.output.clone()];
            reports.push(report);
        }
        Ok(ChainReport {
            name: self.name.clone(),
            output: normalize(output),
            stages: reports,
        })
    }
}

/// Uniquely named locations owned by one chain run. Deleted by
/// [`Intermediates::release`], or in the background if dropped first.
struct Intermediates {
    storage: Arc<dyn Storage>,
    names: Vec<String>,
    released: bool,
}

impl Intermediates {
    fn new(storage: &Arc<dyn Storage>, chain: &str, count: usize) -> Self {
        let names = (0..count)
            .map(|_| format!("{chain}-temp-{}", Uuid::new_v4().simple()))
            .collect();
        Self {
            storage: Arc::clone(storage),
            names,
            released: false,
        }
    }

    async fn release(mut self) {
        self.released = true;
        for name in &self.names {
            delete_quietly(self.storage.as_ref(), name).await;
        }
    }
}

impl Drop for Intermediates {
    fn drop(&mut self) {
        if self.released || self.names.is_empty() {
            return;
        }
        let storage = Arc::clone(&self.storage);
        let names = std::mem::take(&mut self.names);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    for name in &names {
                        delete_quietly(storage.as_ref(), name).await;
                    }
                });
            }
            Err(_) => warn!(?names, "no runtime left to delete intermediate data"),
        }
    }
}

/// Cleanup never fails the chain; problems are only logged.
async fn delete_quietly(storage: &dyn Storage, name: &str) {
    match storage.delete(name, true).await {
        Ok(()) => debug!(name, "deleted intermediate data"),
        Err(StorageError::NotFound(_)) => {}
        Err(err) => warn!(name, "failed to delete intermediate data: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::OutputFormat;
    use crate::standalone::{EngineConfig, Job};
    use crate::storage::MemoryStorage;
    use crate::workload::{common, wc};
    use crate::Workload;

    fn counting_stage() -> JobBuilder {
        Job::builder("count")
            .workload(wc::workload().with_combiner(common::long_sum_combine))
            .output_format(OutputFormat::Sequence)
            .output_schema(Schema::COUNTS)
    }

    fn inverting_stage() -> JobBuilder {
        Job::builder("invert")
            .input_format(InputFormat::Sequence)
            .input_schema(Schema::COUNTS)
            .workload(Workload::new(common::inverse_map, common::identity_reduce))
            .output_schema(Schema::COUNTS.inverse())
    }

    #[test]
    fn rejects_mismatched_stages() {
        assert!(JobChain::new("empty").validate().is_err());
        assert!(JobChain::new("ok")
            .stage(counting_stage())
            .stage(inverting_stage())
            .validate()
            .is_ok());

        let text_reader = JobChain::new("bad")
            .stage(counting_stage())
            .stage(inverting_stage().input_format(InputFormat::Text));
        assert!(matches!(text_reader.validate(), Err(Error::InvalidJob(_))));

        let wrong_schema = JobChain::new("bad")
            .stage(counting_stage())
            .stage(inverting_stage().input_schema(Schema::LINES));
        assert!(matches!(wrong_schema.validate(), Err(Error::InvalidJob(_))));
    }

    #[tokio::test]
    async fn intermediates_are_removed_on_every_path() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        storage
            .put("in/a.txt", bytes::Bytes::from("b a b\n"))
            .await
            .unwrap();
        let engine = Engine::new(Arc::clone(&storage), EngineConfig::default());
        let chain = JobChain::new("wc-chain")
            .stage(counting_stage())
            .stage(inverting_stage());

        let report = chain.run(&engine, &["in".to_string()], "out").await.unwrap();
        assert_eq!(report.stages.len(), 2);
        assert_eq!(report.output, "out");
        let leftovers: Vec<String> = storage
            .list("")
            .await
            .unwrap()
            .into_iter()
            .filter(|name| name.starts_with("wc-chain-temp-"))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");

        let err = chain
            .run(&engine, &["missing".to_string()], "out2")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(storage
            .list("")
            .await
            .unwrap()
            .iter()
            .all(|name| !name.starts_with("wc-chain-temp-")));
    }
}
