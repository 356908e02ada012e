//! Runs jobs: map phase, barrier, shuffle, reduce phase, commit.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::TaskId;
use crate::format::{plan_splits, resolve_inputs};
use crate::standalone::job::{Counters, Job, JobReport, JobState};
use crate::standalone::{map, reduce, shuffle, EngineConfig};
use crate::storage::{self, join, MemoryStorage, Storage, StorageError};
use crate::{Error, Result};

/// Marker object written into a job's output once every part committed.
pub const SUCCESS_MARKER: &str = "_SUCCESS";

/// Everything a task of one job needs.
pub(crate) struct JobContext {
    pub(crate) id: String,
    pub(crate) job: Job,
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) scratch: Arc<dyn Storage>,
    pub(crate) config: EngineConfig,
    pub(crate) counters: Counters,
    stop: Arc<watch::Sender<bool>>,
}

impl JobContext {
    pub(crate) fn new(
        id: String,
        job: Job,
        storage: Arc<dyn Storage>,
        scratch: Arc<dyn Storage>,
        config: EngineConfig,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        Self::with_stop(id, job, storage, scratch, config, Arc::new(stop))
    }

    fn with_stop(
        id: String,
        job: Job,
        storage: Arc<dyn Storage>,
        scratch: Arc<dyn Storage>,
        config: EngineConfig,
        stop: Arc<watch::Sender<bool>>,
    ) -> Self {
        Self {
            id,
            job,
            storage,
            scratch,
            config,
            counters: Counters::default(),
            stop,
        }
    }

    /// Where this job keeps intermediate objects.
    pub(crate) fn scratch_dir(&self) -> String {
        join(&self.config.scratch_prefix, &self.id)
    }

    pub(crate) fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Fails with [`Error::Cancelled`] once the job has been told to stop.
    pub(crate) fn ensure_running(&self) -> anyhow::Result<()> {
        if self.is_stopped() {
            return Err(self.cancelled().into());
        }
        Ok(())
    }

    fn cancelled(&self) -> Error {
        Error::Cancelled(self.job.name().to_string())
    }

    /// Tag an error raised inside a task with the task's identity.
    /// Cancellation passes through untagged.
    pub(crate) fn task_error(task: &TaskId, err: anyhow::Error) -> Error {
        match err.downcast::<Error>() {
            Ok(err @ Error::Cancelled(_)) => err,
            Ok(err) => Error::task(task.clone(), err),
            Err(err) => Error::task(task.clone(), err),
        }
    }
}

/// Id, name and current state of a submitted job.
#[derive(Clone, Debug, Serialize)]
pub struct JobSummary {
    pub id: String,
    pub name: String,
    pub state: JobState,
}

/// Runs jobs against one storage backend.
///
/// Intermediate map output goes to a separate scratch storage, in memory
/// unless [`Engine::with_scratch`] says otherwise.
#[derive(Clone)]
pub struct Engine {
    storage: Arc<dyn Storage>,
    scratch: Arc<dyn Storage>,
    config: EngineConfig,
    jobs: Arc<DashMap<String, (String, watch::Receiver<JobState>)>>,
}

impl Engine {
    pub fn new(storage: Arc<dyn Storage>, config: EngineConfig) -> Self {
        Self {
            storage,
            scratch: Arc::new(MemoryStorage::new()),
            config,
            jobs: Arc::default(),
        }
    }

    pub fn with_scratch(mut self, scratch: Arc<dyn Storage>) -> Self {
        self.scratch = scratch;
        self
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start `job` in the background. Must be called inside a tokio
    /// runtime.
    pub fn submit(&self, job: Job) -> JobHandle {
        let id = Uuid::new_v4().to_string();
        let name = job.name().to_string();
        let (state_tx, state_rx) = watch::channel(JobState::Created);
        let (stop, _) = watch::channel(false);
        let stop = Arc::new(stop);

        let ctx = Arc::new(JobContext::with_stop(
            id.clone(),
            job,
            Arc::clone(&self.storage),
            Arc::clone(&self.scratch),
            self.config.clone(),
            Arc::clone(&stop),
        ));
        self.jobs.retain(|_, (_, state)| !state.borrow().is_terminal());
        self.jobs.insert(id.clone(), (name.clone(), state_rx.clone()));
        let span = info_span!("job", job = %name, id = %id);
        let join = tokio::spawn(run_job(ctx, state_tx).instrument(span));

        JobHandle {
            id,
            name,
            state: state_rx,
            stop,
            join,
        }
    }

    /// Submit `job` and wait for it to finish.
    pub async fn run(&self, job: Job) -> Result<JobReport> {
        self.submit(job).await_completion().await
    }

    /// Running jobs, plus the ones that finished since the last
    /// [`Engine::submit`].
    pub fn jobs(&self) -> Vec<JobSummary> {
        let mut jobs: Vec<JobSummary> = self
            .jobs
            .iter()
            .map(|entry| JobSummary {
                id: entry.key().clone(),
                name: entry.value().0.clone(),
                state: *entry.value().1.borrow(),
            })
            .collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        jobs
    }
}

/// A submitted job.
pub struct JobHandle {
    id: String,
    name: String,
    state: watch::Receiver<JobState>,
    stop: Arc<watch::Sender<bool>>,
    join: JoinHandle<Result<JobReport>>,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    /// A receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<JobState> {
        self.state.clone()
    }

    /// Cancel the job. Tasks not yet finished are abandoned and the job
    /// fails with [`Error::Cancelled`]. Parts already committed stay.
    pub fn abort(&self) {
        self.stop.send_replace(true);
    }

    /// Wait for the job to reach a terminal state.
    pub async fn await_completion(self) -> Result<JobReport> {
        match self.join.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Err(Error::Cancelled(self.name)),
        }
    }
}

async fn run_job(ctx: Arc<JobContext>, state: watch::Sender<JobState>) -> Result<JobReport> {
    let started = Instant::now();
    let result = drive(&ctx, &state, started).await;

    match ctx.scratch.delete(&ctx.scratch_dir(), true).await {
        Ok(()) | Err(StorageError::NotFound(_)) => {}
        Err(err) => warn!("failed to clean up scratch space: {err}"),
    }

    match &result {
        Ok(report) => {
            state.send_replace(JobState::Succeeded);
            info!(
                elapsed_ms = report.elapsed_ms,
                parts = report.parts.len(),
                counters = ?report.counters,
                "job succeeded"
            );
        }
        Err(err) => {
            state.send_replace(JobState::Failed);
            error!("job failed: {err}");
        }
    }
    result
}

/// Move the job to `next` unless it was cancelled meanwhile.
fn advance(ctx: &JobContext, state: &watch::Sender<JobState>, next: JobState) -> Result<()> {
    if ctx.is_stopped() {
        return Err(ctx.cancelled());
    }
    state.send_replace(next);
    debug!(state = %next, "job state changed");
    Ok(())
}

async fn drive(ctx: &Arc<JobContext>, state: &watch::Sender<JobState>, started: Instant) -> Result<JobReport> {
    let job = &ctx.job;
    if ctx.storage.exists(job.output()).await? {
        return Err(Error::PartialWrite {
            path: job.output().to_string(),
            reason: "output already exists".to_string(),
        });
    }

    let names = resolve_inputs(ctx.storage.as_ref(), job.inputs()).await?;
    let splits = plan_splits(
        ctx.storage.as_ref(),
        &names,
        job.input_format(),
        ctx.config.split_size,
    )
    .await?;
    Counters::add(&ctx.counters.splits, splits.len() as u64);

    advance(ctx, state, JobState::MapRunning)?;
    info!(splits = splits.len(), reducers = job.num_reduce_tasks(), "map phase started");
    let map_outputs = run_tasks(ctx, splits, map::run_map_task).await?;

    advance(ctx, state, JobState::Shuffling)?;
    let segments = shuffle::plan(&map_outputs, job.num_reduce_tasks());

    advance(ctx, state, JobState::ReduceRunning)?;
    info!("reduce phase started");
    let partitions: Vec<(u32, Vec<String>)> = segments
        .into_iter()
        .enumerate()
        .map(|(partition, names)| (partition as u32, names))
        .collect();
    let parts = run_tasks(ctx, partitions, |ctx, (partition, names), attempt| {
        reduce::run_reduce_task(ctx, partition, names, attempt)
    })
    .await?;

    if ctx.is_stopped() {
        return Err(ctx.cancelled());
    }
    storage::create(&ctx.storage, &join(job.output(), SUCCESS_MARKER))
        .commit()
        .await?;

    Ok(JobReport {
        id: ctx.id.clone(),
        name: job.name().to_string(),
        output: job.output().to_string(),
        parts,
        elapsed_ms: started.elapsed().as_millis() as u64,
        counters: ctx.counters.snapshot(),
    })
}

/// Run `tasks` on a pool of `config.workers` slots, retrying failed
/// attempts. Outputs come back in task order. The first task that fails
/// for good stops the others and fails the phase.
async fn run_tasks<T, F, Fut, O>(ctx: &Arc<JobContext>, tasks: Vec<T>, run: F) -> Result<Vec<O>>
where
    T: Clone + Send + 'static,
    F: Fn(Arc<JobContext>, T, u32) -> Fut + Copy + Send + 'static,
    Fut: Future<Output = Result<O>> + Send + 'static,
    O: Send + 'static,
{
    let slots = Arc::new(Semaphore::new(ctx.config.workers.max(1)));
    let max_attempts = ctx.config.max_task_attempts.max(1);
    let mut set = JoinSet::new();
    let count = tasks.len();

    for (index, task) in tasks.into_iter().enumerate() {
        let ctx = Arc::clone(ctx);
        let slots = Arc::clone(&slots);
        set.spawn(async move {
            let mut attempt = 1;
            loop {
                let _permit = slots.acquire().await.map_err(|_| ctx.cancelled())?;
                if ctx.is_stopped() {
                    return Err(ctx.cancelled());
                }
                match run(Arc::clone(&ctx), task.clone(), attempt).await {
                    Ok(output) => return Ok((index, output)),
                    Err(err @ Error::Cancelled(_)) => return Err(err),
                    Err(err) => {
                        Counters::add(&ctx.counters.failed_task_attempts, 1);
                        if attempt >= max_attempts {
                            return Err(err);
                        }
                        warn!(attempt, "task attempt failed, retrying: {err}");
                        attempt += 1;
                    }
                }
            }
        });
    }

    let mut outputs: Vec<Option<O>> = (0..count).map(|_| None).collect();
    let mut stop = ctx.stop.subscribe();
    loop {
        tokio::select! {
            joined = set.join_next() => match joined {
                None => break,
                Some(Ok(Ok((index, output)))) => outputs[index] = Some(output),
                Some(Ok(Err(err))) => {
                    // tell blocking work of sibling tasks to give up
                    ctx.stop.send_replace(true);
                    set.shutdown().await;
                    return Err(err);
                }
                Some(Err(err)) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Some(Err(_)) => return Err(ctx.cancelled()),
            },
            // the watch guard must not live across the shutdown await
            _ = async { let _ = stop.wait_for(|stopped| *stopped).await; } => {
                set.shutdown().await;
                return Err(ctx.cancelled());
            }
        }
    }
    Ok(outputs.into_iter().flatten().collect())
}
