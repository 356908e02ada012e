//! Command-line arguments shared by the binaries.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Args};
use tracing_subscriber::EnvFilter;

use crate::standalone::{EngineConfig, DEFAULT_SPLIT_SIZE};
use crate::storage::{LocalStorage, S3Storage, Storage};
use crate::{Error, Result};

pub mod grep;
pub mod standalone;

fn default_workers() -> usize {
    EngineConfig::default().workers
}

/// Engine tuning.
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Number of map or reduce tasks running at once
    #[arg(long, default_value_t = default_workers())]
    pub workers: usize,

    /// Number of reduce tasks
    #[arg(short, long, default_value_t = 1)]
    pub reducers: u32,

    /// Largest input split in bytes
    #[arg(long, default_value_t = DEFAULT_SPLIT_SIZE)]
    pub split_size: u64,

    /// How many times a failing task is attempted
    #[arg(long, default_value_t = 1)]
    pub max_attempts: u32,

    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl EngineArgs {
    pub fn config(&self) -> Result<EngineConfig> {
        if self.reducers == 0 {
            return Err(Error::Usage("--reducers must be at least 1".into()));
        }
        Ok(EngineConfig {
            workers: self.workers.max(1),
            max_task_attempts: self.max_attempts.max(1),
            split_size: self.split_size.max(1),
            ..EngineConfig::default()
        })
    }
}

/// Where job data lives: a local directory, or an S3-compatible bucket
/// when `--s3-endpoint` is given.
#[derive(Args, Debug, Clone)]
pub struct StorageArgs {
    /// Local directory object names are relative to
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Address of the object store
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// Bucket holding job data
    #[arg(long, default_value = "mrlite")]
    pub s3_bucket: String,

    /// Login user of the object store
    #[arg(long)]
    pub s3_user: Option<String>,

    /// Login password of the object store
    #[arg(long)]
    pub s3_password: Option<String>,
}

impl StorageArgs {
    pub async fn open(&self) -> Result<Arc<dyn Storage>> {
        let Some(endpoint) = &self.s3_endpoint else {
            return Ok(Arc::new(LocalStorage::new(&self.root)));
        };
        let (Some(user), Some(password)) = (&self.s3_user, &self.s3_password) else {
            return Err(Error::Usage(
                "--s3-endpoint needs --s3-user and --s3-password".into(),
            ));
        };
        let storage = S3Storage::connect(endpoint, user, password, &self.s3_bucket).await?;
        Ok(Arc::new(storage))
    }
}

/// Install the global `tracing` subscriber. `RUST_LOG` takes precedence
/// over the verbosity count.
pub fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // a second call (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Process exit code for a failed run: 2 for usage errors, 1 otherwise.
pub fn exit_code(err: &Error) -> u8 {
    match err {
        Error::Usage(_) => 2,
        _ => 1,
    }
}
