use clap::{Parser, Subcommand};

use super::{EngineArgs, StorageArgs};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a job and wait for it to finish
    Submit {
        /// Input object, directory or glob
        #[arg(short, long, required = true)]
        input: Vec<String>,

        /// Name of the workload
        #[arg(short, long)]
        workload: String,

        /// Output directory
        #[arg(short, long)]
        output: String,

        /// Print the job report as JSON on success
        #[arg(long)]
        report: bool,

        #[command(flatten)]
        engine: EngineArgs,

        #[command(flatten)]
        storage: StorageArgs,

        /// Auxiliary arguments to pass to the MapReduce application.
        #[clap(value_parser, last = true)]
        args: Vec<String>,
    },
}
