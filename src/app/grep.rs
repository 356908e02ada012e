use std::process::ExitCode;

use clap::Parser;
use mrlite::cmd::grep::Args;
use mrlite::cmd::{exit_code, init_logging};
use mrlite::standalone::{ChainReport, Engine};
use mrlite::workload::grep;
use mrlite::Result;
use tracing::info;

async fn run(args: Args) -> Result<ChainReport> {
    let config = args.engine.config()?;
    let chain = grep::chain(&args.pattern, args.group.unwrap_or(0), args.engine.reducers)?;
    let storage = args.storage.open().await?;
    let engine = Engine::new(storage, config);
    chain.run(&engine, &[args.input], &args.output).await
}

#[tokio::main]
async fn main() -> ExitCode {
    // clap exits with status 2 on usage errors
    let args = Args::parse();
    init_logging(args.engine.verbose);

    match run(args).await {
        Ok(report) => {
            info!(output = %report.output, "grep finished");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("grep: {err}");
            if err.is_retryable() {
                eprintln!("grep: the storage backend may recover, try again");
            }
            ExitCode::from(exit_code(&err))
        }
    }
}
