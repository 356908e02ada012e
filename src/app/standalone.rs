use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use mrlite::cmd::standalone::{Args, Commands};
use mrlite::cmd::{exit_code, init_logging};
use mrlite::standalone::Engine;
use mrlite::*;

async fn submit(command: Commands) -> anyhow::Result<()> {
    let Commands::Submit {
        input,
        workload,
        output,
        report,
        engine,
        storage,
        args,
    } = command;
    let config = engine.config()?;
    let chain = workload::named(&workload, &args, engine.reducers)?;
    let storage = storage.open().await?;
    let engine = Engine::new(storage, config);

    let chain_report = chain.run(&engine, &input, &output).await?;
    if report {
        let json = serde_json::to_string_pretty(&chain_report).context("rendering the job report")?;
        println!("{json}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let Commands::Submit { engine, .. } = &args.command;
    init_logging(engine.verbose);

    match submit(args.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("standalone: {err:#}");
            ExitCode::from(err.downcast_ref::<Error>().map_or(1, exit_code))
        }
    }
}
