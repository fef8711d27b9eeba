extern crate env_logger;
#[macro_use]
extern crate log;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

mod cli;
mod genome;
mod launch;
mod merge;
mod partition;
mod pipeline;
mod summary;
mod workspace;

use cli::Cli;
use pipeline::RunStatus;

fn try_main() -> Result<RunStatus> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .init();

    let cli = Cli::parse();

    info!("parallel_augustus v{}", cli::VERSION);

    let config = cli.into_config();
    pipeline::run(&config)
}

fn main() -> ExitCode {
    match try_main() {
        Ok(RunStatus::Completed) => ExitCode::SUCCESS,
        Ok(RunStatus::Failed) => ExitCode::FAILURE,
        Err(err) => {
            error!("{}", err);

            // report any errors that are produced
            err.chain()
                .skip(1)
                .for_each(|cause| error!("  because: {}", cause));

            ExitCode::FAILURE
        }
    }
}
