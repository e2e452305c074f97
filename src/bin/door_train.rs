//! Standalone trainer launched by the station. Exit status 0 on success,
//! 3 when the dataset holds no usable face, 1 for any other failure.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use door_access::common::{setup_logging, AccessError, Paths};
use door_access::core::run_training;
use door_access::service::EXIT_EMPTY_CORPUS;

#[derive(Parser)]
#[command(name = "door-train")]
#[command(about = "Train the door access identity model")]
struct Args {
    #[arg(long)]
    dev: bool,

    #[arg(long)]
    system: bool,

    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    setup_logging(args.dev);

    let result = Paths::new(args.dev, args.system)
        .and_then(|paths| paths.load_config(args.config.as_deref()))
        .and_then(|config| run_training(&config));

    match result {
        Ok(report) => {
            tracing::info!(
                "Training complete: {} samples, {} identities",
                report.total_samples,
                report.identities()
            );
            ExitCode::SUCCESS
        }
        Err(e @ AccessError::EmptyCorpus(_)) => {
            tracing::error!("{}", e);
            ExitCode::from(EXIT_EMPTY_CORPUS as u8)
        }
        Err(e) => {
            tracing::error!("Training failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
