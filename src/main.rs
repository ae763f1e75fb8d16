use clap::Parser;
use std::process::ExitCode;
use testbed_eval::config::EvalConfig;
use testbed_eval::{logging, orchestrator};
use tracing::error;

#[derive(Parser, Debug)]
#[command(
    name = "evaluate-instance",
    about = "Evaluate one prediction patch against its prepared testbed",
    long_about = "Evaluate one prediction patch against its prepared testbed.\n\n\
        Configuration comes from the environment: INSTANCE (base64 JSON task \
        instance), TESTBED_NAME, TESTBED and LOG_DIR are required; TIMEOUT \
        (seconds) and LOG_SUFFIX are optional.",
    version
)]
struct Args {
    /// Log filter (tracing EnvFilter syntax); RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(&args.log_level);

    let config = match EvalConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!("Invalid configuration: {:#}", err);
            return ExitCode::from(1);
        }
    };

    match orchestrator::run(&config) {
        Ok(evaluation) => ExitCode::from(evaluation.outcome.exit_code()),
        Err(err) => {
            error!("Evaluation aborted: {:#}", err);
            ExitCode::from(1)
        }
    }
}
