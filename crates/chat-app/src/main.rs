use std::env;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use lumen::app::{parse_args, run};

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so they never interleave with the transcript on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match parse_args(env::args().skip(1)) {
        Ok(args) => args,
        Err(error) => {
            eprintln!("lumen: {error}");
            eprintln!("usage: lumen [--config <path>]");
            return ExitCode::from(2);
        }
    };

    if let Err(error) = run(args).await {
        tracing::error!(%error, "lumen stopped");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
