//! cosim CLI - lockstep co-simulation driver

mod cli;
mod commands;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use cli::Cli;

fn main() {
    let cli = Cli::parse();

    let metrics_handle = if cli.metrics {
        cosim::metrics::CliRecorder::new().install()
    } else {
        None
    };
    cosim::metrics::init();

    let default_filter = if cli.verbose {
        "cosim=debug,cosim_mem=debug"
    } else if cli.silent {
        "cosim=error,cosim_mem=error"
    } else {
        "cosim=info,cosim_mem=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .init();

    let exit_code = commands::run_command(&cli);

    if let Some(handle) = metrics_handle {
        handle.print_summary();
    }

    std::process::exit(exit_code);
}
