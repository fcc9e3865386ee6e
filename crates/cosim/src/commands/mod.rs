//! Command implementations.

mod run;
mod workloads;

use crate::cli::{Cli, Commands};

/// Dispatch CLI command to the appropriate handler.
pub fn run_command(cli: &Cli) -> i32 {
    match &cli.command {
        Commands::Run(args) => run::cmd_run(args),
        Commands::Workloads { list } => workloads::cmd_workloads(list),
    }
}
