//! Workloads command.

use std::path::Path;

use console::style;
use cosim::{QueueOutcome, SimConfig, WorkloadQueue};
use tracing::error;

use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS};

/// Parse a workload list the way a batch run would and print its entries.
pub fn cmd_workloads(list: &Path) -> i32 {
    let mut queue = WorkloadQueue::new(list);
    let mut config = SimConfig::default();
    let mut count = 0usize;

    loop {
        match queue.advance(&mut config) {
            Ok(entry) => {
                count += 1;
                println!(
                    "{count:>4}  {:>20}  {}",
                    entry.instruction_budget,
                    entry.image_path.display()
                );
            }
            Err(QueueOutcome::Exhausted) => break,
            Err(e) => {
                error!(error = %e, path = %list.display(), "invalid workload list");
                eprintln!("{} {e}", style("✗").red().bold());
                return EXIT_FAILURE;
            }
        }
    }

    eprintln!(
        "{} {count} workload(s) in {}",
        style("✓").green().bold(),
        list.display()
    );
    EXIT_SUCCESS
}
