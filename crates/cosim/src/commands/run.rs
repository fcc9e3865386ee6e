//! Run command.

use std::sync::mpsc;

use console::style;
use cosim::{
    DeliveryMode, DylibDut, DylibOracle, Oracle, RunStatus, SimConfig, StepController,
};
use tracing::{debug, error, info};

use crate::cli::{EXIT_FAILURE, RunArgs};

fn build_config(args: &RunArgs) -> cosim::Result<SimConfig> {
    let mut config = SimConfig::default();
    if let Some(image) = &args.image {
        config.set_image(image)?;
    }
    if let Some(flash) = &args.flash {
        config.set_flash_image(flash)?;
    }
    if let Some(restore) = &args.restore_image {
        config.set_restore_image(restore)?;
    }
    config.set_overwrite_nbytes(args.overwrite_nbytes);
    config.set_max_instrs(args.max_instrs);
    if let Some(oracle) = &args.oracle {
        config.set_oracle_lib(oracle)?;
    }
    if let Some(list) = &args.workload_list {
        config.set_workload_list(list)?;
    }
    if let Some(path) = &args.cpi_output {
        config.set_cpi_output(path)?;
    }
    config.set_memory_size(1usize << args.memory_bits)?;
    if args.no_diff {
        config.disable_comparison();
    }
    if args.deferred {
        config.set_delivery(DeliveryMode::Deferred);
    }
    config.set_perf_policy(args.perf.into());
    Ok(config)
}

fn build_controller(args: &RunArgs) -> cosim::Result<StepController> {
    let config = build_config(args)?;
    let dut = DylibDut::load(&args.dut)?;
    let oracle: Option<Box<dyn Oracle>> = match config.oracle_lib() {
        Some(path) if config.comparison_enabled() => Some(Box::new(DylibOracle::load(path)?)),
        _ => None,
    };
    Ok(StepController::new(config, Box::new(dut), oracle)?)
}

/// Handle the `run` command.
pub fn cmd_run(args: &RunArgs) -> i32 {
    let mut controller = match build_controller(args) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, dut = %args.dut.display(), "failed to set up co-simulation");
            return EXIT_FAILURE;
        }
    };

    let (tx, rx) = mpsc::channel();
    let deferred = args.deferred;
    let result = controller.run_batch(args.steps_per_call, |controller| {
        if deferred {
            let tx = tx.clone();
            controller.register_scope(move |status: RunStatus| {
                let _ = tx.send(status);
            });
        }
    });

    for status in rx.try_iter() {
        debug!(?status, "deferred result delivered");
    }

    match result {
        Ok(summary) => {
            let mark = if summary.status == RunStatus::Done {
                style("✓").green().bold()
            } else {
                style("✗").red().bold()
            };
            eprintln!("{mark} {} run(s), {:?}", summary.runs, summary.status);
            info!(runs = summary.runs, status = ?summary.status, "co-simulation finished");
            summary.status.exit_code()
        }
        Err(e) => {
            error!(error = %e, "co-simulation failed");
            EXIT_FAILURE
        }
    }
}
