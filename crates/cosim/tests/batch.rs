//! Batch runs over workload lists, driven with the scripted DUT and oracle.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use cosim::test_support::{Call, Probe, ScriptedDut, ScriptedOracle};
use cosim::{BatchSummary, DeliveryMode, RunStatus, SimConfig, StepController};
use tempfile::TempDir;

const MEM: usize = 1 << 16;

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn image(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, [0x13, 0x00, 0x00, 0x00]).unwrap();
        path
    }

    fn list(&self, contents: &str) -> PathBuf {
        let path = self.dir.path().join("workloads.txt");
        fs::write(&path, contents).unwrap();
        path
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }
}

fn controller(
    list: &Path,
    dut: ScriptedDut,
    configure: impl FnOnce(&mut SimConfig),
) -> (StepController, Probe) {
    let mut config = SimConfig::default();
    config.set_memory_size(MEM).unwrap();
    config.set_workload_list(list).unwrap();
    configure(&mut config);
    let probe = dut.probe();
    let oracle = ScriptedOracle::new(&probe);
    let controller = StepController::new(config, Box::new(dut), Some(Box::new(oracle))).unwrap();
    (controller, probe)
}

#[test]
fn test_every_entry_runs_once() {
    let fx = Fixture::new();
    let a = fx.image("a.bin");
    let b = fx.image("b.bin");
    let c = fx.image("c.bin");
    let list = fx.list(&format!(
        "{} 10\n\n{} 20\n{} 5\n",
        a.display(),
        b.display(),
        c.display()
    ));

    let (mut controller, probe) = controller(&list, ScriptedDut::new(2), |_| {});
    let summary = controller.run_batch(7, |_| {}).unwrap();

    assert_eq!(
        summary,
        BatchSummary {
            runs: 3,
            status: RunStatus::Done
        }
    );
    assert_eq!(probe.count(Call::DutInit), 3);
    assert_eq!(probe.count(Call::DutFinish), 3);
    assert_eq!(probe.count(Call::OracleInit), 3);
    assert_eq!(probe.count(Call::OracleFinish), 3);
    assert_eq!(probe.total_ticks(), 35);
    assert!(controller.queue().is_some_and(cosim::WorkloadQueue::is_completed));
    assert_eq!(controller.config().image(), c.as_path());
    assert_eq!(controller.config().max_instrs(), 5);
}

#[test]
fn test_malformed_line_stops_batch() {
    let fx = Fixture::new();
    let a = fx.image("a.bin");
    fx.image("b.bin");
    let list = fx.list(&format!("{} 1000\nb.bin\n", a.display()));

    let (mut controller, probe) = controller(&list, ScriptedDut::new(1), |_| {});
    let summary = controller.run_batch(100, |_| {}).unwrap();

    assert_eq!(summary.runs, 1);
    assert_eq!(summary.status, RunStatus::Fail);
    assert_eq!(probe.count(Call::DutInit), 1);
    assert_eq!(probe.total_ticks(), 1000);
    assert_eq!(controller.config().image(), a.as_path());
}

#[test]
fn test_failed_run_stops_batch() {
    let fx = Fixture::new();
    let list = fx.list(&format!(
        "{} 10\n{} 10\n{} 10\n",
        fx.image("a.bin").display(),
        fx.image("b.bin").display(),
        fx.image("c.bin").display()
    ));

    let (mut controller, probe) = controller(&list, ScriptedDut::new(1), |_| {});
    let hook_probe = probe.clone();
    let mut run = 0;
    let summary = controller
        .run_batch(4, |_| {
            run += 1;
            hook_probe.set_assertions(u64::from(run == 2));
        })
        .unwrap();

    assert_eq!(
        summary,
        BatchSummary {
            runs: 2,
            status: RunStatus::Fail
        }
    );
    assert_eq!(probe.count(Call::DutInit), 2);
    assert_eq!(probe.count(Call::DutFinish), 2);
}

#[test]
fn test_empty_list_is_done() {
    let fx = Fixture::new();
    let list = fx.list("\n\n");

    let (mut controller, probe) = controller(&list, ScriptedDut::new(1), |_| {});
    let summary = controller.run_batch(10, |_| {}).unwrap();

    assert_eq!(
        summary,
        BatchSummary {
            runs: 0,
            status: RunStatus::Done
        }
    );
    assert!(probe.calls().is_empty());
}

#[test]
fn test_unreadable_list_fails() {
    let fx = Fixture::new();
    let list = fx.path().join("missing.txt");

    let (mut controller, probe) = controller(&list, ScriptedDut::new(1), |_| {});
    let summary = controller.run_batch(10, |_| {}).unwrap();

    assert_eq!(summary.runs, 0);
    assert_eq!(summary.status, RunStatus::Fail);
    assert!(probe.calls().is_empty());
}

#[test]
fn test_missing_image_is_init_error() {
    let fx = Fixture::new();
    let list = fx.list(&format!("{} 10\n", fx.path().join("absent.bin").display()));

    let (mut controller, _probe) = controller(&list, ScriptedDut::new(1), |_| {});
    let err = controller.run_batch(10, |_| {}).unwrap_err();
    assert!(matches!(
        err,
        cosim::Error::Init(ref e) if e.step() == cosim::InitStep::LoadImage
    ));
}

#[test]
fn test_deferred_batch_delivers_each_run() {
    let fx = Fixture::new();
    let list = fx.list(&format!(
        "{} 3\n{} 6\n",
        fx.image("a.bin").display(),
        fx.image("b.bin").display()
    ));

    let (mut controller, probe) = controller(&list, ScriptedDut::new(1), |config| {
        config.set_delivery(DeliveryMode::Deferred);
    });
    let delivered = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&delivered);
    let summary = controller
        .run_batch(2, |controller| {
            let sink = Rc::clone(&sink);
            controller.register_scope(move |status: RunStatus| sink.borrow_mut().push(status));
        })
        .unwrap();

    assert_eq!(summary.runs, 2);
    assert_eq!(summary.status, RunStatus::Done);
    assert_eq!(*delivered.borrow(), vec![RunStatus::Done, RunStatus::Done]);
    assert_eq!(probe.total_ticks(), 9);
}
