//! Periodic scheduler and Warden lifecycle against the real tick loop

mod common;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use warden_device::workloads::{MatMul, Sobel, Spin};
use warden_scheduler::{HostTask, SchedulerConfig, SwcTask, TaskContext, TaskOutcome, Warden};
use warden_shared::{CollectingSink, KernelState, PeriodClass, SchedulerEvent};

/// Records how many runs overlap on the same kernel
#[derive(Default)]
struct OverlapProbe {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    runs: AtomicU64,
}

#[async_trait]
impl SwcTask for OverlapProbe {
    async fn run(&self, _ctx: TaskContext<'_>) -> Result<TaskOutcome> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(3)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(TaskOutcome::Done)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn components_sharing_a_kernel_never_overlap() {
    let sink = Arc::new(CollectingSink::new());
    let config = SchedulerConfig {
        worker_threads: 4,
        watchdog_poll_ticks: 20,
        ..Default::default()
    };
    let mut warden = Warden::init(config, sink.clone()).expect("init");
    let kernel = warden
        .register_kernel(
            common::rf(0.2),
            PeriodClass::P10,
            Spin::new("shared", Duration::from_micros(100)),
        )
        .expect("register");

    let probe = Arc::new(OverlapProbe::default());
    for name in ["first", "second", "third"] {
        warden
            .register_software_component(name, PeriodClass::P1, probe.clone(), Some(kernel))
            .expect("register component");
    }

    warden.start().expect("start");
    tokio::time::sleep(Duration::from_millis(150)).await;
    warden.stop().await.expect("stop");

    assert!(probe.runs.load(Ordering::SeqCst) > 0);
    assert_eq!(probe.max_in_flight.load(Ordering::SeqCst), 1);
    // each 3ms run blocks the others for several 1ms ticks
    assert!(sink.count(|e| matches!(e, SchedulerEvent::DeadlineMissed { swc: Some(_), .. })) > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_lifecycle_runs_workloads_to_completion() {
    let sink = Arc::new(CollectingSink::new());
    let config = SchedulerConfig {
        watchdog_poll_ticks: 10,
        ..Default::default()
    };
    let mut warden = Warden::init(config, sink.clone()).expect("init");

    let matmul = warden
        .register_kernel(common::rf(0.5), PeriodClass::P2, MatMul::new(32, 4))
        .expect("register matmul");
    let sobel = warden
        .register_kernel(common::rf(0.4), PeriodClass::P5, Sobel::new(16, 8, 2))
        .expect("register sobel");
    warden.bind_kernel("matmul-driver", PeriodClass::P2, matmul).expect("bind");
    warden.bind_kernel("sobel-driver", PeriodClass::P5, sobel).expect("bind");

    let ticks = Arc::new(AtomicU64::new(0));
    let ticks_in_task = ticks.clone();
    let host = warden
        .register_software_component(
            "housekeeping",
            PeriodClass::P10,
            Arc::new(HostTask::new(move |_| {
                ticks_in_task.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
            None,
        )
        .expect("register host task");

    warden.start().expect("start");
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let done = [matmul, sobel]
            .iter()
            .all(|&k| warden.gpu().state(k).map(|s| s.is_terminal()).unwrap_or(false));
        if done {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "workloads did not finish");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    warden.stop().await.expect("stop");

    // exit records arrive once the device threads finish teardown
    while [matmul, sobel]
        .iter()
        .any(|&k| warden.gpu().report(k).map(|r| r.summary.is_none()).unwrap_or(true))
    {
        assert!(std::time::Instant::now() < deadline, "exit records never collected");
        warden.gpu().poll();
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    assert!(ticks.load(Ordering::SeqCst) > 0);
    let components = warden.component_reports();
    assert_eq!(components.len(), 1, "kernel drivers retire with their kernels");
    assert_eq!(components[0].id, host);

    for id in [matmul, sobel] {
        let report = warden.gpu().report(id).expect("report");
        assert_eq!(report.state, KernelState::TerminatedOk);
        assert!(report.summary.is_some());
        assert!(!report.reserved);
    }
    let sobel_report = warden.gpu().report(sobel).expect("report");
    assert_eq!(sobel_report.summary.as_deref(), Some("16x8 edges 12"));

    warden.destroy().await.expect("destroy");
    assert!(warden.kernel_reports().is_empty());
    assert!(warden.component_reports().is_empty());
}
