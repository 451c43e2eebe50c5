//! Built-in scenarios for `warden run`

use anyhow::{Context, Result};
use clap::ValueEnum;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use warden_device::workloads::{Faulty, MatMul, Sobel, Spin, Stall, StallRelease};
use warden_scheduler::{HostTask, Warden};
use warden_shared::{PeriodClass, ResourceFactor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Matrix multiply, Sobel filter and a background spinner sharing the GPU
    Mixed,
    /// Two kernels whose factors cannot both fit, plus a short-period one
    Contention,
    /// A kernel that stops checkpointing and one that faults
    Stall,
}

/// Handles that must outlive the run
#[derive(Default)]
pub struct Installed {
    pub stalls: Vec<StallRelease>,
    pub host_runs: Arc<AtomicU64>,
}

impl Installed {
    /// Unblock stalled device threads so they can exit
    pub fn release(&self) {
        for stall in &self.stalls {
            stall.release();
        }
    }

    pub fn host_runs(&self) -> u64 {
        self.host_runs.load(Ordering::Relaxed)
    }
}

fn factor(ratio: f64) -> Result<ResourceFactor> {
    ResourceFactor::from_f64(ratio).with_context(|| format!("invalid resource factor {}", ratio))
}

/// Register the scenario's kernels and components with `warden`
pub fn install(warden: &Warden, scenario: Scenario) -> Result<Installed> {
    let mut installed = Installed::default();

    let host_runs = Arc::clone(&installed.host_runs);
    warden.register_software_component(
        "housekeeping",
        PeriodClass::P50,
        Arc::new(HostTask::new(move |_| {
            host_runs.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })),
        None,
    )?;

    match scenario {
        Scenario::Mixed => {
            let matmul =
                warden.register_kernel(factor(0.4)?, PeriodClass::P10, MatMul::new(128, 8))?;
            warden.bind_kernel("matmul", PeriodClass::P10, matmul)?;

            let sobel = warden.register_kernel(
                factor(0.3)?,
                PeriodClass::P20,
                Sobel::new(256, 128, 8),
            )?;
            warden.bind_kernel("sobel", PeriodClass::P20, sobel)?;

            let background = warden.register_kernel(
                factor(0.5)?,
                PeriodClass::P100,
                Spin::new("background", Duration::from_micros(200)),
            )?;
            warden.bind_kernel("background", PeriodClass::P100, background)?;
        }
        Scenario::Contention => {
            let a = warden.register_kernel(
                factor(0.6)?,
                PeriodClass::P10,
                Spin::new("a", Duration::from_micros(200)).with_iterations(2_000),
            )?;
            warden.bind_kernel("a", PeriodClass::P10, a)?;

            let b = warden.register_kernel(
                factor(0.5)?,
                PeriodClass::P10,
                Spin::new("b", Duration::from_micros(200)).with_iterations(2_000),
            )?;
            warden.bind_kernel("b", PeriodClass::P5, b)?;

            let urgent = warden.register_kernel(
                factor(0.3)?,
                PeriodClass::P1,
                Spin::new("urgent", Duration::from_micros(100)),
            )?;
            warden.bind_kernel("urgent", PeriodClass::P1, urgent)?;
        }
        Scenario::Stall => {
            let stall = Stall::new(50, Duration::from_micros(100));
            installed.stalls.push(stall.release_handle());
            let stalled = warden.register_kernel(factor(0.5)?, PeriodClass::P5, stall)?;
            warden.bind_kernel("stall", PeriodClass::P5, stalled)?;

            let faulty = warden.register_kernel(factor(0.2)?, PeriodClass::P10, Faulty::new(100))?;
            warden.bind_kernel("faulty", PeriodClass::P10, faulty)?;

            let healthy = warden.register_kernel(
                factor(0.3)?,
                PeriodClass::P2,
                Spin::new("healthy", Duration::from_micros(100)),
            )?;
            warden.bind_kernel("healthy", PeriodClass::P2, healthy)?;
        }
    }

    Ok(installed)
}
