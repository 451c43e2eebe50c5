//! The Warden context
//!
//! Owns both schedulers and drives their lifecycle:
//! `init` -> (`register_*`, `schedule`)* -> `start` -> `stop` -> `destroy`.
//! Calling an operation in the wrong phase is a `Lifecycle` error.

use crate::config::SchedulerConfig;
use crate::gpu::GpuScheduler;
use crate::periodic::{DispatchKernel, PeriodicScheduler, SwcTask, WorkerPool};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use warden_device::Workload;
use warden_shared::{
    ComponentReport, EventSink, KernelId, KernelReport, PeriodClass, ResourceFactor, Result, SwcId,
    WardenError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initialized,
    Running,
    Stopped,
    Destroyed,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Destroyed => "destroyed",
        }
    }
}

struct TickLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct Warden {
    gpu: Arc<GpuScheduler>,
    periodic: Arc<PeriodicScheduler>,
    phase: Phase,
    tick_loop: Option<TickLoop>,
}

impl Warden {
    /// Validate `config` and build both schedulers. Configuration errors
    /// are the only globally fatal errors.
    pub fn init(config: SchedulerConfig, sink: Arc<dyn EventSink>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| WardenError::InvalidConfig(format!("{:#}", e)))?;

        let gpu = Arc::new(GpuScheduler::new(config.clone(), Arc::clone(&sink)));
        let periodic = Arc::new(PeriodicScheduler::new(config, Arc::clone(&gpu), sink));
        info!("Warden initialized");

        Ok(Self {
            gpu,
            periodic,
            phase: Phase::Initialized,
            tick_loop: None,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &SchedulerConfig {
        self.gpu.config()
    }

    pub fn gpu(&self) -> &Arc<GpuScheduler> {
        &self.gpu
    }

    pub fn periodic(&self) -> &Arc<PeriodicScheduler> {
        &self.periodic
    }

    pub fn tick(&self) -> u64 {
        self.periodic.tick()
    }

    pub fn register_kernel<W: Workload>(
        &self,
        factor: ResourceFactor,
        period: PeriodClass,
        workload: W,
    ) -> Result<KernelId> {
        self.require_any(&[Phase::Initialized, Phase::Running], "initialized or running")?;
        self.gpu.register_kernel(factor, period, workload)
    }

    /// Register a periodic unit of work, optionally bound to a kernel
    pub fn register_software_component(
        &self,
        name: impl Into<String>,
        period: PeriodClass,
        task: Arc<dyn SwcTask>,
        kernel: Option<KernelId>,
    ) -> Result<SwcId> {
        self.require_any(&[Phase::Initialized, Phase::Running], "initialized or running")?;
        if let Some(kernel) = kernel {
            if !self.gpu.contains(kernel) {
                return Err(WardenError::UnknownKernel(kernel));
            }
        }
        self.periodic.register(name, period, kernel, task)
    }

    /// Register a component that keeps `kernel` dispatched every period
    pub fn bind_kernel(
        &self,
        name: impl Into<String>,
        period: PeriodClass,
        kernel: KernelId,
    ) -> Result<SwcId> {
        self.register_software_component(name, period, Arc::new(DispatchKernel), Some(kernel))
    }

    /// Terminate and remove a kernel together with the components bound
    /// to it
    pub async fn deregister(&self, kernel: KernelId) -> Result<KernelReport> {
        self.require_not_destroyed()?;
        let components = self.periodic.deregister_kernel(kernel);
        if !components.is_empty() {
            info!(kernel = %kernel, components = components.len(), "Removed bound components");
        }
        self.gpu.deregister(kernel).await
    }

    pub fn deregister_component(&self, swc: SwcId) -> Result<ComponentReport> {
        self.require_not_destroyed()?;
        let report = self.periodic.deregister(swc)?;
        if let Some(kernel) = report.kernel {
            let still_bound = self.periodic.reports().iter().any(|r| r.kernel == Some(kernel));
            if !still_bound {
                self.gpu.withdraw_claim(kernel);
            }
        }
        Ok(report)
    }

    /// Launch the tick loop and the worker pool on the current runtime
    pub fn start(&mut self) -> Result<()> {
        self.require_any(&[Phase::Initialized], "initialized")?;

        let config = self.gpu.config();
        let pool = WorkerPool::spawn(
            config.worker_threads,
            config.job_queue_depth(),
            Arc::clone(&self.periodic),
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&self.periodic).run(pool, cancel.clone()));

        self.tick_loop = Some(TickLoop { cancel, handle });
        self.phase = Phase::Running;
        info!("Warden started");
        Ok(())
    }

    /// Run one scheduling pass by hand. Only valid before `start`.
    pub async fn schedule(&self) -> Result<u64> {
        self.require_any(&[Phase::Initialized], "initialized")?;
        Ok(self.periodic.run_once().await)
    }

    /// Stop the tick loop, drain the pool and terminate every live kernel
    pub async fn stop(&mut self) -> Result<()> {
        self.require_any(&[Phase::Initialized, Phase::Running], "initialized or running")?;

        if let Some(tick_loop) = self.tick_loop.take() {
            tick_loop.cancel.cancel();
            if let Err(e) = tick_loop.handle.await {
                warn!("Tick loop task failed: {}", e);
            }
        }

        for kernel in self.gpu.live_kernels() {
            match self.gpu.terminate(kernel).await {
                Ok(state) => info!(kernel = %kernel, state = %state, "Kernel stopped"),
                Err(e) => warn!(kernel = %kernel, "Kernel did not stop cleanly: {}", e),
            }
        }

        self.phase = Phase::Stopped;
        info!(tick = self.tick(), "Warden stopped");
        Ok(())
    }

    /// Drop every descriptor and component. Only valid once stopped.
    pub async fn destroy(&mut self) -> Result<()> {
        self.require_any(&[Phase::Stopped], "stopped")?;

        for report in self.periodic.reports() {
            self.periodic.deregister(report.id)?;
        }
        for kernel in self.gpu.kernel_ids() {
            if let Err(e) = self.gpu.deregister(kernel).await {
                warn!(kernel = %kernel, "Failed to deregister kernel: {}", e);
            }
        }

        self.phase = Phase::Destroyed;
        info!("Warden destroyed");
        Ok(())
    }

    pub fn kernel_reports(&self) -> Vec<KernelReport> {
        self.gpu.reports()
    }

    pub fn component_reports(&self) -> Vec<ComponentReport> {
        self.periodic.reports()
    }

    fn require_any(&self, allowed: &[Phase], expected: &'static str) -> Result<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(WardenError::Lifecycle {
                expected,
                actual: self.phase.label(),
            })
        }
    }

    fn require_not_destroyed(&self) -> Result<()> {
        self.require_any(
            &[Phase::Initialized, Phase::Running, Phase::Stopped],
            "not destroyed",
        )
    }
}

impl Drop for Warden {
    fn drop(&mut self) {
        if let Some(tick_loop) = self.tick_loop.take() {
            tick_loop.cancel.cancel();
        }
    }
}
