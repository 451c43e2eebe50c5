//! Software component task bodies

use crate::gpu::{DispatchOutcome, GpuScheduler};
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};
use warden_shared::{KernelId, SwcId, WardenError};

/// What a task run did with its occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The occurrence is serviced
    Done,
    /// The occurrence could not be serviced yet; try again next tick
    Retry,
    /// The occurrence was given up on and counts as missed
    Missed,
    /// The component has nothing left to do and should be removed
    Retire,
}

/// Everything a task body gets to see
pub struct TaskContext<'a> {
    pub gpu: &'a GpuScheduler,
    pub swc: SwcId,
    pub kernel: Option<KernelId>,
    pub tick: u64,
}

/// Body of a software component, run on the worker pool
#[async_trait]
pub trait SwcTask: Send + Sync {
    async fn run(&self, ctx: TaskContext<'_>) -> Result<TaskOutcome>;
}

/// Asks the GPU scheduler to have the bound kernel ACTIVE
#[derive(Debug, Default, Clone, Copy)]
pub struct DispatchKernel;

#[async_trait]
impl SwcTask for DispatchKernel {
    async fn run(&self, ctx: TaskContext<'_>) -> Result<TaskOutcome> {
        let kernel = ctx
            .kernel
            .with_context(|| format!("{} is not bound to a kernel", ctx.swc))?;

        match ctx.gpu.dispatch(kernel, ctx.tick) {
            Ok(DispatchOutcome::Resumed) | Ok(DispatchOutcome::AlreadyActive) => {
                Ok(TaskOutcome::Done)
            }
            Ok(DispatchOutcome::Deferred {
                reason,
                consecutive,
                deadline_missed: true,
            }) => {
                warn!(
                    swc = %ctx.swc,
                    kernel = %kernel,
                    reason = reason.label(),
                    consecutive,
                    "Giving up on occurrence"
                );
                Ok(TaskOutcome::Missed)
            }
            Ok(DispatchOutcome::Deferred { reason, .. }) => {
                debug!(
                    swc = %ctx.swc,
                    kernel = %kernel,
                    reason = reason.label(),
                    "Dispatch deferred, retrying"
                );
                Ok(TaskOutcome::Retry)
            }
            Err(WardenError::IllegalTransition { state, .. }) if state.is_terminal() => {
                warn!(
                    swc = %ctx.swc,
                    kernel = %kernel,
                    state = %state,
                    "Bound kernel finished, retiring component"
                );
                Ok(TaskOutcome::Retire)
            }
            Err(e @ (WardenError::UnknownKernel(_) | WardenError::TerminateInFlight(_))) => {
                warn!(swc = %ctx.swc, error = %e, "Retiring component");
                Ok(TaskOutcome::Retire)
            }
            Err(e) => Err(e).with_context(|| format!("dispatch of {} failed", kernel)),
        }
    }
}

/// Host-only logic: a closure called with the current tick
pub struct HostTask<F> {
    body: F,
}

impl<F> HostTask<F>
where
    F: Fn(u64) -> Result<()> + Send + Sync,
{
    pub fn new(body: F) -> Self {
        Self { body }
    }
}

#[async_trait]
impl<F> SwcTask for HostTask<F>
where
    F: Fn(u64) -> Result<()> + Send + Sync,
{
    async fn run(&self, ctx: TaskContext<'_>) -> Result<TaskOutcome> {
        (self.body)(ctx.tick)?;
        Ok(TaskOutcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use warden_shared::NullSink;

    #[tokio::test]
    async fn test_host_task_sees_tick() {
        let gpu = GpuScheduler::new(SchedulerConfig::default(), Arc::new(NullSink));
        let seen = Arc::new(AtomicU64::new(0));
        let seen_in_task = seen.clone();
        let task = HostTask::new(move |tick| {
            seen_in_task.store(tick, Ordering::SeqCst);
            Ok(())
        });

        let ctx = TaskContext {
            gpu: &gpu,
            swc: SwcId(1),
            kernel: None,
            tick: 42,
        };
        assert_eq!(task.run(ctx).await.unwrap(), TaskOutcome::Done);
        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }

    #[tokio::test]
    async fn test_dispatch_requires_binding() {
        let gpu = GpuScheduler::new(SchedulerConfig::default(), Arc::new(NullSink));
        let ctx = TaskContext {
            gpu: &gpu,
            swc: SwcId(3),
            kernel: None,
            tick: 1,
        };
        assert!(DispatchKernel.run(ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_dispatch_retires_on_unknown_kernel() {
        let gpu = GpuScheduler::new(SchedulerConfig::default(), Arc::new(NullSink));
        let ctx = TaskContext {
            gpu: &gpu,
            swc: SwcId(3),
            kernel: Some(KernelId(99)),
            tick: 1,
        };
        assert_eq!(DispatchKernel.run(ctx).await.unwrap(), TaskOutcome::Retire);
    }
}
