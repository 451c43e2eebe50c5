//! Host-side scheduling for Warden
//!
//! The GPU scheduler admits persistent kernels against a shared capacity,
//! dispatches and preempts them through their barriers, and watches them
//! for hangs. The periodic scheduler drives software components from a
//! fixed-resolution tick. `Warden` ties both together behind a lifecycle.

pub mod config;
pub mod framework;
pub mod gpu;
pub mod periodic;

pub use config::SchedulerConfig;
pub use framework::{Phase, Warden};
pub use gpu::{DispatchOutcome, GpuScheduler};
pub use periodic::{
    DispatchKernel, HostTask, PeriodicScheduler, SwcTask, TaskContext, TaskOutcome, WorkerPool,
};
