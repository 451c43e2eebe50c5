//! Persistent kernel runtime
//!
//! A persistent kernel is launched once and then parked, resumed, suspended
//! and finally terminated by the host through its checkpoint barrier. This
//! crate provides the device-side control loop, the `Workload` contract that
//! compute bodies implement, launch and reset of device execution contexts,
//! and a handful of reference workloads.

pub mod kernel;
pub mod launch;
pub mod metrics;
pub mod workload;
pub mod workloads;

pub use kernel::{next_state, KernelExit, PersistentKernel, RuntimeOptions};
pub use launch::{launch, DeviceContext};
pub use metrics::DeviceStats;
pub use workload::{Step, Workload};
