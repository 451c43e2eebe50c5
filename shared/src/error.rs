//! Error type shared across Warden crates

use crate::types::kernel::{Command, KernelId, KernelState, SwcId};
use crate::types::period::PeriodClass;
use crate::types::resource::ResourceFactor;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WardenError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WardenError {
    /// Admission refused. Recoverable: retry with a smaller factor or after
    /// other kernels release capacity.
    #[error("capacity exceeded: requested {requested}, available {available} of {capacity}")]
    CapacityExceeded {
        requested: ResourceFactor,
        available: ResourceFactor,
        capacity: ResourceFactor,
    },

    #[error("{swc} missed its deadline at tick {tick}")]
    DeadlineMissed { swc: SwcId, tick: u64 },

    #[error("tick {tick} took {elapsed_us}us, budget is {budget_us}us")]
    TimingOverrun {
        tick: u64,
        elapsed_us: u64,
        budget_us: u64,
    },

    #[error("{kernel} hung: liveness stuck at {liveness} for {polls} polls")]
    KernelHung {
        kernel: KernelId,
        liveness: u64,
        polls: u32,
    },

    #[error("{kernel} workload fault: {reason}")]
    WorkloadFault { kernel: KernelId, reason: String },

    #[error("illegal {command} for {kernel} in state {state}")]
    IllegalTransition {
        kernel: KernelId,
        state: KernelState,
        command: Command,
    },

    #[error("unknown kernel {0}")]
    UnknownKernel(KernelId),

    #[error("unknown software component {0}")]
    UnknownComponent(SwcId),

    #[error("TERMINATE already in flight for {0}")]
    TerminateInFlight(KernelId),

    #[error("invalid resource factor: {0}")]
    InvalidResourceFactor(String),

    #[error("invalid period class: {0} ticks")]
    InvalidPeriod(u64),

    #[error("period class {0} is not enabled")]
    PeriodDisabled(PeriodClass),

    #[error("device launch failed for {kernel}: {reason}")]
    DeviceLaunch { kernel: KernelId, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("framework is {actual}, operation requires {expected}")]
    Lifecycle {
        expected: &'static str,
        actual: &'static str,
    },
}

impl WardenError {
    /// Kernel the error is attributed to, if any
    pub fn kernel(&self) -> Option<KernelId> {
        match self {
            Self::KernelHung { kernel, .. }
            | Self::WorkloadFault { kernel, .. }
            | Self::IllegalTransition { kernel, .. }
            | Self::DeviceLaunch { kernel, .. } => Some(*kernel),
            Self::UnknownKernel(kernel) | Self::TerminateInFlight(kernel) => Some(*kernel),
            _ => None,
        }
    }

    /// Whether the condition is reported and the system carries on
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::CapacityExceeded { .. } | Self::DeadlineMissed { .. } | Self::TimingOverrun { .. }
        )
    }
}
