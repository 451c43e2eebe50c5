//! Scheduler events
//!
//! Everything observable about a running system is expressed as a
//! `SchedulerEvent` and handed to an `EventSink`. Reported-not-fatal
//! conditions (missed deadlines, overruns, hung kernels, workload faults)
//! only ever surface here; nothing is swallowed.

use super::kernel::{Command, KernelId, KernelState, SwcId};
use super::period::PeriodClass;
use super::resource::ResourceFactor;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Why a dispatch request did not resume its kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferReason {
    /// Kernel is still in INIT or a SUSPEND has not been acknowledged yet
    NotReady,
    /// Residual capacity too small and nothing lower-priority to preempt
    Capacity,
    /// Lower-priority kernels were told to suspend to make room
    Preempting,
}

impl DeferReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotReady => "not_ready",
            Self::Capacity => "capacity",
            Self::Preempting => "preempting",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchedulerEvent {
    KernelRegistered {
        kernel: KernelId,
        factor: ResourceFactor,
        period: PeriodClass,
    },
    StateChanged {
        kernel: KernelId,
        from: KernelState,
        to: KernelState,
    },
    CommandIssued {
        kernel: KernelId,
        command: Command,
    },
    Dispatched {
        kernel: KernelId,
        tick: u64,
    },
    Deferred {
        kernel: KernelId,
        tick: u64,
        reason: DeferReason,
        consecutive: u32,
    },
    Preempted {
        victim: KernelId,
        by: KernelId,
    },
    DeadlineMissed {
        kernel: Option<KernelId>,
        swc: Option<SwcId>,
        tick: u64,
    },
    TimingOverrun {
        tick: u64,
        elapsed_us: u64,
        budget_us: u64,
        skipped_ticks: u64,
    },
    KernelHung {
        kernel: KernelId,
        liveness: u64,
        polls: u32,
    },
    WorkloadFault {
        kernel: KernelId,
        reason: String,
    },
    CapacityReserved {
        kernel: KernelId,
        factor: ResourceFactor,
        total: ResourceFactor,
    },
    CapacityReleased {
        kernel: KernelId,
        factor: ResourceFactor,
        total: ResourceFactor,
    },
    KernelDeregistered {
        kernel: KernelId,
    },
}

impl SchedulerEvent {
    /// Kernel the event is attributed to, if any
    pub fn kernel(&self) -> Option<KernelId> {
        match self {
            Self::KernelRegistered { kernel, .. }
            | Self::StateChanged { kernel, .. }
            | Self::CommandIssued { kernel, .. }
            | Self::Dispatched { kernel, .. }
            | Self::Deferred { kernel, .. }
            | Self::KernelHung { kernel, .. }
            | Self::WorkloadFault { kernel, .. }
            | Self::CapacityReserved { kernel, .. }
            | Self::CapacityReleased { kernel, .. }
            | Self::KernelDeregistered { kernel } => Some(*kernel),
            Self::Preempted { victim, .. } => Some(*victim),
            Self::DeadlineMissed { kernel, .. } => *kernel,
            Self::TimingOverrun { .. } => None,
        }
    }

    /// Stable snake_case name, matching the serialized `kind` tag
    pub fn name(&self) -> &'static str {
        match self {
            Self::KernelRegistered { .. } => "kernel_registered",
            Self::StateChanged { .. } => "state_changed",
            Self::CommandIssued { .. } => "command_issued",
            Self::Dispatched { .. } => "dispatched",
            Self::Deferred { .. } => "deferred",
            Self::Preempted { .. } => "preempted",
            Self::DeadlineMissed { .. } => "deadline_missed",
            Self::TimingOverrun { .. } => "timing_overrun",
            Self::KernelHung { .. } => "kernel_hung",
            Self::WorkloadFault { .. } => "workload_fault",
            Self::CapacityReserved { .. } => "capacity_reserved",
            Self::CapacityReleased { .. } => "capacity_released",
            Self::KernelDeregistered { .. } => "kernel_deregistered",
        }
    }

    /// Whether the event reports a failure rather than normal progress
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            Self::DeadlineMissed { .. }
                | Self::TimingOverrun { .. }
                | Self::KernelHung { .. }
                | Self::WorkloadFault { .. }
        )
    }
}

/// Receiver of scheduler events.
///
/// Sinks are called outside the scheduler's critical section but possibly
/// from several worker tasks at once, so implementations must be cheap and
/// thread-safe.
pub trait EventSink: Send + Sync {
    fn record(&self, event: SchedulerEvent);

    /// Time spent processing one tick, whether or not it overran
    fn tick_processed(&self, _tick: u64, _elapsed: Duration) {}
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn record(&self, _event: SchedulerEvent) {}
}

/// Keeps every event in memory, in arrival order
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<SchedulerEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SchedulerEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn take(&self) -> Vec<SchedulerEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&SchedulerEvent) -> bool,
    {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| predicate(event))
            .count()
    }
}

impl EventSink for CollectingSink {
    fn record(&self, event: SchedulerEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }
}
