//! Kernel descriptors

use super::policy::Priority;
use super::watchdog::Watchdog;
use tokio::time::Instant;
use warden_device::DeviceContext;
use warden_shared::{
    Command, HostEndpoint, KernelId, KernelReport, KernelState, PeriodClass, ResourceFactor,
};

/// Everything the GPU scheduler knows about one persistent kernel.
///
/// `state` is the last status observed through the barrier, not a
/// prediction; commands become visible in it only once the device acts.
#[derive(Debug)]
pub(crate) struct KernelDescriptor {
    pub id: KernelId,
    pub period: PeriodClass,
    pub declared: ResourceFactor,
    pub state: KernelState,
    pub host: HostEndpoint,
    pub device: Option<DeviceContext>,
    pub watchdog: Watchdog,

    /// Holds `declared` in the running capacity sum
    pub reserved: bool,
    /// Waiting for capacity freed by suspending lower-priority kernels.
    /// Kernels it outranks may not resume into that capacity.
    pub claiming: bool,
    pub terminating: bool,
    pub hung: bool,
    /// Last time the watchdog looked at this kernel
    pub last_watch: Option<Instant>,

    pub consecutive_deferrals: u32,
    pub dispatches: u64,
    pub deferrals: u64,
    pub missed_deadlines: u64,

    pub fault: Option<String>,
    pub fault_reported: bool,
    pub summary: Option<String>,
}

impl KernelDescriptor {
    pub fn new(
        id: KernelId,
        period: PeriodClass,
        declared: ResourceFactor,
        host: HostEndpoint,
        device: DeviceContext,
        watchdog: Watchdog,
    ) -> Self {
        Self {
            id,
            period,
            declared,
            state: KernelState::Init,
            host,
            device: Some(device),
            watchdog,
            reserved: false,
            claiming: false,
            terminating: false,
            hung: false,
            last_watch: None,
            consecutive_deferrals: 0,
            dispatches: 0,
            deferrals: 0,
            missed_deadlines: 0,
            fault: None,
            fault_reported: false,
            summary: None,
        }
    }

    /// Sort key for preemption. Lower keys win: shorter periods first, then
    /// earlier registration (ids are handed out in registration order).
    pub fn priority(&self) -> Priority {
        (self.period, self.id)
    }

    pub fn pending(&self) -> Command {
        self.host.last_command()
    }

    /// Declared factor scaled by the fraction of watchdog polls that found
    /// the kernel ACTIVE
    pub fn measured(&self) -> ResourceFactor {
        let (active, polls) = self.watchdog.duty_cycle();
        self.declared.scale(active, polls)
    }

    pub fn report(&self) -> KernelReport {
        KernelReport {
            id: self.id,
            state: self.state,
            period: self.period,
            declared: self.declared,
            measured: self.measured(),
            reserved: self.reserved,
            liveness_history: self.watchdog.history(),
            dispatches: self.dispatches,
            deferrals: self.deferrals,
            missed_deadlines: self.missed_deadlines,
            fault: self.fault.clone(),
            summary: self.summary.clone(),
        }
    }
}
