//! Point-in-time reports for the observability surface

use super::kernel::{KernelId, KernelState, SwcId};
use super::period::PeriodClass;
use super::resource::ResourceFactor;
use serde::{Deserialize, Serialize};

/// Snapshot of one kernel descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelReport {
    pub id: KernelId,
    pub state: KernelState,
    pub period: PeriodClass,

    /// Factor declared at registration
    pub declared: ResourceFactor,

    /// Declared factor scaled by the observed ACTIVE duty cycle
    pub measured: ResourceFactor,

    /// Whether the kernel currently holds a capacity reservation
    pub reserved: bool,

    /// Most recent liveness samples, oldest first
    pub liveness_history: Vec<u64>,

    pub dispatches: u64,
    pub deferrals: u64,
    pub missed_deadlines: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,

    /// Result summary reported by the workload when it finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Snapshot of one software component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentReport {
    pub id: SwcId,
    pub name: String,
    pub period: PeriodClass,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel: Option<KernelId>,

    pub runs: u64,
    pub retries: u64,
    pub failures: u64,
    pub missed_deadlines: u64,
    pub next_due: u64,
}
