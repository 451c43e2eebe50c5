//! Software components and the jobs cut from them

use super::task::SwcTask;
use std::fmt;
use std::sync::Arc;
use warden_shared::{ComponentReport, KernelId, PeriodClass, SwcId};

pub(crate) struct SoftwareComponent {
    pub id: SwcId,
    pub name: String,
    pub period: PeriodClass,
    pub kernel: Option<KernelId>,
    pub task: Arc<dyn SwcTask>,

    /// Due tick of the occurrence waiting for a worker, if any
    pub pending_since: Option<u64>,
    /// An occurrence is on the worker pool
    pub running: bool,
    pub next_due: u64,

    pub runs: u64,
    pub retries: u64,
    pub failures: u64,
    pub missed_deadlines: u64,
}

impl SoftwareComponent {
    pub fn new(
        id: SwcId,
        name: String,
        period: PeriodClass,
        kernel: Option<KernelId>,
        task: Arc<dyn SwcTask>,
        next_due: u64,
    ) -> Self {
        Self {
            id,
            name,
            period,
            kernel,
            task,
            pending_since: None,
            running: false,
            next_due,
            runs: 0,
            retries: 0,
            failures: 0,
            missed_deadlines: 0,
        }
    }

    pub fn report(&self) -> ComponentReport {
        ComponentReport {
            id: self.id,
            name: self.name.clone(),
            period: self.period,
            kernel: self.kernel,
            runs: self.runs,
            retries: self.retries,
            failures: self.failures,
            missed_deadlines: self.missed_deadlines,
            next_due: self.next_due,
        }
    }
}

impl fmt::Debug for SoftwareComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareComponent")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("period", &self.period)
            .field("kernel", &self.kernel)
            .field("pending_since", &self.pending_since)
            .field("running", &self.running)
            .field("next_due", &self.next_due)
            .finish_non_exhaustive()
    }
}

/// One occurrence of a component, handed to a worker
#[derive(Clone)]
pub struct Job {
    pub swc: SwcId,
    pub kernel: Option<KernelId>,
    /// Tick the occurrence became due
    pub due: u64,
    /// Tick the occurrence was handed out
    pub tick: u64,
    pub task: Arc<dyn SwcTask>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("swc", &self.swc)
            .field("kernel", &self.kernel)
            .field("due", &self.due)
            .field("tick", &self.tick)
            .finish_non_exhaustive()
    }
}

/// An occurrence that was never serviced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Miss {
    pub swc: SwcId,
    pub kernel: Option<KernelId>,
    /// Due tick of the missed occurrence
    pub due: u64,
}
