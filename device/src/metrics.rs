//! Device-side counters

/// Counters kept by one kernel's control loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    /// Workload steps completed
    pub iterations: u64,

    /// Checkpoints signalled (equals the final liveness value)
    pub checkpoints: u64,

    pub suspensions: u64,
    pub resumptions: u64,
}

impl DeviceStats {
    /// Fraction of checkpoints that advanced the workload
    pub fn progress_ratio(&self) -> f64 {
        if self.checkpoints == 0 {
            return 0.0;
        }
        self.iterations as f64 / self.checkpoints as f64
    }
}
