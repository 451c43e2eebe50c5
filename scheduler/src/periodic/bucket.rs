//! Period buckets

use warden_shared::{PeriodClass, SwcId};

/// Components sharing one period class, in registration order
#[derive(Debug, Clone)]
pub(crate) struct PeriodBucket {
    pub period: PeriodClass,
    pub members: Vec<SwcId>,
}

impl PeriodBucket {
    pub fn new(period: PeriodClass) -> Self {
        Self {
            period,
            members: Vec::new(),
        }
    }

    pub fn is_due(&self, tick: u64) -> bool {
        self.period.is_due(tick)
    }

    pub fn remove(&mut self, swc: SwcId) -> bool {
        let before = self.members.len();
        self.members.retain(|&m| m != swc);
        self.members.len() != before
    }
}
