//! Preemption policy
//!
//! Shorter period classes outrank longer ones and earlier registration
//! wins ties. This is the only place that decides who gets suspended when
//! capacity is contended.

use warden_shared::{KernelId, PeriodClass, ResourceFactor};

/// Lower sorts first and means higher priority
pub type Priority = (PeriodClass, KernelId);

/// A running kernel that could be suspended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub id: KernelId,
    pub priority: Priority,
    pub factor: ResourceFactor,
}

/// Pick kernels to suspend so that `shortfall` capacity is freed for a
/// kernel with priority `requester`.
///
/// Only kernels the requester strictly outranks are eligible, lowest
/// priority first. Returns `None` if suspending every eligible kernel would
/// still not free enough, in which case nobody should be suspended.
pub fn select_victims(
    requester: Priority,
    shortfall: ResourceFactor,
    candidates: &[Candidate],
) -> Option<Vec<KernelId>> {
    let mut eligible: Vec<&Candidate> = candidates
        .iter()
        .filter(|c| c.priority > requester)
        .collect();
    eligible.sort_by(|a, b| b.priority.cmp(&a.priority));

    let mut freed = ResourceFactor::ZERO;
    let mut victims = Vec::new();
    for candidate in eligible {
        if freed >= shortfall {
            break;
        }
        freed = freed.saturating_add(candidate.factor);
        victims.push(candidate.id);
    }

    (freed >= shortfall).then_some(victims)
}
