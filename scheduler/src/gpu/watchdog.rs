//! Liveness watchdog
//!
//! The watchdog only looks at liveness deltas between consecutive polls of
//! the same kernel. A kernel is stalled on a poll when it was ACTIVE on the
//! previous poll and is still ACTIVE with an unchanged counter; it is hung
//! once `threshold` such polls happen back to back. Parked kernels never
//! stall, because they are not expected to checkpoint.

use std::collections::VecDeque;
use warden_shared::{BarrierSnapshot, KernelState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Healthy,
    Stalled { polls: u32 },
    Hung { liveness: u64, polls: u32 },
}

#[derive(Debug, Clone)]
pub struct Watchdog {
    threshold: u32,
    last: Option<BarrierSnapshot>,
    stalled: u32,
    history: VecDeque<u64>,
    history_len: usize,
    polls: u64,
    active_polls: u64,
}

impl Watchdog {
    pub fn new(threshold: u32, history_len: usize) -> Self {
        Self {
            threshold,
            last: None,
            stalled: 0,
            history: VecDeque::with_capacity(history_len),
            history_len,
            polls: 0,
            active_polls: 0,
        }
    }

    /// Feed one poll result and judge it
    pub fn observe(&mut self, snapshot: BarrierSnapshot) -> Verdict {
        if self.history.len() == self.history_len {
            self.history.pop_front();
        }
        self.history.push_back(snapshot.liveness);
        self.polls += 1;

        let was_active = matches!(self.last, Some(prev) if prev.status == KernelState::Active);
        let unchanged = matches!(self.last, Some(prev) if prev.liveness == snapshot.liveness);
        self.last = Some(snapshot);

        if snapshot.status != KernelState::Active {
            self.stalled = 0;
            return Verdict::Healthy;
        }
        self.active_polls += 1;

        if was_active && unchanged {
            self.stalled += 1;
        } else {
            self.stalled = 0;
            return Verdict::Healthy;
        }

        if self.stalled >= self.threshold {
            Verdict::Hung {
                liveness: snapshot.liveness,
                polls: self.stalled,
            }
        } else {
            Verdict::Stalled {
                polls: self.stalled,
            }
        }
    }

    /// Liveness samples, oldest first
    pub fn history(&self) -> Vec<u64> {
        self.history.iter().copied().collect()
    }

    pub fn stalled_polls(&self) -> u32 {
        self.stalled
    }

    /// (polls seen ACTIVE, polls seen)
    pub fn duty_cycle(&self) -> (u64, u64) {
        (self.active_polls, self.polls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active(liveness: u64) -> BarrierSnapshot {
        BarrierSnapshot {
            status: KernelState::Active,
            liveness,
        }
    }

    #[test]
    fn test_hung_on_third_poll_after_stall() {
        // progress on polls 1 and 2, then the counter freezes
        let mut watchdog = Watchdog::new(3, 8);
        assert_eq!(watchdog.observe(active(4)), Verdict::Healthy);
        assert_eq!(watchdog.observe(active(9)), Verdict::Healthy);
        assert_eq!(watchdog.observe(active(9)), Verdict::Stalled { polls: 1 });
        assert_eq!(watchdog.observe(active(9)), Verdict::Stalled { polls: 2 });
        assert_eq!(
            watchdog.observe(active(9)),
            Verdict::Hung {
                liveness: 9,
                polls: 3
            }
        );
    }

    #[test]
    fn test_progress_resets_stall() {
        let mut watchdog = Watchdog::new(3, 8);
        watchdog.observe(active(1));
        watchdog.observe(active(1));
        watchdog.observe(active(1));
        assert_eq!(watchdog.stalled_polls(), 2);
        assert_eq!(watchdog.observe(active(2)), Verdict::Healthy);
        assert_eq!(watchdog.stalled_polls(), 0);
    }

    #[test]
    fn test_parked_kernels_never_stall() {
        let mut watchdog = Watchdog::new(1, 8);
        let suspended = BarrierSnapshot {
            status: KernelState::Suspended,
            liveness: 5,
        };
        for _ in 0..10 {
            assert_eq!(watchdog.observe(suspended), Verdict::Healthy);
        }
        // first ACTIVE poll after parking is a fresh baseline
        assert_eq!(watchdog.observe(active(5)), Verdict::Healthy);
        assert_eq!(watchdog.observe(active(5)), Verdict::Hung { liveness: 5, polls: 1 });
    }

    #[test]
    fn test_history_is_bounded() {
        let mut watchdog = Watchdog::new(3, 3);
        for liveness in 1..=5 {
            watchdog.observe(active(liveness));
        }
        assert_eq!(watchdog.history(), vec![3, 4, 5]);
        assert_eq!(watchdog.duty_cycle(), (5, 5));
    }
}
