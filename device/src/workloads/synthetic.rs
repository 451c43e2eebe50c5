//! Synthetic workloads for scenarios and tests

use crate::workload::{Step, Workload};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Burns a fixed amount of time per step, optionally for a bounded number
/// of steps
#[derive(Debug, Clone)]
pub struct Spin {
    name: String,
    step_time: Duration,
    iterations: Option<u64>,
    done: u64,
}

impl Spin {
    pub fn new(name: impl Into<String>, step_time: Duration) -> Self {
        Self {
            name: name.into(),
            step_time,
            iterations: None,
            done: 0,
        }
    }

    pub fn with_iterations(mut self, iterations: u64) -> Self {
        self.iterations = Some(iterations);
        self
    }
}

impl Workload for Spin {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self) -> Step {
        if !self.step_time.is_zero() {
            thread::sleep(self.step_time);
        }
        self.done += 1;
        match self.iterations {
            Some(limit) if self.done >= limit => Step::Done,
            _ => Step::Continue,
        }
    }

    fn summary(&self) -> Option<String> {
        Some(format!("{} iterations", self.done))
    }
}

/// Makes progress for a number of steps, then blocks inside a step without
/// reaching its next checkpoint until released
#[derive(Debug)]
pub struct Stall {
    healthy_steps: u64,
    step_time: Duration,
    steps: u64,
    released: Arc<AtomicBool>,
}

/// Unblocks a stalled workload
#[derive(Debug, Clone)]
pub struct StallRelease(Arc<AtomicBool>);

impl StallRelease {
    pub fn release(&self) {
        self.0.store(true, Ordering::Release);
    }
}

impl Stall {
    pub fn new(healthy_steps: u64, step_time: Duration) -> Self {
        Self {
            healthy_steps,
            step_time,
            steps: 0,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn release_handle(&self) -> StallRelease {
        StallRelease(Arc::clone(&self.released))
    }
}

impl Workload for Stall {
    fn name(&self) -> &str {
        "stall"
    }

    fn step(&mut self) -> Step {
        self.steps += 1;
        if self.steps > self.healthy_steps {
            while !self.released.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(1));
            }
        } else if !self.step_time.is_zero() {
            thread::sleep(self.step_time);
        }
        Step::Continue
    }
}

/// Reports a fault after a number of good steps
#[derive(Debug, Clone)]
pub struct Faulty {
    after: u64,
    steps: u64,
}

impl Faulty {
    pub fn new(after: u64) -> Self {
        Self { after, steps: 0 }
    }
}

impl Workload for Faulty {
    fn name(&self) -> &str {
        "faulty"
    }

    fn step(&mut self) -> Step {
        if self.steps >= self.after {
            return Step::Fault(format!("injected fault after {} steps", self.steps));
        }
        self.steps += 1;
        Step::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spin_bounded() {
        let mut spin = Spin::new("s", Duration::ZERO).with_iterations(2);
        assert_eq!(spin.step(), Step::Continue);
        assert_eq!(spin.step(), Step::Done);
        assert_eq!(spin.summary().as_deref(), Some("2 iterations"));
    }

    #[test]
    fn test_faulty() {
        let mut faulty = Faulty::new(1);
        assert_eq!(faulty.step(), Step::Continue);
        assert!(matches!(faulty.step(), Step::Fault(_)));
    }

    #[test]
    fn test_stall_released() {
        let mut stall = Stall::new(1, Duration::ZERO);
        stall.release_handle().release();
        assert_eq!(stall.step(), Step::Continue);
        // released before the stall began, so the blocking step returns at once
        assert_eq!(stall.step(), Step::Continue);
    }
}
