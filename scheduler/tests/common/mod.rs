//! Helpers shared by the scheduler integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use warden_scheduler::GpuScheduler;
use warden_shared::{
    CollectingSink, EventSink, KernelId, KernelState, ResourceFactor, SchedulerEvent,
};

pub fn rf(ratio: f64) -> ResourceFactor {
    ResourceFactor::from_f64(ratio).expect("valid resource factor")
}

/// Poll `id` until it reaches `state` or five seconds pass
pub async fn wait_state(gpu: &GpuScheduler, id: KernelId, state: KernelState) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if gpu.poll_kernel(id).expect("known kernel") == state {
            return;
        }
        assert!(Instant::now() < deadline, "{} never reached {}", id, state);
        tokio::time::sleep(Duration::from_micros(200)).await;
    }
}

/// Wait until `sink` has seen an event matching `pred`
pub async fn wait_event<F>(sink: &CollectingSink, pred: F)
where
    F: Fn(&SchedulerEvent) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while sink.count(&pred) == 0 {
        assert!(Instant::now() < deadline, "event never observed");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Checks reservation bookkeeping as events arrive: the running total never
/// exceeds capacity, and every kernel alternates reserve and release.
pub struct CapacityAudit {
    capacity: ResourceFactor,
    inner: Mutex<AuditState>,
    events: CollectingSink,
}

#[derive(Default)]
struct AuditState {
    held: HashMap<KernelId, bool>,
    peak: ResourceFactor,
    violations: Vec<String>,
}

impl CapacityAudit {
    pub fn new(capacity: ResourceFactor) -> Self {
        Self {
            capacity,
            inner: Mutex::new(AuditState::default()),
            events: CollectingSink::new(),
        }
    }

    pub fn peak(&self) -> ResourceFactor {
        self.inner.lock().unwrap().peak
    }

    pub fn violations(&self) -> Vec<String> {
        self.inner.lock().unwrap().violations.clone()
    }

    pub fn events(&self) -> &CollectingSink {
        &self.events
    }
}

impl EventSink for CapacityAudit {
    fn record(&self, event: SchedulerEvent) {
        {
            let mut state = self.inner.lock().unwrap();
            match &event {
                SchedulerEvent::CapacityReserved { kernel, total, .. } => {
                    if state.held.insert(*kernel, true) == Some(true) {
                        state.violations.push(format!("{} reserved twice", kernel));
                    }
                    if *total > self.capacity {
                        state.violations.push(format!("total {} over capacity", total));
                    }
                    state.peak = state.peak.max(*total);
                }
                SchedulerEvent::CapacityReleased { kernel, .. } => {
                    if state.held.insert(*kernel, false) != Some(true) {
                        state.violations.push(format!("{} released without reservation", kernel));
                    }
                }
                _ => {}
            }
        }
        self.events.record(event);
    }
}
