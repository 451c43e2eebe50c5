//! GPU scheduler
//!
//! Admission and dispatch authority over persistent kernels. The scheduler
//! owns every kernel descriptor and the running sum of reserved resource
//! factors; both are only touched inside one critical section. Events
//! produced inside it are handed to the sink after the lock is released.
//!
//! Capacity is reserved when RESUME is issued and released when the
//! kernel is observed parked after a SUSPEND, observed terminal, or
//! declared hung. Each reservation is released exactly once.

mod descriptor;
pub mod policy;
pub mod watchdog;

use crate::config::SchedulerConfig;
use descriptor::KernelDescriptor;
use policy::{select_victims, Candidate, Priority};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use warden_device::{launch, RuntimeOptions, Workload};
use warden_shared::{
    barrier, BarrierSnapshot, Command, DeferReason, EventSink, KernelId, KernelReport,
    KernelState, PeriodClass, ResourceFactor, Result, SchedulerEvent, WardenError,
};
use watchdog::{Verdict, Watchdog};

/// Result of a dispatch request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// RESUME was issued and capacity reserved
    Resumed,
    /// The kernel already holds a reservation
    AlreadyActive,
    /// Not resumed this time; the caller should retry on a later tick
    Deferred {
        reason: DeferReason,
        consecutive: u32,
        deadline_missed: bool,
    },
}

#[derive(Debug, Default)]
struct GpuState {
    kernels: BTreeMap<KernelId, KernelDescriptor>,
    reserved: ResourceFactor,
    next_id: u64,
}

pub struct GpuScheduler {
    config: SchedulerConfig,
    inner: Mutex<GpuState>,
    sink: Arc<dyn EventSink>,
}

impl GpuScheduler {
    pub fn new(config: SchedulerConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            inner: Mutex::new(GpuState::default()),
            sink,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn capacity(&self) -> ResourceFactor {
        self.config.capacity
    }

    /// Current running sum of reserved resource factors
    pub fn reserved(&self) -> ResourceFactor {
        self.lock().reserved
    }

    /// Launch a kernel for `workload` and create its descriptor in INIT.
    ///
    /// Fails with `CapacityExceeded` only if the factor could never fit, not
    /// because other kernels currently hold capacity.
    pub fn register_kernel<W: Workload>(
        &self,
        factor: ResourceFactor,
        period: PeriodClass,
        workload: W,
    ) -> Result<KernelId> {
        if factor.is_zero() {
            return Err(WardenError::InvalidResourceFactor(
                "resource factor must be greater than 0".to_string(),
            ));
        }
        if !self.config.is_enabled(period) {
            return Err(WardenError::PeriodDisabled(period));
        }

        let capacity = self.config.capacity;
        let mut state = self.lock();
        if factor > capacity {
            return Err(WardenError::CapacityExceeded {
                requested: factor,
                available: capacity.saturating_sub(state.reserved),
                capacity,
            });
        }

        state.next_id += 1;
        let id = KernelId(state.next_id);
        let (host, device) = barrier();
        let options = RuntimeOptions {
            idle_backoff: self.config.device_idle_backoff(),
        };
        let context = launch(id, device, workload, options)?;
        let watchdog = Watchdog::new(self.config.watchdog_threshold, self.config.liveness_history);
        state
            .kernels
            .insert(id, KernelDescriptor::new(id, period, factor, host, context, watchdog));
        drop(state);

        info!(kernel = %id, factor = %factor, period = %period, "Kernel registered");
        self.emit(vec![SchedulerEvent::KernelRegistered {
            kernel: id,
            factor,
            period,
        }]);
        Ok(id)
    }

    /// Ask for `id` to be ACTIVE during `tick`.
    ///
    /// Resumes the kernel if residual capacity allows. Otherwise suspends
    /// lower-priority kernels if that would free enough, and defers.
    pub fn dispatch(&self, id: KernelId, tick: u64) -> Result<DispatchOutcome> {
        let mut events = Vec::new();
        let result = {
            let mut state = self.lock();
            self.dispatch_locked(&mut state, id, tick, &mut events)
        };
        self.emit(events);
        result
    }

    fn dispatch_locked(
        &self,
        state: &mut GpuState,
        id: KernelId,
        tick: u64,
        events: &mut Vec<SchedulerEvent>,
    ) -> Result<DispatchOutcome> {
        let (priority, declared) = {
            let GpuState { kernels, reserved, .. } = &mut *state;
            let desc = kernels.get_mut(&id).ok_or(WardenError::UnknownKernel(id))?;
            let snapshot = desc.host.poll_status();
            observe(desc, reserved, snapshot, events);

            if desc.state.is_terminal() {
                return Err(WardenError::IllegalTransition {
                    kernel: id,
                    state: desc.state,
                    command: Command::Resume,
                });
            }
            if desc.terminating {
                return Err(WardenError::TerminateInFlight(id));
            }
            if desc.reserved {
                if desc.pending() == Command::Suspend {
                    // being preempted; SUSPENDED has not been observed yet
                    return Ok(self.defer(desc, tick, DeferReason::NotReady, events));
                }
                desc.consecutive_deferrals = 0;
                return Ok(DispatchOutcome::AlreadyActive);
            }
            if desc.state == KernelState::Init {
                return Ok(self.defer(desc, tick, DeferReason::NotReady, events));
            }
            (desc.priority(), desc.declared)
        };

        // capacity promised to preempting kernels that outrank this one
        // is not up for grabs
        let needed = declared.saturating_add(claimed_above(&state.kernels, priority));
        let free = self.config.capacity.saturating_sub(state.reserved);
        if needed <= free {
            let GpuState { kernels, reserved, .. } = &mut *state;
            let desc = kernels.get_mut(&id).ok_or(WardenError::UnknownKernel(id))?;
            reserve(desc, reserved, events);
            desc.host.issue_command(Command::Resume);
            desc.consecutive_deferrals = 0;
            desc.dispatches += 1;
            events.push(SchedulerEvent::CommandIssued {
                kernel: id,
                command: Command::Resume,
            });
            events.push(SchedulerEvent::Dispatched { kernel: id, tick });
            let total = *reserved;
            debug!(kernel = %id, tick, reserved = %total, "Kernel resumed");
            return Ok(DispatchOutcome::Resumed);
        }

        let shortfall = needed.saturating_sub(free);
        let incoming: ResourceFactor = state
            .kernels
            .values()
            .filter(|k| k.reserved && k.pending() == Command::Suspend)
            .map(|k| k.declared)
            .sum();

        let reason = if incoming >= shortfall {
            DeferReason::Preempting
        } else {
            let candidates: Vec<Candidate> = state
                .kernels
                .values()
                .filter(|k| {
                    k.id != id
                        && k.reserved
                        && !k.terminating
                        && k.state == KernelState::Active
                        && k.pending() == Command::Resume
                })
                .map(|k| Candidate {
                    id: k.id,
                    priority: k.priority(),
                    factor: k.declared,
                })
                .collect();

            match select_victims(priority, shortfall.saturating_sub(incoming), &candidates) {
                Some(victims) if !victims.is_empty() => {
                    for victim in victims {
                        if let Some(desc) = state.kernels.get_mut(&victim) {
                            desc.host.issue_command(Command::Suspend);
                            events.push(SchedulerEvent::CommandIssued {
                                kernel: victim,
                                command: Command::Suspend,
                            });
                            events.push(SchedulerEvent::Preempted { victim, by: id });
                            info!(victim = %victim, by = %id, tick, "Preempting kernel");
                        }
                    }
                    DeferReason::Preempting
                }
                _ => DeferReason::Capacity,
            }
        };

        let desc = state
            .kernels
            .get_mut(&id)
            .ok_or(WardenError::UnknownKernel(id))?;
        if reason == DeferReason::Preempting && !desc.claiming {
            desc.claiming = true;
            debug!(kernel = %id, tick, factor = %declared, "Capacity claimed");
        }
        Ok(self.defer(desc, tick, reason, events))
    }

    fn defer(
        &self,
        desc: &mut KernelDescriptor,
        tick: u64,
        reason: DeferReason,
        events: &mut Vec<SchedulerEvent>,
    ) -> DispatchOutcome {
        desc.consecutive_deferrals += 1;
        desc.deferrals += 1;
        let consecutive = desc.consecutive_deferrals;
        events.push(SchedulerEvent::Deferred {
            kernel: desc.id,
            tick,
            reason,
            consecutive,
        });
        debug!(kernel = %desc.id, tick, reason = reason.label(), consecutive, "Dispatch deferred");

        // the caller owns the occurrence and reports the miss for it
        let deadline_missed = consecutive > self.config.max_consecutive_deferrals;
        if deadline_missed {
            desc.consecutive_deferrals = 0;
        }

        DispatchOutcome::Deferred {
            reason,
            consecutive,
            deadline_missed,
        }
    }

    /// Issue SUSPEND to an ACTIVE kernel.
    ///
    /// Returns false when there is nothing to suspend: the kernel holds no
    /// reservation, a SUSPEND is already pending, or a RESUME has not been
    /// observed to take effect yet.
    pub fn preempt(&self, id: KernelId) -> Result<bool> {
        let mut events = Vec::new();
        let result = {
            let mut guard = self.lock();
            let GpuState { kernels, reserved, .. } = &mut *guard;
            match kernels.get_mut(&id) {
                None => Err(WardenError::UnknownKernel(id)),
                Some(desc) => {
                    let snapshot = desc.host.poll_status();
                    observe(desc, reserved, snapshot, &mut events);
                    if desc.state.is_terminal() {
                        Err(WardenError::IllegalTransition {
                            kernel: id,
                            state: desc.state,
                            command: Command::Suspend,
                        })
                    } else if desc.terminating {
                        Err(WardenError::TerminateInFlight(id))
                    } else if !desc.reserved
                        || desc.state != KernelState::Active
                        || desc.pending() == Command::Suspend
                    {
                        Ok(false)
                    } else {
                        desc.host.issue_command(Command::Suspend);
                        events.push(SchedulerEvent::CommandIssued {
                            kernel: id,
                            command: Command::Suspend,
                        });
                        Ok(true)
                    }
                }
            }
        };
        self.emit(events);
        result
    }

    /// Issue TERMINATE and wait for a terminal status.
    ///
    /// Idempotent: a terminal kernel returns its final state, and a second
    /// caller joins the wait of the first. An ACTIVE kernel is declared hung
    /// once its watchdog sees liveness stall for `watchdog_threshold` polls.
    /// A parked kernel gets `terminate_timeout` to answer. Either way the
    /// result is `KernelHung`.
    pub async fn terminate(&self, id: KernelId) -> Result<KernelState> {
        let poll_every = terminate_poll_interval(&self.config);
        let watch_every = self.config.watchdog_poll_interval();
        let parked_limit = self.config.terminate_timeout();
        let mut parked_since: Option<Instant> = None;

        let mut events = Vec::new();
        let early = {
            let mut guard = self.lock();
            let GpuState { kernels, reserved, .. } = &mut *guard;
            let desc = kernels.get_mut(&id).ok_or(WardenError::UnknownKernel(id))?;
            let snapshot = desc.host.poll_status();
            observe(desc, reserved, snapshot, &mut events);
            if desc.state.is_terminal() {
                Some(desc.state)
            } else {
                if !desc.terminating {
                    desc.terminating = true;
                    desc.claiming = false;
                    desc.host.issue_command(Command::Terminate);
                    events.push(SchedulerEvent::CommandIssued {
                        kernel: id,
                        command: Command::Terminate,
                    });
                    info!(kernel = %id, "Terminating kernel");
                }
                None
            }
        };
        self.emit(events);
        if let Some(state) = early {
            return Ok(state);
        }

        loop {
            tokio::time::sleep(poll_every).await;

            let mut events = Vec::new();
            let outcome = {
                let mut guard = self.lock();
                let GpuState { kernels, reserved, .. } = &mut *guard;
                match kernels.get_mut(&id) {
                    None => Some(Err(WardenError::UnknownKernel(id))),
                    Some(desc) => {
                        let snapshot = desc.host.poll_status();
                        observe(desc, reserved, snapshot, &mut events);
                        if desc.state.is_terminal() {
                            Some(Ok(desc.state))
                        } else if snapshot.status == KernelState::Active {
                            parked_since = None;
                            let due = desc
                                .last_watch
                                .map_or(true, |at| at.elapsed() >= watch_every);
                            if due {
                                desc.last_watch = Some(Instant::now());
                                match desc.watchdog.observe(snapshot) {
                                    Verdict::Hung { liveness, polls } => {
                                        declare_hung(desc, reserved, liveness, polls, &mut events);
                                        Some(Err(WardenError::KernelHung {
                                            kernel: id,
                                            liveness,
                                            polls,
                                        }))
                                    }
                                    Verdict::Healthy | Verdict::Stalled { .. } => None,
                                }
                            } else {
                                None
                            }
                        } else if parked_since
                            .get_or_insert_with(Instant::now)
                            .elapsed()
                            >= parked_limit
                        {
                            let polls = self.config.watchdog_threshold;
                            let liveness = snapshot.liveness;
                            declare_hung(desc, reserved, liveness, polls, &mut events);
                            Some(Err(WardenError::KernelHung {
                                kernel: id,
                                liveness,
                                polls,
                            }))
                        } else {
                            None
                        }
                    }
                }
            };
            self.emit(events);
            if let Some(result) = outcome {
                return result;
            }
        }
    }

    /// One watchdog pass over every kernel. Returns the kernels declared
    /// hung by this pass.
    pub fn poll(&self) -> Vec<KernelId> {
        let mut events = Vec::new();
        let mut hung = Vec::new();
        {
            let mut guard = self.lock();
            let GpuState { kernels, reserved, .. } = &mut *guard;
            for desc in kernels.values_mut() {
                if poll_one(desc, reserved, &mut events) {
                    hung.push(desc.id);
                }
            }
        }
        self.emit(events);
        hung
    }

    /// Watchdog pass over a single kernel
    pub fn poll_kernel(&self, id: KernelId) -> Result<KernelState> {
        let mut events = Vec::new();
        let result = {
            let mut guard = self.lock();
            let GpuState { kernels, reserved, .. } = &mut *guard;
            match kernels.get_mut(&id) {
                None => Err(WardenError::UnknownKernel(id)),
                Some(desc) => {
                    poll_one(desc, reserved, &mut events);
                    Ok(desc.state)
                }
            }
        };
        self.emit(events);
        result
    }

    /// Terminate if needed, then destroy the descriptor
    pub async fn deregister(&self, id: KernelId) -> Result<KernelReport> {
        let live = {
            let guard = self.lock();
            let desc = guard.kernels.get(&id).ok_or(WardenError::UnknownKernel(id))?;
            !desc.state.is_terminal()
        };
        if live {
            match self.terminate(id).await {
                Ok(_) | Err(WardenError::KernelHung { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        // give the device thread a moment to hand over its exit record
        let deadline = Instant::now() + self.config.terminate_timeout();
        loop {
            let mut events = Vec::new();
            let settled = {
                let mut guard = self.lock();
                let desc = guard
                    .kernels
                    .get_mut(&id)
                    .ok_or(WardenError::UnknownKernel(id))?;
                collect_exit(desc, &mut events);
                desc.device.is_none()
            };
            self.emit(events);
            if settled || Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(terminate_poll_interval(&self.config)).await;
        }

        let mut events = Vec::new();
        let report = {
            let mut guard = self.lock();
            let GpuState { kernels, reserved, .. } = &mut *guard;
            let mut desc = kernels.remove(&id).ok_or(WardenError::UnknownKernel(id))?;
            release(&mut desc, reserved, &mut events);
            // a context still running teardown is detached
            drop(desc.device.take());
            events.push(SchedulerEvent::KernelDeregistered { kernel: id });
            desc.report()
        };
        self.emit(events);
        info!(kernel = %id, state = %report.state, "Kernel deregistered");
        Ok(report)
    }

    /// Drop the capacity claim of `id`, if it holds one. Used when nothing
    /// will ask for the kernel again.
    pub fn withdraw_claim(&self, id: KernelId) {
        if let Some(desc) = self.lock().kernels.get_mut(&id) {
            if desc.claiming {
                desc.claiming = false;
                debug!(kernel = %id, "Capacity claim withdrawn");
            }
        }
    }

    /// Attribute a missed software-component deadline to a kernel
    pub fn note_deadline_missed(&self, id: KernelId) {
        if let Some(desc) = self.lock().kernels.get_mut(&id) {
            desc.missed_deadlines += 1;
        }
    }

    pub fn contains(&self, id: KernelId) -> bool {
        self.lock().kernels.contains_key(&id)
    }

    pub fn state(&self, id: KernelId) -> Result<KernelState> {
        self.lock()
            .kernels
            .get(&id)
            .map(|desc| desc.state)
            .ok_or(WardenError::UnknownKernel(id))
    }

    pub fn kernel_ids(&self) -> Vec<KernelId> {
        self.lock().kernels.keys().copied().collect()
    }

    /// Kernels not yet in a terminal state
    pub fn live_kernels(&self) -> Vec<KernelId> {
        self.lock()
            .kernels
            .values()
            .filter(|desc| !desc.state.is_terminal())
            .map(|desc| desc.id)
            .collect()
    }

    pub fn report(&self, id: KernelId) -> Result<KernelReport> {
        self.lock()
            .kernels
            .get(&id)
            .map(KernelDescriptor::report)
            .ok_or(WardenError::UnknownKernel(id))
    }

    pub fn reports(&self) -> Vec<KernelReport> {
        self.lock().kernels.values().map(KernelDescriptor::report).collect()
    }

    fn lock(&self) -> MutexGuard<'_, GpuState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, events: Vec<SchedulerEvent>) {
        for event in events {
            self.sink.record(event);
        }
    }
}

impl Drop for GpuScheduler {
    fn drop(&mut self) {
        // parked device loops would otherwise poll forever
        let state = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        for desc in state.kernels.values() {
            if !desc.state.is_terminal() {
                desc.host.issue_command(Command::Terminate);
            }
        }
    }
}

fn terminate_poll_interval(config: &SchedulerConfig) -> Duration {
    (config.tick_resolution() / 4).max(Duration::from_micros(50))
}

fn reserve(
    desc: &mut KernelDescriptor,
    reserved: &mut ResourceFactor,
    events: &mut Vec<SchedulerEvent>,
) {
    if desc.reserved {
        return;
    }
    desc.reserved = true;
    desc.claiming = false;
    *reserved = reserved.saturating_add(desc.declared);
    events.push(SchedulerEvent::CapacityReserved {
        kernel: desc.id,
        factor: desc.declared,
        total: *reserved,
    });
}

fn release(
    desc: &mut KernelDescriptor,
    reserved: &mut ResourceFactor,
    events: &mut Vec<SchedulerEvent>,
) {
    if !desc.reserved {
        return;
    }
    desc.reserved = false;
    *reserved = reserved.saturating_sub(desc.declared);
    events.push(SchedulerEvent::CapacityReleased {
        kernel: desc.id,
        factor: desc.declared,
        total: *reserved,
    });
}

/// Capacity claimed by preempting kernels that outrank `priority`
fn claimed_above(
    kernels: &BTreeMap<KernelId, KernelDescriptor>,
    priority: Priority,
) -> ResourceFactor {
    kernels
        .values()
        .filter(|k| k.claiming && k.priority() < priority)
        .map(|k| k.declared)
        .sum()
}

/// Fold one observed status into the descriptor and the capacity sum
fn observe(
    desc: &mut KernelDescriptor,
    reserved: &mut ResourceFactor,
    snapshot: BarrierSnapshot,
    events: &mut Vec<SchedulerEvent>,
) {
    if desc.state.is_terminal() {
        collect_exit(desc, events);
        return;
    }
    let next = snapshot.status;
    if next == desc.state {
        return;
    }
    if !desc.state.can_reach(next) {
        warn!(kernel = %desc.id, from = %desc.state, to = %next, "Unexpected device transition");
    }
    if next == KernelState::Active && !desc.reserved {
        warn!(kernel = %desc.id, "Kernel ACTIVE without a reservation");
    }

    events.push(SchedulerEvent::StateChanged {
        kernel: desc.id,
        from: desc.state,
        to: next,
    });
    debug!(kernel = %desc.id, from = %desc.state, to = %next, "State changed");
    desc.state = next;

    match next {
        KernelState::Suspended if desc.pending() == Command::Suspend => {
            release(desc, reserved, events);
        }
        KernelState::TerminatedOk | KernelState::TerminatedError => {
            desc.claiming = false;
            release(desc, reserved, events);
            info!(kernel = %desc.id, state = %next, "Kernel reached terminal state");
            collect_exit(desc, events);
        }
        _ => {}
    }
}

/// Pick up the device exit record once the control loop has returned
fn collect_exit(desc: &mut KernelDescriptor, events: &mut Vec<SchedulerEvent>) {
    let Some(context) = desc.device.as_mut() else {
        return;
    };
    let Some(exit) = context.try_collect() else {
        return;
    };
    desc.device = None;
    desc.summary = exit.summary;
    if desc.fault.is_none() {
        desc.fault = exit.fault;
    }

    if desc.state == KernelState::TerminatedError && !desc.hung && !desc.fault_reported {
        desc.fault_reported = true;
        let reason = desc
            .fault
            .clone()
            .unwrap_or_else(|| "kernel reported TERMINATED_ERROR".to_string());
        warn!(kernel = %desc.id, reason = %reason, "Workload fault");
        events.push(SchedulerEvent::WorkloadFault {
            kernel: desc.id,
            reason,
        });
    }
}

/// Watchdog step for one kernel. Returns true if it was declared hung.
fn poll_one(
    desc: &mut KernelDescriptor,
    reserved: &mut ResourceFactor,
    events: &mut Vec<SchedulerEvent>,
) -> bool {
    if desc.state.is_terminal() {
        collect_exit(desc, events);
        return false;
    }

    let snapshot = desc.host.poll_status();
    observe(desc, reserved, snapshot, events);
    if desc.state.is_terminal() {
        return false;
    }

    desc.last_watch = Some(Instant::now());
    match desc.watchdog.observe(snapshot) {
        Verdict::Healthy => false,
        Verdict::Stalled { polls } => {
            debug!(kernel = %desc.id, liveness = snapshot.liveness, polls, "Liveness stalled");
            false
        }
        Verdict::Hung { liveness, polls } => {
            declare_hung(desc, reserved, liveness, polls, events);
            true
        }
    }
}

/// Reset the device context and retire the descriptor as TERMINATED_ERROR
fn declare_hung(
    desc: &mut KernelDescriptor,
    reserved: &mut ResourceFactor,
    liveness: u64,
    polls: u32,
    events: &mut Vec<SchedulerEvent>,
) {
    warn!(kernel = %desc.id, liveness, polls, "Kernel hung, resetting device context");

    desc.host.issue_command(Command::Terminate);
    events.push(SchedulerEvent::CommandIssued {
        kernel: desc.id,
        command: Command::Terminate,
    });
    desc.terminating = true;
    desc.claiming = false;
    desc.hung = true;
    if let Some(context) = desc.device.take() {
        context.reset();
    }

    let from = desc.state;
    desc.state = KernelState::TerminatedError;
    events.push(SchedulerEvent::StateChanged {
        kernel: desc.id,
        from,
        to: KernelState::TerminatedError,
    });
    desc.fault = Some(format!("hung: liveness stuck at {} for {} polls", liveness, polls));
    release(desc, reserved, events);
    events.push(SchedulerEvent::KernelHung {
        kernel: desc.id,
        liveness,
        polls,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use warden_device::workloads::{Faulty, Spin, Stall};
    use warden_shared::CollectingSink;

    fn scheduler(config: SchedulerConfig) -> (GpuScheduler, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::new());
        (GpuScheduler::new(config, sink.clone()), sink)
    }

    fn rf(ratio: f64) -> ResourceFactor {
        ResourceFactor::from_f64(ratio).unwrap()
    }

    fn wait_state(gpu: &GpuScheduler, id: KernelId, state: KernelState) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            gpu.poll_kernel(id).unwrap();
            if gpu.state(id).unwrap() == state {
                return;
            }
            assert!(std::time::Instant::now() < deadline, "{} never reached {}", id, state);
            thread::sleep(Duration::from_micros(200));
        }
    }

    fn spin() -> Spin {
        Spin::new("spin", Duration::from_micros(100))
    }

    #[test]
    fn test_register_rejects_impossible_factor() {
        let (gpu, _) = scheduler(SchedulerConfig::default());
        let err = gpu.register_kernel(rf(1.5), PeriodClass::P10, spin()).unwrap_err();
        assert!(matches!(err, WardenError::CapacityExceeded { .. }));
        assert!(gpu
            .register_kernel(ResourceFactor::ZERO, PeriodClass::P10, spin())
            .is_err());
    }

    #[test]
    fn test_register_rejects_disabled_period() {
        let config = SchedulerConfig {
            period_classes: vec![PeriodClass::P10],
            ..Default::default()
        };
        let (gpu, _) = scheduler(config);
        let err = gpu.register_kernel(rf(0.1), PeriodClass::P5, spin()).unwrap_err();
        assert_eq!(err, WardenError::PeriodDisabled(PeriodClass::P5));
    }

    #[test]
    fn test_dispatch_reserves_and_suspend_releases() {
        let (gpu, sink) = scheduler(SchedulerConfig::default());
        let id = gpu.register_kernel(rf(0.4), PeriodClass::P10, spin()).unwrap();
        wait_state(&gpu, id, KernelState::Ready);

        assert_eq!(gpu.dispatch(id, 1).unwrap(), DispatchOutcome::Resumed);
        assert_eq!(gpu.reserved(), rf(0.4));
        assert_eq!(gpu.dispatch(id, 2).unwrap(), DispatchOutcome::AlreadyActive);
        wait_state(&gpu, id, KernelState::Active);

        assert!(gpu.preempt(id).unwrap());
        assert!(!gpu.preempt(id).unwrap(), "second SUSPEND is a no-op");
        wait_state(&gpu, id, KernelState::Suspended);
        assert_eq!(gpu.reserved(), ResourceFactor::ZERO);

        let released = sink.count(|e| matches!(e, SchedulerEvent::CapacityReleased { .. }));
        assert_eq!(released, 1);
    }

    #[test]
    fn test_init_kernel_is_not_ready() {
        struct SlowSetup;
        impl Workload for SlowSetup {
            fn name(&self) -> &str {
                "slow-setup"
            }
            fn setup(&mut self) -> anyhow::Result<()> {
                thread::sleep(Duration::from_millis(200));
                Ok(())
            }
            fn step(&mut self) -> warden_device::Step {
                warden_device::Step::Continue
            }
        }

        let (gpu, _) = scheduler(SchedulerConfig::default());
        let id = gpu.register_kernel(rf(0.2), PeriodClass::P1, SlowSetup).unwrap();
        let outcome = gpu.dispatch(id, 1).unwrap();
        assert!(matches!(
            outcome,
            DispatchOutcome::Deferred {
                reason: DeferReason::NotReady,
                ..
            }
        ));
        assert_eq!(gpu.reserved(), ResourceFactor::ZERO);
    }

    #[test]
    fn test_contention_defers_lower_priority() {
        let config = SchedulerConfig {
            max_consecutive_deferrals: 0,
            ..Default::default()
        };
        let (gpu, sink) = scheduler(config);
        let a = gpu.register_kernel(rf(0.6), PeriodClass::P10, spin()).unwrap();
        let b = gpu.register_kernel(rf(0.5), PeriodClass::P10, spin()).unwrap();
        wait_state(&gpu, a, KernelState::Ready);
        wait_state(&gpu, b, KernelState::Ready);

        assert_eq!(gpu.dispatch(a, 10).unwrap(), DispatchOutcome::Resumed);
        let outcome = gpu.dispatch(b, 10).unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Deferred {
                reason: DeferReason::Capacity,
                consecutive: 1,
                deadline_missed: true
            }
        );
        assert!(gpu.reserved() <= gpu.capacity());
        assert_eq!(
            sink.count(|e| matches!(e, SchedulerEvent::Preempted { .. })),
            0,
            "B must not preempt A"
        );
        // the miss belongs to whoever owns the occurrence
        assert_eq!(sink.count(|e| matches!(e, SchedulerEvent::DeadlineMissed { .. })), 0);
        assert_eq!(gpu.report(b).unwrap().missed_deadlines, 0);
    }

    #[test]
    fn test_short_period_preempts_long_period() {
        let (gpu, sink) = scheduler(SchedulerConfig::default());
        let slow = gpu.register_kernel(rf(0.7), PeriodClass::P100, spin()).unwrap();
        let fast = gpu.register_kernel(rf(0.5), PeriodClass::P1, spin()).unwrap();
        wait_state(&gpu, slow, KernelState::Ready);
        wait_state(&gpu, fast, KernelState::Ready);

        assert_eq!(gpu.dispatch(slow, 1).unwrap(), DispatchOutcome::Resumed);
        wait_state(&gpu, slow, KernelState::Active);

        let outcome = gpu.dispatch(fast, 1).unwrap();
        assert!(matches!(
            outcome,
            DispatchOutcome::Deferred {
                reason: DeferReason::Preempting,
                ..
            }
        ));
        assert_eq!(
            sink.count(|e| matches!(
                e,
                SchedulerEvent::Preempted { victim, by } if *victim == slow && *by == fast
            )),
            1
        );

        wait_state(&gpu, slow, KernelState::Suspended);
        assert_eq!(gpu.dispatch(fast, 2).unwrap(), DispatchOutcome::Resumed);
        assert_eq!(gpu.reserved(), rf(0.5));
    }

    #[test]
    fn test_suspended_victim_cannot_reclaim_capacity() {
        let (gpu, sink) = scheduler(SchedulerConfig {
            watchdog_poll_ticks: 100,
            ..Default::default()
        });
        let slow = gpu.register_kernel(rf(0.7), PeriodClass::P100, spin()).unwrap();
        let fast = gpu.register_kernel(rf(0.5), PeriodClass::P1, spin()).unwrap();
        wait_state(&gpu, slow, KernelState::Ready);
        wait_state(&gpu, fast, KernelState::Ready);
        assert_eq!(gpu.dispatch(slow, 0).unwrap(), DispatchOutcome::Resumed);
        wait_state(&gpu, slow, KernelState::Active);

        // both drivers ask every tick, the victim right after the requester
        let mut fast_resumed_at = None;
        for tick in 1..=10 {
            let outcome = gpu.dispatch(fast, tick).unwrap();
            if outcome == DispatchOutcome::Resumed {
                fast_resumed_at = Some(tick);
                break;
            }
            thread::sleep(Duration::from_millis(5));
            gpu.poll();
            let victim = gpu.dispatch(slow, tick).unwrap();
            assert_ne!(victim, DispatchOutcome::Resumed, "victim resumed at tick {}", tick);
            assert!(gpu.reserved() <= gpu.capacity());
        }

        assert!(fast_resumed_at.is_some(), "P1 kernel never resumed");
        assert_eq!(gpu.reserved(), rf(0.5));
        assert_eq!(sink.count(|e| matches!(e, SchedulerEvent::Preempted { .. })), 1);

        // with the requester running the victim still has to wait for room
        let outcome = gpu.dispatch(slow, 11).unwrap();
        assert!(matches!(
            outcome,
            DispatchOutcome::Deferred {
                reason: DeferReason::Capacity,
                ..
            }
        ));
    }

    #[test]
    fn test_claim_withdrawn_lets_victim_back() {
        let (gpu, _) = scheduler(SchedulerConfig {
            watchdog_poll_ticks: 100,
            ..Default::default()
        });
        let slow = gpu.register_kernel(rf(0.7), PeriodClass::P100, spin()).unwrap();
        let fast = gpu.register_kernel(rf(0.5), PeriodClass::P1, spin()).unwrap();
        wait_state(&gpu, slow, KernelState::Ready);
        wait_state(&gpu, fast, KernelState::Ready);
        gpu.dispatch(slow, 0).unwrap();
        wait_state(&gpu, slow, KernelState::Active);

        gpu.dispatch(fast, 1).unwrap();
        wait_state(&gpu, slow, KernelState::Suspended);
        assert!(matches!(gpu.dispatch(slow, 2).unwrap(), DispatchOutcome::Deferred { .. }));

        gpu.withdraw_claim(fast);
        assert_eq!(gpu.dispatch(slow, 3).unwrap(), DispatchOutcome::Resumed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_terminate_is_idempotent() {
        let (gpu, sink) = scheduler(SchedulerConfig::default());
        let id = gpu.register_kernel(rf(0.3), PeriodClass::P10, spin()).unwrap();
        wait_state(&gpu, id, KernelState::Ready);
        gpu.dispatch(id, 1).unwrap();
        wait_state(&gpu, id, KernelState::Active);

        assert_eq!(gpu.terminate(id).await.unwrap(), KernelState::TerminatedOk);
        assert_eq!(gpu.terminate(id).await.unwrap(), KernelState::TerminatedOk);
        assert_eq!(gpu.reserved(), ResourceFactor::ZERO);
        assert_eq!(
            sink.count(|e| matches!(e, SchedulerEvent::CapacityReleased { .. })),
            1
        );

        let err = gpu.dispatch(id, 2).unwrap_err();
        assert!(matches!(err, WardenError::IllegalTransition { command: Command::Resume, .. }));
        assert!(gpu.preempt(id).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_terminate_waits_for_slow_parked_kernel() {
        // the device only looks at its command every 8ms while parked
        let (gpu, sink) = scheduler(SchedulerConfig {
            device_idle_backoff_us: 8_000,
            ..Default::default()
        });
        let id = gpu.register_kernel(rf(0.3), PeriodClass::P10, spin()).unwrap();
        wait_state(&gpu, id, KernelState::Ready);

        assert_eq!(gpu.terminate(id).await.unwrap(), KernelState::TerminatedOk);
        assert_eq!(sink.count(|e| matches!(e, SchedulerEvent::KernelHung { .. })), 0);
        assert!(gpu.report(id).unwrap().fault.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_terminate_declares_stalled_active_kernel_hung() {
        let (gpu, sink) = scheduler(SchedulerConfig::default());
        let stall = Stall::new(2, Duration::ZERO);
        let release_handle = stall.release_handle();
        let id = gpu.register_kernel(rf(0.5), PeriodClass::P10, stall).unwrap();
        wait_state(&gpu, id, KernelState::Ready);
        gpu.dispatch(id, 1).unwrap();
        wait_state(&gpu, id, KernelState::Active);
        // past its healthy steps and stuck inside the third one
        tokio::time::sleep(Duration::from_millis(5)).await;

        let err = gpu.terminate(id).await.unwrap_err();
        release_handle.release();

        assert!(matches!(err, WardenError::KernelHung { kernel, .. } if kernel == id));
        assert_eq!(gpu.state(id).unwrap(), KernelState::TerminatedError);
        assert_eq!(gpu.reserved(), ResourceFactor::ZERO);
        assert_eq!(sink.count(|e| matches!(e, SchedulerEvent::KernelHung { .. })), 1);
    }

    #[test]
    fn test_watchdog_declares_hung_once() {
        let (gpu, sink) = scheduler(SchedulerConfig::default());
        let stall = Stall::new(2, Duration::ZERO);
        let release_handle = stall.release_handle();
        let id = gpu.register_kernel(rf(0.5), PeriodClass::P10, stall).unwrap();
        wait_state(&gpu, id, KernelState::Ready);
        gpu.dispatch(id, 1).unwrap();
        wait_state(&gpu, id, KernelState::Active);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while gpu.report(id).unwrap().liveness_history.last().copied().unwrap_or(0) < 3 {
            gpu.poll_kernel(id).unwrap();
            assert!(std::time::Instant::now() < deadline);
            thread::sleep(Duration::from_micros(200));
        }

        let mut hung_polls = 0;
        for _ in 0..5 {
            if !gpu.poll().is_empty() {
                hung_polls += 1;
            }
        }
        release_handle.release();

        assert_eq!(hung_polls, 1);
        assert_eq!(gpu.state(id).unwrap(), KernelState::TerminatedError);
        assert_eq!(gpu.reserved(), ResourceFactor::ZERO);
        assert_eq!(sink.count(|e| matches!(e, SchedulerEvent::KernelHung { .. })), 1);
        assert_eq!(
            sink.count(|e| matches!(e, SchedulerEvent::CapacityReleased { .. })),
            1
        );
        assert!(gpu.report(id).unwrap().fault.unwrap().starts_with("hung"));
    }

    #[test]
    fn test_workload_fault_reported() {
        let (gpu, sink) = scheduler(SchedulerConfig::default());
        let id = gpu.register_kernel(rf(0.2), PeriodClass::P10, Faulty::new(2)).unwrap();
        wait_state(&gpu, id, KernelState::Ready);
        gpu.dispatch(id, 1).unwrap();
        wait_state(&gpu, id, KernelState::TerminatedError);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while sink.count(|e| matches!(e, SchedulerEvent::WorkloadFault { .. })) == 0 {
            gpu.poll();
            assert!(std::time::Instant::now() < deadline);
            thread::sleep(Duration::from_micros(200));
        }
        assert_eq!(gpu.reserved(), ResourceFactor::ZERO);
        assert!(gpu.report(id).unwrap().fault.unwrap().contains("injected"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_deregister_removes_descriptor() {
        let (gpu, sink) = scheduler(SchedulerConfig {
            watchdog_poll_ticks: 100,
            ..Default::default()
        });
        let short = Spin::new("short", Duration::ZERO).with_iterations(10);
        let id = gpu.register_kernel(rf(0.2), PeriodClass::P10, short).unwrap();
        wait_state(&gpu, id, KernelState::Ready);

        let report = gpu.deregister(id).await.unwrap();
        assert_eq!(report.state, KernelState::TerminatedOk);
        assert!(!gpu.contains(id));
        assert!(matches!(gpu.dispatch(id, 1), Err(WardenError::UnknownKernel(_))));
        assert_eq!(
            sink.count(|e| matches!(e, SchedulerEvent::KernelDeregistered { .. })),
            1
        );
    }
}
