//! Device-side control loop of a persistent kernel
//!
//! The loop owns the kernel-local state machine. It is the only writer of
//! the barrier's status field and liveness counter:
//!
//! ```text
//! INIT -> READY -> ACTIVE <-> SUSPENDED -> TERMINATED_SUCCESSFUL
//!           |         |                    TERMINATED_ERROR
//!           +---------+-> TERMINATED_SUCCESSFUL (on TERMINATE)
//! ```
//!
//! While ACTIVE the loop signals a checkpoint before every workload step.
//! While parked in READY or SUSPENDED it only peeks at the command field,
//! so liveness stands still and the host watchdog ignores it.

use crate::metrics::DeviceStats;
use crate::workload::{Step, Workload};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use warden_shared::{Command, DeviceEndpoint, KernelId, KernelState};

/// Tunables of the device loop
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// Sleep between command polls while parked
    pub idle_backoff: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            idle_backoff: Duration::from_micros(50),
        }
    }
}

/// How a kernel's control loop ended
#[derive(Debug, Clone, PartialEq)]
pub struct KernelExit {
    pub state: KernelState,
    pub fault: Option<String>,
    pub summary: Option<String>,
    pub stats: DeviceStats,
}

/// Command-driven transition function.
///
/// Workload outcomes (natural completion, faults) and setup are handled by
/// the loop itself; this covers everything the host can cause.
pub fn next_state(state: KernelState, command: Command) -> KernelState {
    use KernelState::*;
    match (state, command) {
        (Init, _) => Init,
        (Ready, Command::Resume) => Active,
        (Ready, Command::Terminate) => TerminatedOk,
        (Ready, Command::None | Command::Suspend) => Ready,
        (Active, Command::Suspend) => Suspended,
        (Active, Command::Terminate) => TerminatedOk,
        (Active, Command::None | Command::Resume) => Active,
        (Suspended, Command::Resume) => Active,
        (Suspended, Command::Terminate) => TerminatedOk,
        (Suspended, Command::None | Command::Suspend) => Suspended,
        (TerminatedOk, _) => TerminatedOk,
        (TerminatedError, _) => TerminatedError,
    }
}

pub struct PersistentKernel<W: Workload> {
    id: KernelId,
    device: DeviceEndpoint,
    workload: W,
    options: RuntimeOptions,
    state: KernelState,
    stats: DeviceStats,
}

impl<W: Workload> PersistentKernel<W> {
    pub fn new(id: KernelId, device: DeviceEndpoint, workload: W, options: RuntimeOptions) -> Self {
        Self {
            id,
            device,
            workload,
            options,
            state: KernelState::Init,
            stats: DeviceStats::default(),
        }
    }

    pub fn state(&self) -> KernelState {
        self.state
    }

    /// Run the control loop until the kernel reaches a terminal state
    pub fn run(&mut self) -> KernelExit {
        let span = tracing::debug_span!("kernel", id = %self.id, workload = %self.workload.name());
        let _enter = span.enter();

        self.device.publish_status(KernelState::Init);
        if let Err(e) = self.workload.setup() {
            let reason = format!("setup failed: {:#}", e);
            warn!(kernel = %self.id, "{}", reason);
            self.transition(KernelState::TerminatedError);
            return self.exit(Some(reason));
        }
        self.transition(KernelState::Ready);
        info!(kernel = %self.id, "Kernel ready");

        let mut fault = None;
        loop {
            match self.state {
                KernelState::Ready | KernelState::Suspended => {
                    let next = next_state(self.state, self.device.peek_command());
                    if next == self.state {
                        thread::sleep(self.options.idle_backoff);
                        continue;
                    }
                    self.transition(next);
                }
                KernelState::Active => {
                    let command = self.device.signal_checkpoint();
                    self.stats.checkpoints += 1;
                    let next = next_state(KernelState::Active, command);
                    if next != KernelState::Active {
                        self.transition(next);
                        continue;
                    }
                    match self.workload.step() {
                        Step::Continue => self.stats.iterations += 1,
                        Step::Done => {
                            self.stats.iterations += 1;
                            self.transition(KernelState::TerminatedOk);
                        }
                        Step::Fault(reason) => {
                            warn!(kernel = %self.id, reason = %reason, "Workload fault");
                            fault = Some(reason);
                            self.transition(KernelState::TerminatedError);
                        }
                    }
                }
                KernelState::TerminatedOk | KernelState::TerminatedError => break,
                KernelState::Init => {
                    // setup already ran; INIT is never re-entered
                    self.transition(KernelState::TerminatedError);
                }
            }
        }

        self.workload.teardown();
        info!(
            kernel = %self.id,
            state = %self.state,
            iterations = self.stats.iterations,
            "Kernel finished"
        );
        self.exit(fault)
    }

    /// Publish TERMINATED_ERROR after the loop was torn down abnormally
    pub(crate) fn abort(&mut self) {
        self.state = KernelState::TerminatedError;
        self.device.publish_status(KernelState::TerminatedError);
    }

    pub(crate) fn stats(&self) -> DeviceStats {
        self.stats
    }

    fn transition(&mut self, next: KernelState) {
        debug!(kernel = %self.id, from = %self.state, to = %next, "Device transition");
        match (self.state, next) {
            (KernelState::Active, KernelState::Suspended) => self.stats.suspensions += 1,
            (KernelState::Suspended, KernelState::Active) => self.stats.resumptions += 1,
            _ => {}
        }
        self.state = next;
        self.device.publish_status(next);
    }

    fn exit(&self, fault: Option<String>) -> KernelExit {
        KernelExit {
            state: self.state,
            fault,
            summary: self.workload.summary(),
            stats: self.stats,
        }
    }
}
