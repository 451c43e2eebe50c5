//! Checkpoint barrier between the host scheduler and a device kernel
//!
//! A barrier is three atomics shared by exactly two parties. The host owns
//! the command field; the device owns the status field and the liveness
//! counter. The split is enforced by handing each party its own endpoint
//! type, so neither side can write a field it does not own.

use crate::types::kernel::{Command, KernelState};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct BarrierCell {
    command: AtomicU8,
    status: AtomicU8,
    liveness: AtomicU64,
}

/// Status and liveness as seen by one host poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierSnapshot {
    pub status: KernelState,
    pub liveness: u64,
}

/// Create a fresh barrier in INIT with no pending command
pub fn barrier() -> (HostEndpoint, DeviceEndpoint) {
    let cell = Arc::new(BarrierCell {
        command: AtomicU8::new(Command::None.as_u8()),
        status: AtomicU8::new(KernelState::Init.as_u8()),
        liveness: AtomicU64::new(0),
    });
    (
        HostEndpoint { cell: Arc::clone(&cell) },
        DeviceEndpoint { cell },
    )
}

/// Host half of a barrier. Writes commands, reads status and liveness.
pub struct HostEndpoint {
    cell: Arc<BarrierCell>,
}

impl HostEndpoint {
    /// Publish a command. Release ordering makes every host write before
    /// this call visible to the device's next checkpoint.
    pub fn issue_command(&self, command: Command) {
        self.cell.command.store(command.as_u8(), Ordering::Release);
    }

    /// The command currently held in the barrier
    pub fn last_command(&self) -> Command {
        decode_command(self.cell.command.load(Ordering::Acquire))
    }

    /// Non-blocking read of status and liveness
    pub fn poll_status(&self) -> BarrierSnapshot {
        let liveness = self.cell.liveness.load(Ordering::Acquire);
        let status = decode_status(self.cell.status.load(Ordering::Acquire));
        BarrierSnapshot { status, liveness }
    }
}

impl fmt::Debug for HostEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostEndpoint")
            .field("command", &self.last_command())
            .field("snapshot", &self.poll_status())
            .finish()
    }
}

/// Device half of a barrier. Writes status and liveness, reads commands.
pub struct DeviceEndpoint {
    cell: Arc<BarrierCell>,
}

impl DeviceEndpoint {
    /// Count one checkpoint and fetch the pending command.
    ///
    /// The increment happens before the read so a host that observes the new
    /// liveness value also observes that the device looked at its command.
    pub fn signal_checkpoint(&self) -> Command {
        self.cell.liveness.fetch_add(1, Ordering::AcqRel);
        decode_command(self.cell.command.load(Ordering::Acquire))
    }

    /// Read the pending command without counting a checkpoint. Used while
    /// parked in READY or SUSPENDED, where liveness is not expected to move.
    pub fn peek_command(&self) -> Command {
        decode_command(self.cell.command.load(Ordering::Acquire))
    }

    pub fn publish_status(&self, state: KernelState) {
        self.cell.status.store(state.as_u8(), Ordering::Release);
    }

    pub fn status(&self) -> KernelState {
        decode_status(self.cell.status.load(Ordering::Acquire))
    }

    pub fn liveness(&self) -> u64 {
        self.cell.liveness.load(Ordering::Acquire)
    }
}

impl fmt::Debug for DeviceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceEndpoint")
            .field("status", &self.status())
            .field("liveness", &self.liveness())
            .finish()
    }
}

// Only the endpoints store into the cells and they only store valid
// encodings, so the fallbacks are unreachable in practice.
fn decode_command(raw: u8) -> Command {
    Command::from_u8(raw).unwrap_or(Command::None)
}

fn decode_status(raw: u8) -> KernelState {
    KernelState::from_u8(raw).unwrap_or(KernelState::TerminatedError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_fresh_barrier() {
        let (host, device) = barrier();
        assert_eq!(host.last_command(), Command::None);
        assert_eq!(
            host.poll_status(),
            BarrierSnapshot {
                status: KernelState::Init,
                liveness: 0
            }
        );
        assert_eq!(device.peek_command(), Command::None);
    }

    #[test]
    fn test_checkpoint_counts_and_returns_command() {
        let (host, device) = barrier();
        assert_eq!(device.signal_checkpoint(), Command::None);
        host.issue_command(Command::Suspend);
        assert_eq!(device.signal_checkpoint(), Command::Suspend);
        // peek does not count
        assert_eq!(device.peek_command(), Command::Suspend);
        assert_eq!(host.poll_status().liveness, 2);
    }

    #[test]
    fn test_status_written_by_device_only() {
        let (host, device) = barrier();
        device.publish_status(KernelState::Ready);
        assert_eq!(host.poll_status().status, KernelState::Ready);
        host.issue_command(Command::Resume);
        // a command does not move the status on its own
        assert_eq!(host.poll_status().status, KernelState::Ready);
    }

    #[test]
    fn test_cross_thread_visibility() {
        let (host, device) = barrier();
        let worker = thread::spawn(move || {
            device.publish_status(KernelState::Active);
            loop {
                match device.signal_checkpoint() {
                    Command::Terminate => {
                        device.publish_status(KernelState::TerminatedOk);
                        return device.liveness();
                    }
                    _ => thread::yield_now(),
                }
            }
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        while host.poll_status().liveness < 100 {
            assert!(Instant::now() < deadline, "device never checkpointed");
            thread::yield_now();
        }
        host.issue_command(Command::Terminate);
        let final_liveness = worker.join().unwrap();

        let snapshot = host.poll_status();
        assert_eq!(snapshot.status, KernelState::TerminatedOk);
        assert_eq!(snapshot.liveness, final_liveness);
        assert!(final_liveness >= 100);
    }
}
