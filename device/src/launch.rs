//! Launch and reset of device execution contexts
//!
//! Every persistent kernel gets its own OS thread standing in for a
//! device-resident grid. The host only ever talks to it through the
//! barrier; the `DeviceContext` handle exists to collect the exit record
//! and to reset (abandon) a context that stopped responding.

use crate::kernel::{KernelExit, PersistentKernel, RuntimeOptions};
use crate::workload::Workload;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use tracing::{error, warn};
use warden_shared::{DeviceEndpoint, KernelId, KernelState, WardenError};

/// Start a kernel's control loop on a dedicated thread
pub fn launch<W: Workload>(
    id: KernelId,
    device: DeviceEndpoint,
    workload: W,
    options: RuntimeOptions,
) -> warden_shared::Result<DeviceContext> {
    let handle = thread::Builder::new()
        .name(format!("warden-{}", id.0))
        .spawn(move || {
            let mut kernel = PersistentKernel::new(id, device, workload, options);
            match panic::catch_unwind(AssertUnwindSafe(|| kernel.run())) {
                Ok(exit) => exit,
                Err(payload) => {
                    let reason = format!("workload panicked: {}", panic_message(payload.as_ref()));
                    error!(kernel = %id, "{}", reason);
                    kernel.abort();
                    KernelExit {
                        state: KernelState::TerminatedError,
                        fault: Some(reason),
                        summary: None,
                        stats: kernel.stats(),
                    }
                }
            }
        })
        .map_err(|e| WardenError::DeviceLaunch {
            kernel: id,
            reason: e.to_string(),
        })?;

    Ok(DeviceContext {
        kernel: id,
        handle: Some(handle),
    })
}

/// Host-side handle on a running device context
#[derive(Debug)]
pub struct DeviceContext {
    kernel: KernelId,
    handle: Option<JoinHandle<KernelExit>>,
}

impl DeviceContext {
    pub fn kernel(&self) -> KernelId {
        self.kernel
    }

    /// Whether the control loop has returned
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Take the exit record if the control loop has returned.
    ///
    /// Never blocks. Returns `None` while the loop is still running and
    /// after the record has been taken once.
    pub fn try_collect(&mut self) -> Option<KernelExit> {
        if !self.handle.as_ref()?.is_finished() {
            return None;
        }
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(exit) => Some(exit),
            Err(payload) => Some(KernelExit {
                state: KernelState::TerminatedError,
                fault: Some(format!("device thread panicked: {}", panic_message(payload.as_ref()))),
                summary: None,
                stats: Default::default(),
            }),
        }
    }

    /// Abandon the context. The thread is detached and can never be
    /// reattached to a descriptor; if it ever wakes up it finds TERMINATE
    /// in its barrier.
    pub fn reset(mut self) {
        if let Some(handle) = self.handle.take() {
            if !handle.is_finished() {
                warn!(kernel = %self.kernel, "Resetting unresponsive device context");
            }
            drop(handle);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::Step;
    use crate::workloads::synthetic::{Spin, Stall};
    use std::time::{Duration, Instant};
    use warden_shared::{barrier, Command, HostEndpoint};

    fn wait_for(host: &HostEndpoint, state: KernelState) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while host.poll_status().status != state {
            assert!(Instant::now() < deadline, "kernel never reached {}", state);
            thread::sleep(Duration::from_micros(100));
        }
    }

    fn collect(ctx: &mut DeviceContext) -> KernelExit {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(exit) = ctx.try_collect() {
                return exit;
            }
            assert!(Instant::now() < deadline, "device context never finished");
            thread::sleep(Duration::from_micros(100));
        }
    }

    #[test]
    fn test_launch_and_collect() {
        let (host, device) = barrier();
        let mut ctx = launch(
            KernelId(1),
            device,
            Spin::new("spin", Duration::ZERO).with_iterations(3),
            RuntimeOptions::default(),
        )
        .unwrap();
        assert_eq!(ctx.kernel(), KernelId(1));

        wait_for(&host, KernelState::Ready);
        assert!(ctx.try_collect().is_none());
        host.issue_command(Command::Resume);

        let exit = collect(&mut ctx);
        assert_eq!(exit.state, KernelState::TerminatedOk);
        assert!(ctx.is_finished());
        assert!(ctx.try_collect().is_none(), "exit record is handed out once");
    }

    struct Panics;

    impl Workload for Panics {
        fn name(&self) -> &str {
            "panics"
        }

        fn step(&mut self) -> Step {
            panic!("index out of bounds")
        }
    }

    #[test]
    fn test_panic_becomes_terminated_error() {
        let (host, device) = barrier();
        let mut ctx = launch(KernelId(2), device, Panics, RuntimeOptions::default()).unwrap();
        wait_for(&host, KernelState::Ready);
        host.issue_command(Command::Resume);

        let exit = collect(&mut ctx);
        assert_eq!(exit.state, KernelState::TerminatedError);
        assert!(exit.fault.unwrap().contains("index out of bounds"));
        assert_eq!(host.poll_status().status, KernelState::TerminatedError);
    }

    #[test]
    fn test_reset_detaches_stalled_context() {
        let (host, device) = barrier();
        let stall = Stall::new(2, Duration::ZERO);
        let release = stall.release_handle();
        let ctx = launch(KernelId(3), device, stall, RuntimeOptions::default()).unwrap();

        wait_for(&host, KernelState::Ready);
        host.issue_command(Command::Resume);
        let deadline = Instant::now() + Duration::from_secs(5);
        while host.poll_status().liveness < 3 {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_micros(100));
        }

        host.issue_command(Command::Terminate);
        ctx.reset();

        // the abandoned thread sees TERMINATE once it is released
        release.release();
        wait_for(&host, KernelState::TerminatedOk);
    }
}
