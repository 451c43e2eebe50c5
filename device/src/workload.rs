//! The workload contract
//!
//! A workload is the compute body of a persistent kernel. The runtime calls
//! `step` once per checkpoint interval; everything a step does between two
//! checkpoints is one indivisible unit of progress, so a SUSPEND takes
//! effect within at most one step and a resumed workload continues from the
//! last completed step.

use anyhow::Result;

/// Outcome of one checkpoint interval
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// More work remains
    Continue,
    /// The body completed naturally
    Done,
    /// The body hit an unrecoverable error
    Fault(String),
}

/// Compute body of a persistent kernel
pub trait Workload: Send + 'static {
    fn name(&self) -> &str;

    /// One-time initialisation, run while the kernel is in INIT
    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    /// Advance by one checkpoint interval
    fn step(&mut self) -> Step;

    /// Release resources once the kernel reached a terminal state
    fn teardown(&mut self) {}

    /// Human-readable result, reported when the kernel finishes
    fn summary(&self) -> Option<String> {
        None
    }
}

impl<W: Workload + ?Sized> Workload for Box<W> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn setup(&mut self) -> Result<()> {
        (**self).setup()
    }

    fn step(&mut self) -> Step {
        (**self).step()
    }

    fn teardown(&mut self) {
        (**self).teardown()
    }

    fn summary(&self) -> Option<String> {
        (**self).summary()
    }
}
