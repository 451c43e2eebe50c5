//! Kernel identity, lifecycle states and host commands
//!
//! Both enums are `#[repr(u8)]` because they travel through the barrier as
//! single atomic bytes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a registered persistent kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KernelId(pub u64);

/// Opaque identifier of a registered software component
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SwcId(pub u64);

impl fmt::Display for KernelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kernel-{}", self.0)
    }
}

impl fmt::Display for SwcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "swc-{}", self.0)
    }
}

/// Command field of a barrier. Only the host writes it.
///
/// Commands are level-triggered: the field holds the state the host wants
/// the kernel to be in, and the device acts on it at its next checkpoint.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    None = 0,
    Suspend = 1,
    Resume = 2,
    Terminate = 3,
}

impl Command {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Command::None),
            1 => Some(Command::Suspend),
            2 => Some(Command::Resume),
            3 => Some(Command::Terminate),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Suspend => "SUSPEND",
            Self::Resume => "RESUME",
            Self::Terminate => "TERMINATE",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle state of a persistent kernel.
///
/// The device writes it into the barrier status field; the host mirrors the
/// last observed value in the kernel descriptor.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelState {
    Init = 0,
    Ready = 1,
    Active = 2,
    Suspended = 3,
    TerminatedOk = 4,
    TerminatedError = 5,
}

impl KernelState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(KernelState::Init),
            1 => Some(KernelState::Ready),
            2 => Some(KernelState::Active),
            3 => Some(KernelState::Suspended),
            4 => Some(KernelState::TerminatedOk),
            5 => Some(KernelState::TerminatedError),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::TerminatedOk | Self::TerminatedError)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Ready => "READY",
            Self::Active => "ACTIVE",
            Self::Suspended => "SUSPENDED",
            Self::TerminatedOk => "TERMINATED_SUCCESSFUL",
            Self::TerminatedError => "TERMINATED_ERROR",
        }
    }

    /// Single-step transitions the device runtime is allowed to make.
    pub fn can_transition_to(self, next: KernelState) -> bool {
        use KernelState::*;
        match (self, next) {
            (Init, Ready) | (Init, TerminatedError) => true,
            (Ready, Active) | (Ready, TerminatedOk) => true,
            (Active, Suspended) | (Active, TerminatedOk) | (Active, TerminatedError) => true,
            (Suspended, Active) | (Suspended, TerminatedOk) => true,
            (Init, _) | (Ready, _) | (Active, _) | (Suspended, _) => false,
            (TerminatedOk, _) | (TerminatedError, _) => false,
        }
    }

    /// Whether `later` can be observed after `self` by a host that samples
    /// the status field at arbitrary intervals (intermediate states may have
    /// been skipped).
    pub fn can_reach(self, later: KernelState) -> bool {
        use KernelState::*;
        if self == later {
            return true;
        }
        match self {
            Init => true,
            Ready => !matches!(later, Init),
            Active | Suspended => !matches!(later, Init | Ready),
            TerminatedOk | TerminatedError => false,
        }
    }
}

impl fmt::Display for KernelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
