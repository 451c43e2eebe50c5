//! Shared types and primitives for Warden
//!
//! This crate contains everything the host scheduler and the device runtime
//! have to agree on: kernel identifiers and lifecycle states, resource
//! factors, period classes, the checkpoint barrier that joins the two
//! execution domains, scheduler events and the error type.

pub mod barrier;
pub mod error;
pub mod types;
pub mod utils;

pub use barrier::{barrier, BarrierSnapshot, DeviceEndpoint, HostEndpoint};
pub use error::{Result, WardenError};

// Re-export commonly used types
pub use types::{events::*, kernel::*, period::*, report::*, resource::*};
