//! Core data model shared by every Warden component

pub mod events;
pub mod kernel;
pub mod period;
pub mod report;
pub mod resource;
