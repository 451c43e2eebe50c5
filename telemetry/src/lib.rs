//! Telemetry for Warden
//!
//! `Recorder` is the event sink a running system reports into. It keeps a
//! bounded log of recent events, feeds the Prometheus metrics and mirrors
//! every event onto the `warden::events` tracing target.

pub mod buffer;
pub mod export;
pub mod log;
pub mod metrics;
pub mod recorder;

pub use buffer::{EventLog, StoredEvent};
pub use export::{write_json, Export};
pub use recorder::Recorder;
