//! Event sink that feeds the event log, metrics and structured logging

use crate::buffer::EventLog;
use crate::{log, metrics};
use std::time::Duration;
use warden_shared::{EventSink, SchedulerEvent};

pub const DEFAULT_LOG_CAPACITY: usize = 10_000;

#[derive(Debug)]
pub struct Recorder {
    log: EventLog,
    trace_events: bool,
}

impl Recorder {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            log: EventLog::new(log_capacity),
            trace_events: true,
        }
    }

    /// Stop mirroring events onto the tracing target
    pub fn without_tracing(mut self) -> Self {
        self.trace_events = false;
        self
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl EventSink for Recorder {
    fn record(&self, event: SchedulerEvent) {
        metrics::observe(&event);
        if self.trace_events {
            log::log_event(&event);
        }
        self.log.push(event);
    }

    fn tick_processed(&self, _tick: u64, elapsed: Duration) {
        metrics::TICK_DURATION.observe(elapsed.as_secs_f64());
    }
}
